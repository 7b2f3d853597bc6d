//! Turns extract header labels into column names.

use std::borrow::Cow;

use config::shared::ColumnNamingConfig;

/// Returns the column name for a header `label`.
///
/// With `use_internal_names` the label is looked up in the internal name map and passes
/// unchanged when no mapping exists. Otherwise configured substring replacements are applied,
/// followed by the space replacement when `replace_spaces` is set.
pub fn column_name_for_label<'a>(label: &'a str, naming: &ColumnNamingConfig) -> Cow<'a, str> {
    if naming.use_internal_names {
        return match naming.internal_names.get(label) {
            Some(name) => Cow::Owned(name.clone()),
            None => Cow::Borrowed(label),
        };
    }

    let mut name = Cow::Borrowed(label);
    for (from, to) in &naming.replace_characters {
        if !from.is_empty() && name.contains(from.as_str()) {
            name = Cow::Owned(name.replace(from.as_str(), to));
        }
    }

    if naming.replace_spaces && name.contains(' ') {
        let delimiter = naming.space_delimiter.as_deref().unwrap_or_default();
        name = Cow::Owned(name.replace(' ', delimiter));
    }

    name
}
