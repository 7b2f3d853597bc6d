use std::collections::{HashMap, HashSet};

use serde::Deserialize;

use crate::Config;
use crate::shared::{PgConnectionConfig, SyncProfileConfig, ValidationError};

/// Complete configuration of the `syncer` binary.
///
/// This intentionally does not implement `Serialize` to avoid leaking the database password.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncerConfig {
    /// Database holding every target, log and staging table.
    pub database: PgConnectionConfig,
    /// Profiles synchronized by one invocation.
    #[serde(default)]
    pub profiles: Vec<SyncProfileConfig>,
}

impl SyncerConfig {
    /// Validates the connection settings, every profile and the uniqueness of profile names and
    /// tables. Profiles run concurrently, so a target or staging table belongs to one profile
    /// and no profile logs into a table another profile synchronizes. Log tables may be shared.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.database.validate()?;

        let mut names = HashSet::new();
        let mut targets: HashMap<String, &str> = HashMap::new();
        let mut stagings: HashMap<String, &str> = HashMap::new();
        let mut logs: HashMap<String, &str> = HashMap::new();
        for profile in &self.profiles {
            profile.validate()?;

            if !names.insert(profile.name.as_str()) {
                return Err(ValidationError::DuplicateProfileName(profile.name.clone()));
            }

            let target = profile.qualified_target_table();
            let staging = profile.qualified_staging_table();
            let log = profile.qualified_log_table();

            if let Some(first) = targets.get(&target) {
                return Err(ValidationError::DuplicateTargetTable {
                    first: first.to_string(),
                    second: profile.name.clone(),
                    table: target,
                });
            }

            let claimed = [
                (&target, [&stagings, &logs]),
                (&staging, [&targets, &logs]),
                (&log, [&targets, &stagings]),
            ];
            for (table, others) in claimed {
                if let Some(first) = others.iter().find_map(|owners| owners.get(table)) {
                    return Err(ValidationError::SharedTable {
                        first: first.to_string(),
                        second: profile.name.clone(),
                        table: table.clone(),
                    });
                }
            }

            targets.insert(target, profile.name.as_str());
            stagings.insert(staging, profile.name.as_str());
            logs.entry(log).or_insert(profile.name.as_str());
        }

        Ok(())
    }

    /// Returns the profiles selected by name, or all of them when `selected` is empty.
    pub fn selected_profiles<'a>(
        &'a self,
        selected: &'a [String],
    ) -> impl Iterator<Item = &'a SyncProfileConfig> + 'a {
        self.profiles
            .iter()
            .filter(move |profile| selected.is_empty() || selected.contains(&profile.name))
    }
}

impl Config for SyncerConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &[];
}
