//! SQL text for the Postgres store.
//!
//! Identifiers are always quoted with [`quote_identifier`] and values are always bound as
//! parameters; the only literals rendered here are fixed by the engine.

use pg_escape::{quote_identifier, quote_literal};
use postgres::schema::TableName;

use crate::merge::{LogAction, MergePlan};
use crate::provision::ColumnDefinition;
use crate::reconcile::{LOG_ACTION_COLUMN, LOG_SYNCDATE_COLUMN};
use crate::staging::StagingColumn;

/// Postgres refuses statements with more bind parameters than this.
pub const MAX_BIND_PARAMETERS: usize = 65535;

/// Upper bound of rows per multi-row insert.
pub const MAX_ROWS_PER_INSERT: usize = 1000;

/// Length of the log table's `action` column.
pub const LOG_ACTION_LENGTH: u32 = 10;

fn column_list<'a>(columns: impl IntoIterator<Item = &'a str>, prefix: &str) -> String {
    columns
        .into_iter()
        .map(|column| format!("{prefix}{}", quote_identifier(column)))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Number of rows inserted per statement for a table with `column_count` columns.
pub fn rows_per_insert(column_count: usize) -> usize {
    (MAX_BIND_PARAMETERS / column_count.max(1)).clamp(1, MAX_ROWS_PER_INSERT)
}

pub fn create_target_table(
    table: &TableName,
    columns: &[ColumnDefinition],
    key_column: &str,
) -> String {
    let definitions = columns
        .iter()
        .map(|column| {
            if column.name == key_column {
                format!(
                    "{} {} not null primary key",
                    quote_identifier(&column.name),
                    column.column_type
                )
            } else {
                format!("{} {}", quote_identifier(&column.name), column.column_type)
            }
        })
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "create table if not exists {} ({definitions})",
        table.as_quoted_identifier()
    )
}

/// Log table shaped as `action, key, syncdate, log columns...`, types copied from the target.
pub fn create_log_table(
    log: &TableName,
    target: &TableName,
    key_column: &str,
    log_columns: &[String],
) -> String {
    let mut select = vec![
        format!("''::varchar({LOG_ACTION_LENGTH}) as {}", quote_identifier(LOG_ACTION_COLUMN)),
        format!("t.{}", quote_identifier(key_column)),
        format!("now()::timestamp as {}", quote_identifier(LOG_SYNCDATE_COLUMN)),
    ];
    select.extend(log_columns.iter().map(|column| format!("t.{}", quote_identifier(column))));

    format!(
        "create table if not exists {} as select {} from {} t where false",
        log.as_quoted_identifier(),
        select.join(", "),
        target.as_quoted_identifier()
    )
}

pub fn drop_table(table: &TableName) -> String {
    format!("drop table if exists {}", table.as_quoted_identifier())
}

/// Empty staging relation with target columns copied and extract-only columns typed
/// generically.
pub fn create_staging_table(
    staging: &TableName,
    target: &TableName,
    columns: &[StagingColumn],
) -> String {
    let select = columns
        .iter()
        .map(|column| {
            if column.from_target {
                format!("t.{}", quote_identifier(&column.name))
            } else {
                format!("null::{} as {}", column.info.data_type, quote_identifier(&column.name))
            }
        })
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "create unlogged table {} as select {select} from {} t where false",
        staging.as_quoted_identifier(),
        target.as_quoted_identifier()
    )
}

pub fn add_primary_key(table: &TableName, key_column: &str) -> String {
    format!(
        "alter table {} add primary key ({})",
        table.as_quoted_identifier(),
        quote_identifier(key_column)
    )
}

/// Multi-row insert of `row_count` rows. Character columns take text parameters as they are,
/// other columns cast them from text.
pub fn insert_rows(table: &TableName, columns: &[StagingColumn], row_count: usize) -> String {
    let mut sql = format!(
        "insert into {} ({}) values ",
        table.as_quoted_identifier(),
        column_list(columns.iter().map(|column| column.name.as_str()), "")
    );

    let mut parameter = 0;
    for row in 0..row_count {
        if row > 0 {
            sql.push_str(", ");
        }
        sql.push('(');
        for (index, column) in columns.iter().enumerate() {
            if index > 0 {
                sql.push_str(", ");
            }
            parameter += 1;
            if column.info.is_character_type() {
                sql.push_str(&format!("${parameter}::text"));
            } else {
                sql.push_str(&format!("cast(${parameter}::text as {})", column.info.data_type));
            }
        }
        sql.push(')');
    }

    sql
}

pub fn strip_characters(table: &TableName, column: &str, characters: &[char]) -> String {
    let column = quote_identifier(column);
    let expression = characters.iter().fold(column.to_string(), |expression, character| {
        format!(
            "replace({expression}, {}, '')",
            quote_literal(&character.to_string())
        )
    });

    format!(
        "update {} set {column} = {expression} where {column} is not null",
        table.as_quoted_identifier()
    )
}

fn log_insert(plan: &MergePlan, action: LogAction, changes: &str) -> String {
    let mut columns = vec![
        quote_identifier(LOG_ACTION_COLUMN).into_owned(),
        quote_identifier(&plan.log_key_column).into_owned(),
        quote_identifier(LOG_SYNCDATE_COLUMN).into_owned(),
    ];
    columns.extend(plan.log_columns.iter().map(|column| quote_identifier(column).into_owned()));

    let mut values = vec![
        quote_literal(action.as_str()),
        quote_identifier(&plan.key_column).into_owned(),
        "now()".to_string(),
    ];
    values.extend(plan.log_columns.iter().map(|column| quote_identifier(column).into_owned()));

    format!(
        "insert into {} ({}) select {} from {changes}",
        plan.log.as_quoted_identifier(),
        columns.join(", "),
        values.join(", ")
    )
}

fn returning(plan: &MergePlan) -> String {
    let columns = std::iter::once(plan.key_column.as_str())
        .chain(plan.log_columns.iter().map(String::as_str));
    column_list(columns, "t.")
}

/// Inserts staging rows whose key the target lacks and logs them as `insert`.
pub fn merge_insert(plan: &MergePlan) -> String {
    let key = quote_identifier(&plan.key_column);
    let insert_columns = column_list(plan.insert_columns.iter().map(String::as_str), "");
    let select_columns = column_list(plan.insert_columns.iter().map(String::as_str), "s.");

    format!(
        "with changes as (insert into {target} as t ({insert_columns}) select {select_columns} from {staging} s \
         where not exists (select 1 from {target} e where e.{key} = s.{key}) returning {returning}) {log}",
        target = plan.target.as_quoted_identifier(),
        staging = plan.staging.as_quoted_identifier(),
        returning = returning(plan),
        log = log_insert(plan, LogAction::Insert, "changes"),
    )
}

/// Overwrites target rows that differ from staging and logs them as `update` with their new
/// values. Returns `None` when there is no column to compare.
pub fn merge_update(plan: &MergePlan) -> Option<String> {
    if !plan.can_update() {
        return None;
    }

    let key = quote_identifier(&plan.key_column);
    let assignments = plan
        .update_columns
        .iter()
        .map(|column| {
            let column = quote_identifier(column);
            format!("{column} = s.{column}")
        })
        .collect::<Vec<_>>()
        .join(", ");
    let changed = plan
        .update_columns
        .iter()
        .map(|column| {
            let column = quote_identifier(column);
            format!("t.{column} is distinct from s.{column}")
        })
        .collect::<Vec<_>>()
        .join(" or ");

    Some(format!(
        "with changes as (update {target} as t set {assignments} from {staging} s \
         where t.{key} = s.{key} and ({changed}) returning {returning}) {log}",
        target = plan.target.as_quoted_identifier(),
        staging = plan.staging.as_quoted_identifier(),
        returning = returning(plan),
        log = log_insert(plan, LogAction::Update, "changes"),
    ))
}

/// Deletes target rows whose key staging lacks and logs them as `delete` with their last values.
pub fn merge_delete(plan: &MergePlan) -> String {
    let key = quote_identifier(&plan.key_column);

    format!(
        "with changes as (delete from {target} as t \
         where not exists (select 1 from {staging} s where s.{key} = t.{key}) returning {returning}) {log}",
        target = plan.target.as_quoted_identifier(),
        staging = plan.staging.as_quoted_identifier(),
        returning = returning(plan),
        log = log_insert(plan, LogAction::Delete, "changes"),
    )
}

#[cfg(test)]
mod tests {
    use postgres::schema::ColumnInfo;

    use super::*;
    use crate::provision::ColumnType;

    fn table(name: &str) -> TableName {
        TableName::new("public", name).unwrap()
    }

    fn plan(update_columns: &[&str]) -> MergePlan {
        let mut insert_columns = vec!["asset_id".to_string()];
        insert_columns.extend(update_columns.iter().map(|column| column.to_string()));

        MergePlan {
            target: table("assets"),
            staging: table("_staging_assets"),
            log: table("assets_log"),
            key_column: "asset_id".to_string(),
            log_key_column: "asset_id".to_string(),
            update_columns: update_columns.iter().map(|column| column.to_string()).collect(),
            insert_columns,
            log_columns: update_columns.iter().map(|column| column.to_string()).collect(),
            allow_delete: true,
        }
    }

    fn staging_column(name: &str, data_type: &str, from_target: bool) -> StagingColumn {
        let length = data_type.starts_with("character").then_some(500);
        StagingColumn {
            name: name.to_string(),
            info: ColumnInfo::new(name, data_type, length, true),
            from_target,
        }
    }

    #[test]
    fn chunk_size_respects_parameter_limit() {
        assert_eq!(rows_per_insert(1), MAX_ROWS_PER_INSERT);
        assert_eq!(rows_per_insert(100), 655);
        assert_eq!(rows_per_insert(70000), 1);
        assert_eq!(rows_per_insert(0), MAX_ROWS_PER_INSERT);
    }

    #[test]
    fn target_table_has_key_primary_key() {
        let sql = create_target_table(
            &table("assets"),
            &[
                ColumnDefinition {
                    name: "asset_id".to_string(),
                    column_type: ColumnType::Varchar(100),
                },
                ColumnDefinition {
                    name: "Asset Name".to_string(),
                    column_type: ColumnType::Varchar(500),
                },
            ],
            "asset_id",
        );

        assert_eq!(
            sql,
            r#"create table if not exists public.assets (asset_id varchar(100) not null primary key, "Asset Name" varchar(500))"#
        );
    }

    #[test]
    fn log_table_copies_target_types() {
        let sql = create_log_table(
            &table("assets_log"),
            &table("assets"),
            "asset_id",
            &["asset_label".to_string()],
        );

        assert_eq!(
            sql,
            format!(
                "create table if not exists public.assets_log as select ''::varchar(10) as {}, t.asset_id, \
                 now()::timestamp as {}, t.asset_label from public.assets t where false",
                quote_identifier(LOG_ACTION_COLUMN),
                quote_identifier(LOG_SYNCDATE_COLUMN)
            )
        );
    }

    #[test]
    fn staging_copies_target_columns_and_types_extract_only_ones() {
        let sql = create_staging_table(
            &table("_staging_assets"),
            &table("assets"),
            &[
                staging_column("asset_id", "character varying(100)", true),
                staging_column("colour", "character varying(500)", false),
            ],
        );

        assert_eq!(
            sql,
            "create unlogged table public._staging_assets as select t.asset_id, \
             null::character varying(500) as colour from public.assets t where false"
        );
    }

    #[test]
    fn inserts_bind_text_and_cast_other_types() {
        let sql = insert_rows(
            &table("_staging_assets"),
            &[
                staging_column("asset_id", "character varying(100)", true),
                staging_column("unit_count", "integer", true),
            ],
            2,
        );

        assert_eq!(
            sql,
            "insert into public._staging_assets (asset_id, unit_count) values \
             ($1::text, cast($2::text as integer)), ($3::text, cast($4::text as integer))"
        );
    }

    #[test]
    fn strip_characters_nests_replacements() {
        let sql = strip_characters(&table("_staging_assets"), "AssetStreetNumber", &['=', '"']);

        assert_eq!(
            sql,
            r#"update public._staging_assets set "AssetStreetNumber" = replace(replace("AssetStreetNumber", '=', ''), '"', '') where "AssetStreetNumber" is not null"#
        );
    }

    #[test]
    fn update_compares_with_is_distinct_from() {
        let sql = merge_update(&plan(&["asset_label", "asset_state"])).unwrap();

        assert!(sql.starts_with(
            "with changes as (update public.assets as t set asset_label = s.asset_label, \
             asset_state = s.asset_state from public._staging_assets s where t.asset_id = s.asset_id and \
             (t.asset_label is distinct from s.asset_label or t.asset_state is distinct from s.asset_state) \
             returning t.asset_id, t.asset_label, t.asset_state) insert into public.assets_log ("
        ));
        let log_select = "select 'update', asset_id, now(), asset_label, asset_state from changes";
        assert!(sql.ends_with(log_select));
    }

    #[test]
    fn update_is_skipped_without_non_key_columns() {
        assert_eq!(merge_update(&plan(&[])), None);
    }

    #[test]
    fn insert_and_delete_log_their_action() {
        let insert = merge_insert(&plan(&["asset_label"]));
        assert!(insert.starts_with(
            "with changes as (insert into public.assets as t (asset_id, asset_label) \
             select s.asset_id, s.asset_label from public._staging_assets s where not exists"
        ));
        assert!(insert.ends_with("select 'insert', asset_id, now(), asset_label from changes"));

        let delete = merge_delete(&plan(&["asset_label"]));
        assert!(delete.contains(
            "delete from public.assets as t where not exists \
             (select 1 from public._staging_assets s where s.asset_id = t.asset_id)"
        ));
        assert!(delete.ends_with("select 'delete', asset_id, now(), asset_label from changes"));
    }
}
