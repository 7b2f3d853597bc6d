//! Catalog introspection of the tables a sync touches.
//!
//! Tables are resolved with `to_regclass` from their quoted identifier, so a missing table is an
//! ordinary `None` instead of an error.

use sqlx::{PgExecutor, Row};

use crate::schema::{ColumnInfo, TableName};

/// Returns the live columns of `table` in ordinal order, or `None` when the table does not exist.
pub async fn table_columns<'c, E>(
    executor: E,
    table: &TableName,
) -> Result<Option<Vec<ColumnInfo>>, sqlx::Error>
where
    E: PgExecutor<'c>,
{
    let rows = sqlx::query(
        r#"
        select r.relid is not null as table_exists,
            a.attname::text as name,
            format_type(a.atttypid, a.atttypmod) as data_type,
            case
                when a.atttypid in ('varchar'::regtype::oid, 'bpchar'::regtype::oid)
                    and a.atttypmod >= 4
                then a.atttypmod - 4
            end as char_max_length,
            not a.attnotnull as nullable
        from (select to_regclass($1::text)::oid as relid) r
        left join pg_attribute a
            on a.attrelid = r.relid and a.attnum > 0 and not a.attisdropped
        order by a.attnum
        "#,
    )
    .bind(table.as_quoted_identifier())
    .fetch_all(executor)
    .await?;

    let mut columns = Vec::with_capacity(rows.len());
    for row in rows {
        if !row.try_get::<bool, _>("table_exists")? {
            return Ok(None);
        }

        // A table without columns still yields the single row of the outer relation.
        let Some(name) = row.try_get::<Option<String>, _>("name")? else {
            continue;
        };
        let data_type: Option<String> = row.try_get("data_type")?;
        let char_max_length: Option<i32> = row.try_get("char_max_length")?;
        let nullable: Option<bool> = row.try_get("nullable")?;

        columns.push(ColumnInfo {
            name,
            data_type: data_type.unwrap_or_default(),
            char_max_length: char_max_length.and_then(|length| u32::try_from(length).ok()),
            nullable: nullable.unwrap_or(true),
        });
    }

    Ok(Some(columns))
}

/// Returns `true` when `table` has a unique index consisting of `column` alone.
pub async fn has_unique_index<'c, E>(
    executor: E,
    table: &TableName,
    column: &str,
) -> Result<bool, sqlx::Error>
where
    E: PgExecutor<'c>,
{
    let row = sqlx::query(
        r#"
        select exists (
            select 1
            from pg_index i
            join pg_attribute a
                on a.attrelid = i.indrelid and a.attnum = any(i.indkey)
            where i.indrelid = to_regclass($1::text)::oid
                and i.indisunique
                and i.indnatts = 1
                and a.attname = $2
        ) as indexed
        "#,
    )
    .bind(table.as_quoted_identifier())
    .bind(column)
    .fetch_one(executor)
    .await?;

    row.try_get("indexed")
}
