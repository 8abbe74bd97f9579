//! SQL statement builders (PostgreSQL dialect).
//!
//! All identifiers are quoted via [`quote_ident`]; values never appear in
//! generated text, they are bound or staged.

use crate::error::MergeError;
use crate::ident::{quote_ident, TableRef};

/// Catalog query: `$1` = schema, `$2` = table.
pub const TABLE_EXISTS: &str = "SELECT EXISTS (
    SELECT 1 FROM information_schema.tables
    WHERE table_schema = $1 AND table_name = $2
)";

/// Catalog query: `$1` = schema, `$2` = table. Ordered by position.
pub const TABLE_COLUMNS: &str = "SELECT column_name::text
    FROM information_schema.columns
    WHERE table_schema = $1 AND table_name = $2
    ORDER BY ordinal_position";

/// Transaction-scoped lock serialising writers of one table.
pub const ADVISORY_LOCK: &str = "SELECT pg_advisory_xact_lock(hashtext($1))";

fn quote_all(columns: &[String]) -> Result<Vec<String>, MergeError> {
    columns.iter().map(|c| quote_ident(c)).collect()
}

pub fn create_schema(table: &TableRef) -> String {
    format!("CREATE SCHEMA IF NOT EXISTS {}", table.quoted_schema())
}

pub fn drop_table(table: &TableRef) -> String {
    format!("DROP TABLE IF EXISTS {}", table.quoted())
}

/// `CREATE TEMP TABLE` for staging a batch; dropped at commit.
pub fn create_staging(staging: &str, columns: &[(String, &str)]) -> Result<String, MergeError> {
    let defs = columns
        .iter()
        .map(|(name, sql_type)| Ok(format!("{} {}", quote_ident(name)?, sql_type)))
        .collect::<Result<Vec<_>, MergeError>>()?;
    Ok(format!(
        "CREATE TEMP TABLE {} ({}) ON COMMIT DROP",
        quote_ident(staging)?,
        defs.join(", ")
    ))
}

pub fn create_table_as(table: &TableRef, source: &str, columns: &[String]) -> Result<String, MergeError> {
    let cols = quote_all(columns)?.join(", ");
    Ok(format!(
        "CREATE TABLE {} AS SELECT {} FROM {}",
        table.quoted(),
        cols,
        quote_ident(source)?
    ))
}

pub fn insert_select(table: &TableRef, source: &str, columns: &[String]) -> Result<String, MergeError> {
    let cols = quote_all(columns)?.join(", ");
    Ok(format!(
        "INSERT INTO {} ({}) SELECT {} FROM {}",
        table.quoted(),
        cols,
        cols,
        quote_ident(source)?
    ))
}

/// Single `MERGE` statement: rows matching on `key_columns` are fully
/// overwritten by the source row, others are inserted. Source keys are
/// never NULL (see `ensure_unique_keys`).
pub fn merge(
    table: &TableRef,
    source: &str,
    columns: &[String],
    key_columns: &[String],
) -> Result<String, MergeError> {
    if key_columns.is_empty() {
        return Err(MergeError::EmptyKeyColumns);
    }

    let on = key_columns
        .iter()
        .map(|k| {
            let q = quote_ident(k)?;
            Ok(format!("target.{q} = source.{q}"))
        })
        .collect::<Result<Vec<_>, MergeError>>()?
        .join(" AND ");

    let updates = columns
        .iter()
        .filter(|c| !key_columns.contains(c))
        .map(|c| {
            let q = quote_ident(c)?;
            Ok(format!("{q} = source.{q}"))
        })
        .collect::<Result<Vec<_>, MergeError>>()?;

    let quoted = quote_all(columns)?;
    let values = quoted
        .iter()
        .map(|q| format!("source.{q}"))
        .collect::<Vec<_>>()
        .join(", ");

    let matched = if updates.is_empty() {
        "WHEN MATCHED THEN DO NOTHING".to_string()
    } else {
        format!("WHEN MATCHED THEN UPDATE SET {}", updates.join(", "))
    };

    Ok(format!(
        "MERGE INTO {} AS target\nUSING {} AS source\nON ({})\n{}\nWHEN NOT MATCHED THEN INSERT ({}) VALUES ({})",
        table.quoted(),
        quote_ident(source)?,
        on,
        matched,
        quoted.join(", "),
        values
    ))
}
