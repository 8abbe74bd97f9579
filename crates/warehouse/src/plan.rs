//! Write planning shared by every backend.
//!
//! A backend reads the existing table's columns (inside its own atomic
//! scope), then asks [`plan_write`] what to do with the incoming batch.

use std::collections::{BTreeSet, HashSet};

use arrow::array::ArrayRef;
use arrow::datatypes::Schema;
use arrow::record_batch::RecordBatch;
use arrow::row::{RowConverter, SortField};
use arrow::util::display::array_value_to_string;
use serde::Serialize;

use crate::error::MergeError;

/// How an incoming batch reconciles with an existing table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteMode {
    /// Insert rows as-is. No dedup.
    Append,
    /// Replace the whole table with the batch.
    Overwrite,
    /// Match on `key_columns`; matched rows are overwritten, others inserted.
    Upsert { key_columns: Vec<String> },
}

/// What a write actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteAction {
    Created,
    Appended,
    Replaced,
    Upserted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WriteOutcome {
    pub action: WriteAction,
    /// Rows carried by the incoming batch.
    pub rows: usize,
}

/// Column names of a batch, in batch order.
pub fn column_names(schema: &Schema) -> Vec<String> {
    schema.fields().iter().map(|f| f.name().clone()).collect()
}

/// Decide the write action for a batch with `incoming` columns against a
/// table whose columns are `existing` (`None` = table absent).
pub fn plan_write(
    table: &str,
    existing: Option<&[String]>,
    incoming: &[String],
    mode: &WriteMode,
) -> Result<WriteAction, MergeError> {
    let mut seen = HashSet::new();
    for name in incoming {
        if !seen.insert(name.as_str()) {
            return Err(MergeError::DuplicateColumn(name.clone()));
        }
    }

    if let WriteMode::Upsert { key_columns } = mode {
        if key_columns.is_empty() {
            return Err(MergeError::EmptyKeyColumns);
        }
        if let Some(missing) = key_columns.iter().find(|k| !seen.contains(k.as_str())) {
            return Err(MergeError::MissingKeyColumn(missing.clone()));
        }
    }

    let Some(existing) = existing else {
        return Ok(WriteAction::Created);
    };

    if *mode == WriteMode::Overwrite {
        return Ok(WriteAction::Replaced);
    }

    let have: BTreeSet<&str> = existing.iter().map(String::as_str).collect();
    let want: BTreeSet<&str> = incoming.iter().map(String::as_str).collect();
    if have != want {
        return Err(MergeError::SchemaMismatch {
            table: table.to_string(),
            existing: existing.to_vec(),
            incoming: incoming.to_vec(),
        });
    }

    Ok(match mode {
        WriteMode::Upsert { .. } => WriteAction::Upserted,
        _ => WriteAction::Appended,
    })
}

/// Key columns of `batch` in `key_columns` order.
pub fn key_arrays(batch: &RecordBatch, key_columns: &[String]) -> Result<Vec<ArrayRef>, MergeError> {
    key_columns
        .iter()
        .map(|k| {
            batch
                .column_by_name(k)
                .cloned()
                .ok_or_else(|| MergeError::MissingKeyColumn(k.clone()))
        })
        .collect()
}

/// Row converter over the key columns of `batch`.
pub fn key_converter(keys: &[ArrayRef]) -> Result<RowConverter, MergeError> {
    let fields = keys.iter().map(|a| SortField::new(a.data_type().clone())).collect();
    Ok(RowConverter::new(fields)?)
}

/// A MERGE may touch each target row at most once, so the batch itself
/// must not repeat a key. NULL keys are rejected: SQL equality never matches
/// them, so they could not be upserted consistently across backends.
pub fn ensure_unique_keys(batch: &RecordBatch, key_columns: &[String]) -> Result<(), MergeError> {
    let keys = key_arrays(batch, key_columns)?;
    if let Some((name, _)) = key_columns.iter().zip(&keys).find(|(_, a)| a.null_count() > 0) {
        return Err(MergeError::NullKey(name.clone()));
    }
    let converter = key_converter(&keys)?;
    let rows = converter.convert_columns(&keys)?;

    let mut seen = HashSet::with_capacity(rows.num_rows());
    for (idx, row) in rows.iter().enumerate() {
        if !seen.insert(row) {
            let rendered = keys
                .iter()
                .map(|a| array_value_to_string(a, idx))
                .collect::<Result<Vec<_>, _>>()?
                .join(", ");
            return Err(MergeError::DuplicateKey(rendered));
        }
    }
    Ok(())
}
