//! In-memory warehouse over arrow record batches.
//!
//! Implements the same contract as the PostgreSQL backend. Each write holds
//! the state lock for its whole duration, so a failed write leaves every
//! table exactly as it was.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use arrow::array::{ArrayRef, BooleanArray};
use arrow::compute::{cast_with_options, concat_batches, filter_record_batch, CastOptions};
use arrow::datatypes::{Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::MergeError;
use crate::ident::TableRef;
use crate::merge::Warehouse;
use crate::plan::{column_names, key_arrays, key_converter, plan_write, WriteAction, WriteMode, WriteOutcome};

#[derive(Debug, Default)]
struct Catalog {
    schemas: BTreeSet<String>,
    tables: HashMap<TableRef, RecordBatch>,
}

#[derive(Debug, Default)]
pub struct MemoryWarehouse {
    catalog: Mutex<Catalog>,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current contents of a table.
    pub async fn snapshot(&self, table: &TableRef) -> Option<RecordBatch> {
        self.catalog.lock().await.tables.get(table).cloned()
    }

    pub async fn schemas(&self) -> Vec<String> {
        self.catalog.lock().await.schemas.iter().cloned().collect()
    }

    pub async fn row_count(&self, table: &TableRef) -> Option<usize> {
        self.catalog.lock().await.tables.get(table).map(RecordBatch::num_rows)
    }
}

#[async_trait]
impl Warehouse for MemoryWarehouse {
    fn name(&self) -> &str {
        "memory"
    }

    async fn table_exists(&self, table: &TableRef) -> Result<bool, MergeError> {
        Ok(self.catalog.lock().await.tables.contains_key(table))
    }

    async fn table_columns(&self, table: &TableRef) -> Result<Option<Vec<String>>, MergeError> {
        let catalog = self.catalog.lock().await;
        Ok(catalog.tables.get(table).map(|b| column_names(&b.schema())))
    }

    async fn write(
        &self,
        table: &TableRef,
        batch: &RecordBatch,
        mode: &WriteMode,
    ) -> Result<WriteOutcome, MergeError> {
        let mut catalog = self.catalog.lock().await;

        let existing = catalog.tables.get(table);
        let existing_cols = existing.map(|b| column_names(&b.schema()));
        let action = plan_write(
            &table.to_string(),
            existing_cols.as_deref(),
            &column_names(&batch.schema()),
            mode,
        )?;

        // Compute the new table contents before touching the catalog.
        let next = match (action, existing, mode) {
            (WriteAction::Appended, Some(current), _) => {
                let incoming = conform(batch, &current.schema())?;
                concat_batches(&current.schema(), [current, &incoming])?
            }
            (WriteAction::Upserted, Some(current), WriteMode::Upsert { key_columns }) => {
                let incoming = conform(batch, &current.schema())?;
                upsert_rows(current, &incoming, key_columns)?
            }
            _ => as_table(batch)?,
        };

        catalog.schemas.insert(table.schema().to_string());
        catalog.tables.insert(table.clone(), next);

        Ok(WriteOutcome { action, rows: batch.num_rows() })
    }
}

/// Stored tables accept NULLs in every column, as SQL tables created by
/// `CREATE TABLE AS` do.
fn as_table(batch: &RecordBatch) -> Result<RecordBatch, MergeError> {
    let fields: Vec<Field> = batch
        .schema()
        .fields()
        .iter()
        .map(|f| f.as_ref().clone().with_nullable(true))
        .collect();
    let schema = Arc::new(Schema::new(fields));
    Ok(RecordBatch::try_new(schema, batch.columns().to_vec())?)
}

/// Reorder and cast `batch` columns to the table's schema.
fn conform(batch: &RecordBatch, target: &SchemaRef) -> Result<RecordBatch, MergeError> {
    let strict = CastOptions { safe: false, ..Default::default() };
    let columns = target
        .fields()
        .iter()
        .map(|field| {
            let column = batch
                .column_by_name(field.name())
                .ok_or_else(|| MergeError::MissingColumn(field.name().clone()))?;
            if column.data_type() == field.data_type() {
                Ok(column.clone())
            } else {
                Ok(cast_with_options(column, field.data_type(), &strict)?)
            }
        })
        .collect::<Result<Vec<ArrayRef>, MergeError>>()?;
    Ok(RecordBatch::try_new(target.clone(), columns)?)
}

/// Existing rows whose key appears in `incoming` are dropped, then every
/// incoming row is added.
fn upsert_rows(
    current: &RecordBatch,
    incoming: &RecordBatch,
    key_columns: &[String],
) -> Result<RecordBatch, MergeError> {
    let current_keys = key_arrays(current, key_columns)?;
    let incoming_keys = key_arrays(incoming, key_columns)?;
    let converter = key_converter(&current_keys)?;

    let incoming_rows = converter.convert_columns(&incoming_keys)?;
    let matched: HashSet<_> = incoming_rows.iter().collect();

    let current_rows = converter.convert_columns(&current_keys)?;
    let keep: BooleanArray = current_rows
        .iter()
        .map(|row| Some(!matched.contains(&row)))
        .collect();

    let kept = filter_record_batch(current, &keep)?;
    Ok(concat_batches(&current.schema(), [&kept, incoming])?)
}

#[cfg(test)]
mod tests {
    use arrow::array::{Int64Array, StringArray};
    use arrow::datatypes::DataType;

    use super::*;

    fn batch(ids: Vec<i64>, vals: Vec<&str>) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("val", DataType::Utf8, false),
        ]));
        RecordBatch::try_new(
            schema,
            vec![Arc::new(Int64Array::from(ids)), Arc::new(StringArray::from(vals))],
        )
        .unwrap()
    }

    fn table() -> TableRef {
        TableRef::new("cms", "t").unwrap()
    }

    #[tokio::test]
    async fn test_create_registers_schema_and_nullable_columns() {
        let wh = MemoryWarehouse::new();
        let out = wh.write(&table(), &batch(vec![1], vec!["a"]), &WriteMode::Append).await.unwrap();
        assert_eq!(out.action, WriteAction::Created);
        assert_eq!(wh.schemas().await, vec!["cms".to_string()]);
        let snap = wh.snapshot(&table()).await.unwrap();
        assert!(snap.schema().fields().iter().all(|f| f.is_nullable()));
    }

    #[tokio::test]
    async fn test_append_reorders_columns_by_name() {
        let wh = MemoryWarehouse::new();
        wh.write(&table(), &batch(vec![1], vec!["a"]), &WriteMode::Append).await.unwrap();

        let swapped_schema = Arc::new(Schema::new(vec![
            Field::new("val", DataType::Utf8, true),
            Field::new("id", DataType::Int64, true),
        ]));
        let swapped = RecordBatch::try_new(
            swapped_schema,
            vec![
                Arc::new(StringArray::from(vec!["b"])),
                Arc::new(Int64Array::from(vec![2])),
            ],
        )
        .unwrap();
        wh.write(&table(), &swapped, &WriteMode::Append).await.unwrap();

        let snap = wh.snapshot(&table()).await.unwrap();
        assert_eq!(snap.num_rows(), 2);
        assert_eq!(snap.schema().field(0).name(), "id");
    }

    #[tokio::test]
    async fn test_incompatible_type_leaves_table_untouched() {
        let wh = MemoryWarehouse::new();
        wh.write(&table(), &batch(vec![1], vec!["a"]), &WriteMode::Append).await.unwrap();

        let bad_schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, true),
            Field::new("val", DataType::Utf8, true),
        ]));
        let bad = RecordBatch::try_new(
            bad_schema,
            vec![
                Arc::new(StringArray::from(vec!["not a number"])),
                Arc::new(StringArray::from(vec!["b"])),
            ],
        )
        .unwrap();
        assert!(wh.write(&table(), &bad, &WriteMode::Append).await.is_err());
        assert_eq!(wh.row_count(&table()).await, Some(1));
    }

    #[tokio::test]
    async fn test_overwrite_replaces_contents() {
        let wh = MemoryWarehouse::new();
        wh.write(&table(), &batch(vec![1, 2], vec!["a", "b"]), &WriteMode::Append).await.unwrap();
        let out = wh.write(&table(), &batch(vec![3], vec!["c"]), &WriteMode::Overwrite).await.unwrap();
        assert_eq!(out.action, WriteAction::Replaced);
        assert_eq!(wh.row_count(&table()).await, Some(1));
    }
}
