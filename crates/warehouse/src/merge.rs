use std::sync::Arc;

use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::MergeError;
use crate::ident::{validate_ident, TableRef};
use crate::plan::{ensure_unique_keys, WriteMode, WriteOutcome};

/// Storage backend for persistent tables (PostgreSQL, in-memory, ...).
///
/// `write` must be atomic from the caller's point of view: the existence
/// check, schema/table creation and the data statement either all take
/// effect or none do.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Backend label for logs.
    fn name(&self) -> &str;

    async fn table_exists(&self, table: &TableRef) -> Result<bool, MergeError>;

    /// Column names of `table` in table order, `None` if the table is absent.
    async fn table_columns(&self, table: &TableRef) -> Result<Option<Vec<String>>, MergeError>;

    async fn write(
        &self,
        table: &TableRef,
        batch: &RecordBatch,
        mode: &WriteMode,
    ) -> Result<WriteOutcome, MergeError>;
}

/// The single writer path into target tables.
#[derive(Clone)]
pub struct TableMerge {
    warehouse: Arc<dyn Warehouse>,
}

impl TableMerge {
    pub fn new(warehouse: Arc<dyn Warehouse>) -> Self {
        Self { warehouse }
    }

    pub fn warehouse(&self) -> &Arc<dyn Warehouse> {
        &self.warehouse
    }

    pub async fn table_exists(&self, schema: &str, table: &str) -> Result<bool, MergeError> {
        let table = TableRef::new(schema, table)?;
        self.warehouse.table_exists(&table).await
    }

    /// Create the table from the batch if absent, otherwise insert the rows
    /// as-is. Re-appending the same batch duplicates its rows.
    pub async fn append(
        &self,
        schema: &str,
        table: &str,
        batch: &RecordBatch,
    ) -> Result<WriteOutcome, MergeError> {
        self.write(schema, table, batch, WriteMode::Append).await
    }

    /// Create the table from the batch if absent, otherwise replace it.
    pub async fn overwrite(
        &self,
        schema: &str,
        table: &str,
        batch: &RecordBatch,
    ) -> Result<WriteOutcome, MergeError> {
        self.write(schema, table, batch, WriteMode::Overwrite).await
    }

    /// Append (`overwrite = false`) or replace (`overwrite = true`).
    pub async fn load(
        &self,
        schema: &str,
        table: &str,
        batch: &RecordBatch,
        overwrite: bool,
    ) -> Result<WriteOutcome, MergeError> {
        let mode = if overwrite { WriteMode::Overwrite } else { WriteMode::Append };
        self.write(schema, table, batch, mode).await
    }

    /// Create the table from the batch if absent, otherwise merge on
    /// `key_columns`: matched rows are overwritten, unmatched inserted.
    pub async fn upsert(
        &self,
        schema: &str,
        table: &str,
        batch: &RecordBatch,
        key_columns: &[String],
    ) -> Result<WriteOutcome, MergeError> {
        let mode = WriteMode::Upsert { key_columns: key_columns.to_vec() };
        self.write(schema, table, batch, mode).await
    }

    async fn write(
        &self,
        schema: &str,
        table: &str,
        batch: &RecordBatch,
        mode: WriteMode,
    ) -> Result<WriteOutcome, MergeError> {
        let table = TableRef::new(schema, table)?;
        if batch.num_columns() == 0 {
            return Err(MergeError::NoColumns);
        }
        for field in batch.schema().fields() {
            validate_ident(field.name())?;
        }
        if let WriteMode::Upsert { key_columns } = &mode {
            if key_columns.is_empty() {
                return Err(MergeError::EmptyKeyColumns);
            }
            for key in key_columns {
                validate_ident(key)?;
            }
            ensure_unique_keys(batch, key_columns)?;
        }

        debug!(table = %table, backend = self.warehouse.name(), mode = ?mode, rows = batch.num_rows(), "merging batch");
        let outcome = self.warehouse.write(&table, batch, &mode).await?;
        info!(
            table = %table,
            backend = self.warehouse.name(),
            action = ?outcome.action,
            rows = outcome.rows,
            "batch merged"
        );
        Ok(outcome)
    }
}
