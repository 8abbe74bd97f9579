//! CSV → arrow parsing and row tagging.
//!
//! Every ingested row gets two derived columns appended after the source
//! columns: `partition_key` (period text) and `record_created_at` (UTC
//! microsecond timestamp of the ingestion).

use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use arrow::array::{ArrayRef, StringArray, TimestampMicrosecondArray};
use arrow::compute::concat_batches;
use arrow::csv::reader::Format;
use arrow::csv::ReaderBuilder;
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use cmsfeed_core::Period;
use tracing::debug;

use crate::error::{FormatError, TaskError};

pub const PARTITION_KEY_COLUMN: &str = "partition_key";
pub const CREATED_AT_COLUMN: &str = "record_created_at";

const BATCH_SIZE: usize = 8192;

/// Parse a headed CSV file into a single batch, inferring column types
/// from the whole file.
pub fn read_csv(path: &Path, member: &str) -> Result<RecordBatch, TaskError> {
    let mut file = File::open(path)?;
    let format = Format::default().with_header(true);
    let (schema, records) = format.infer_schema(&mut file, None).map_err(FormatError::from)?;
    file.seek(SeekFrom::Start(0))?;

    let schema = Arc::new(schema);
    let reader = ReaderBuilder::new(schema.clone())
        .with_format(format)
        .with_batch_size(BATCH_SIZE)
        .build(file)
        .map_err(FormatError::from)?;

    let batches = reader
        .collect::<Result<Vec<_>, _>>()
        .map_err(FormatError::from)?;
    let batch = concat_batches(&schema, &batches).map_err(FormatError::from)?;

    if batch.num_rows() == 0 {
        return Err(FormatError::Empty(member.to_string()).into());
    }
    debug!(member = %member, rows = batch.num_rows(), columns = batch.num_columns(), inferred_records = records, "parsed csv");
    Ok(batch)
}

/// Append `partition_key` and `record_created_at` to every row.
pub fn tag_batch(
    batch: &RecordBatch,
    period: &Period,
    created_at: DateTime<Utc>,
) -> Result<RecordBatch, FormatError> {
    let schema = batch.schema();
    for reserved in [PARTITION_KEY_COLUMN, CREATED_AT_COLUMN] {
        if schema.column_with_name(reserved).is_some() {
            return Err(FormatError::ReservedColumn(reserved.to_string()));
        }
    }

    let rows = batch.num_rows();
    let key = period.to_string();
    let partition: ArrayRef = Arc::new(StringArray::from(vec![key.as_str(); rows]));
    let created: ArrayRef = Arc::new(
        TimestampMicrosecondArray::from(vec![created_at.timestamp_micros(); rows]).with_timezone("UTC"),
    );

    let mut fields: Vec<Field> = schema.fields().iter().map(|f| f.as_ref().clone()).collect();
    fields.push(Field::new(PARTITION_KEY_COLUMN, DataType::Utf8, false));
    fields.push(Field::new(
        CREATED_AT_COLUMN,
        DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
        false,
    ));

    let mut columns = batch.columns().to_vec();
    columns.push(partition);
    columns.push(created);

    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?)
}
