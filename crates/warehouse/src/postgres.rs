//! PostgreSQL warehouse.
//!
//! Every write runs in one transaction:
//! 1. `pg_advisory_xact_lock` on the qualified table name, serialising
//!    concurrent writers (including first-time creation)
//! 2. catalog lookup of the existing columns
//! 3. staging of the batch into a `TEMP ... ON COMMIT DROP` table
//! 4. one `CREATE TABLE AS` / `INSERT ... SELECT` / `MERGE` from the stage
//!
//! PostgreSQL DDL is transactional, so a failure at any step leaves both
//! schema and table as they were.

use std::time::Duration;

use arrow::array::{
    Array, ArrayRef, AsArray, BooleanArray, Date32Array, Float64Array, Int64Array, StringArray,
    TimestampMicrosecondArray,
};
use arrow::compute::{can_cast_types, cast_with_options, CastOptions};
use arrow::datatypes::{
    DataType, Date32Type, Float64Type, Int64Type, TimeUnit, TimestampMicrosecondType,
};
use arrow::record_batch::RecordBatch;
use arrow::temporal_conversions::date32_to_datetime;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::query_builder::Separated;
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};
use tracing::{debug, info};

use crate::error::MergeError;
use crate::ident::{quote_ident, TableRef};
use crate::merge::Warehouse;
use crate::plan::{column_names, plan_write, WriteAction, WriteMode, WriteOutcome};
use crate::sql;

/// PostgreSQL caps a statement at 65535 bind parameters.
const BIND_LIMIT: usize = 65_535;

const STAGING_TABLE: &str = "_cmsfeed_stage";

pub struct PgWarehouse {
    pool: PgPool,
}

impl PgWarehouse {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect a pool with a bounded acquire timeout.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, MergeError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Warehouse for PgWarehouse {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn table_exists(&self, table: &TableRef) -> Result<bool, MergeError> {
        let mut conn = self.pool.acquire().await?;
        table_exists(&mut conn, table).await
    }

    async fn table_columns(&self, table: &TableRef) -> Result<Option<Vec<String>>, MergeError> {
        let mut conn = self.pool.acquire().await?;
        table_columns(&mut conn, table).await
    }

    async fn write(
        &self,
        table: &TableRef,
        batch: &RecordBatch,
        mode: &WriteMode,
    ) -> Result<WriteOutcome, MergeError> {
        let names = column_names(&batch.schema());
        let columns = batch
            .columns()
            .iter()
            .zip(&names)
            .map(|(array, name)| PgColumn::from_array(name, array))
            .collect::<Result<Vec<_>, _>>()?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(sql::ADVISORY_LOCK)
            .bind(table.quoted())
            .execute(&mut *tx)
            .await?;

        let existing = table_columns(&mut tx, table).await?;
        let action = plan_write(&table.to_string(), existing.as_deref(), &names, mode)?;

        let defs: Vec<(String, &str)> = names
            .iter()
            .cloned()
            .zip(columns.iter().map(PgColumn::sql_type))
            .collect();
        sqlx::query(&sql::create_staging(STAGING_TABLE, &defs)?)
            .execute(&mut *tx)
            .await?;
        stage_rows(&mut tx, &names, &columns, batch.num_rows()).await?;

        let statements = match (action, mode) {
            (WriteAction::Created, _) => {
                info!(table = %table, "table does not exist, creating");
                vec![
                    sql::create_schema(table),
                    sql::create_table_as(table, STAGING_TABLE, &names)?,
                ]
            }
            (WriteAction::Replaced, _) => {
                info!(table = %table, "overwriting table");
                vec![
                    sql::drop_table(table),
                    sql::create_table_as(table, STAGING_TABLE, &names)?,
                ]
            }
            (WriteAction::Upserted, WriteMode::Upsert { key_columns }) => {
                vec![sql::merge(table, STAGING_TABLE, &names, key_columns)?]
            }
            _ => vec![sql::insert_select(table, STAGING_TABLE, &names)?],
        };

        for statement in &statements {
            debug!(table = %table, sql = %statement, "executing");
            sqlx::query(statement).execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(WriteOutcome { action, rows: batch.num_rows() })
    }
}

async fn table_exists(conn: &mut PgConnection, table: &TableRef) -> Result<bool, MergeError> {
    let exists: bool = sqlx::query_scalar(sql::TABLE_EXISTS)
        .bind(table.schema())
        .bind(table.table())
        .fetch_one(&mut *conn)
        .await?;
    Ok(exists)
}

async fn table_columns(
    conn: &mut PgConnection,
    table: &TableRef,
) -> Result<Option<Vec<String>>, MergeError> {
    if !table_exists(conn, table).await? {
        return Ok(None);
    }
    let columns: Vec<String> = sqlx::query_scalar(sql::TABLE_COLUMNS)
        .bind(table.schema())
        .bind(table.table())
        .fetch_all(&mut *conn)
        .await?;
    Ok(Some(columns))
}

/// Insert the batch into the staging table in bind-limit sized chunks.
async fn stage_rows(
    conn: &mut PgConnection,
    names: &[String],
    columns: &[PgColumn],
    num_rows: usize,
) -> Result<(), MergeError> {
    if num_rows == 0 {
        return Ok(());
    }
    let quoted = names
        .iter()
        .map(|n| quote_ident(n))
        .collect::<Result<Vec<_>, _>>()?
        .join(", ");
    let prefix = format!("INSERT INTO {} ({}) ", quote_ident(STAGING_TABLE)?, quoted);
    let rows_per_statement = (BIND_LIMIT / columns.len().max(1)).max(1);

    let mut start = 0;
    while start < num_rows {
        let end = (start + rows_per_statement).min(num_rows);
        let mut qb = QueryBuilder::<Postgres>::new(&prefix);
        qb.push_values(start..end, |mut row_values, row| {
            for column in columns {
                column.push_bind(&mut row_values, row);
            }
        });
        qb.build().execute(&mut *conn).await?;
        start = end;
    }
    Ok(())
}

// ── Arrow → PostgreSQL values ────────────────────────────────────────

/// PostgreSQL column type used for an arrow type.
pub fn sql_type_for(data_type: &DataType) -> &'static str {
    match data_type {
        DataType::Boolean => "BOOLEAN",
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32
        | DataType::UInt64 => "BIGINT",
        DataType::Float16 | DataType::Float32 | DataType::Float64 => "DOUBLE PRECISION",
        DataType::Decimal128(_, _) | DataType::Decimal256(_, _) => "NUMERIC",
        DataType::Date32 | DataType::Date64 => "DATE",
        DataType::Timestamp(_, Some(_)) => "TIMESTAMPTZ",
        DataType::Timestamp(_, None) => "TIMESTAMP",
        _ => "TEXT",
    }
}

/// One batch column, normalised to a type sqlx can bind.
enum PgColumn {
    Bool(BooleanArray),
    Int(Int64Array),
    Float(Float64Array),
    /// Exact decimal text, cast to `NUMERIC` at bind time.
    Numeric(StringArray),
    Date(Date32Array),
    Timestamp(TimestampMicrosecondArray),
    TimestampTz(TimestampMicrosecondArray),
    Text(StringArray),
}

impl PgColumn {
    fn from_array(name: &str, array: &ArrayRef) -> Result<Self, MergeError> {
        let strict = CastOptions { safe: false, ..Default::default() };
        let to = |target: DataType| cast_with_options(array, &target, &strict);

        let column = match array.data_type() {
            DataType::Boolean => PgColumn::Bool(array.as_boolean().clone()),
            dt => match sql_type_for(dt) {
                "BIGINT" => PgColumn::Int(to(DataType::Int64)?.as_primitive::<Int64Type>().clone()),
                "DOUBLE PRECISION" => {
                    PgColumn::Float(to(DataType::Float64)?.as_primitive::<Float64Type>().clone())
                }
                "NUMERIC" => PgColumn::Numeric(to(DataType::Utf8)?.as_string::<i32>().clone()),
                "DATE" => PgColumn::Date(to(DataType::Date32)?.as_primitive::<Date32Type>().clone()),
                "TIMESTAMPTZ" => {
                    let DataType::Timestamp(_, tz) = dt else {
                        return Err(unsupported(name, dt));
                    };
                    let cast = to(DataType::Timestamp(TimeUnit::Microsecond, tz.clone()))?;
                    PgColumn::TimestampTz(cast.as_primitive::<TimestampMicrosecondType>().clone())
                }
                "TIMESTAMP" => {
                    let cast = to(DataType::Timestamp(TimeUnit::Microsecond, None))?;
                    PgColumn::Timestamp(cast.as_primitive::<TimestampMicrosecondType>().clone())
                }
                _ if can_cast_types(dt, &DataType::Utf8) => {
                    PgColumn::Text(to(DataType::Utf8)?.as_string::<i32>().clone())
                }
                _ => return Err(unsupported(name, dt)),
            },
        };
        Ok(column)
    }

    fn sql_type(&self) -> &'static str {
        match self {
            PgColumn::Bool(_) => "BOOLEAN",
            PgColumn::Int(_) => "BIGINT",
            PgColumn::Float(_) => "DOUBLE PRECISION",
            PgColumn::Numeric(_) => "NUMERIC",
            PgColumn::Date(_) => "DATE",
            PgColumn::Timestamp(_) => "TIMESTAMP",
            PgColumn::TimestampTz(_) => "TIMESTAMPTZ",
            PgColumn::Text(_) => "TEXT",
        }
    }

    fn push_bind(&self, b: &mut Separated<'_, '_, Postgres, &'static str>, row: usize) {
        match self {
            PgColumn::Bool(a) => {
                b.push_bind(a.is_valid(row).then(|| a.value(row)));
            }
            PgColumn::Int(a) => {
                b.push_bind(a.is_valid(row).then(|| a.value(row)));
            }
            PgColumn::Float(a) => {
                b.push_bind(a.is_valid(row).then(|| a.value(row)));
            }
            PgColumn::Numeric(a) => {
                b.push_bind(a.is_valid(row).then(|| a.value(row).to_string()));
                b.push_unseparated("::NUMERIC");
            }
            PgColumn::Date(a) => {
                let v: Option<NaiveDate> = a
                    .is_valid(row)
                    .then(|| date32_to_datetime(a.value(row)).map(|d| d.date()))
                    .flatten();
                b.push_bind(v);
            }
            PgColumn::Timestamp(a) => {
                let v: Option<NaiveDateTime> = a
                    .is_valid(row)
                    .then(|| DateTime::from_timestamp_micros(a.value(row)).map(|d| d.naive_utc()))
                    .flatten();
                b.push_bind(v);
            }
            PgColumn::TimestampTz(a) => {
                let v: Option<DateTime<Utc>> = a
                    .is_valid(row)
                    .then(|| DateTime::from_timestamp_micros(a.value(row)))
                    .flatten();
                b.push_bind(v);
            }
            PgColumn::Text(a) => {
                b.push_bind(a.is_valid(row).then(|| a.value(row).to_string()));
            }
        }
    }
}

fn unsupported(name: &str, dt: &DataType) -> MergeError {
    MergeError::UnsupportedType {
        column: name.to_string(),
        data_type: dt.to_string(),
    }
}
