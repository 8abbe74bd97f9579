//! Table Merge: idempotent append/upsert of arrow row batches into a
//! persistent, schema-namespaced table.
//!
//! [`TableMerge`] is the only writer path. It validates identifiers and the
//! incoming batch, then hands the write to a [`Warehouse`] backend which
//! performs the existence check, creation and data statement atomically.

pub mod error;
pub mod ident;
pub mod memory;
pub mod merge;
pub mod plan;
pub mod postgres;
pub mod sql;

pub use error::MergeError;
pub use ident::{quote_ident, TableRef};
pub use memory::MemoryWarehouse;
pub use merge::{TableMerge, Warehouse};
pub use plan::{WriteAction, WriteMode, WriteOutcome};
pub use postgres::PgWarehouse;
