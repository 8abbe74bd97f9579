use thiserror::Error;

#[derive(Error, Debug)]
pub enum MergeError {
    #[error("invalid identifier {0:?}: {1}")]
    InvalidIdentifier(String, &'static str),

    #[error("batch has no columns")]
    NoColumns,

    #[error("upsert requires at least one key column")]
    EmptyKeyColumns,

    #[error("key column {0:?} is not present in the batch")]
    MissingKeyColumn(String),

    #[error("schema mismatch on {table}: table has [{}], batch has [{}]", existing.join(", "), incoming.join(", "))]
    SchemaMismatch {
        table: String,
        existing: Vec<String>,
        incoming: Vec<String>,
    },

    #[error("column {0:?} is missing from the batch")]
    MissingColumn(String),

    #[error("key column {0:?} contains NULL")]
    NullKey(String),

    #[error("batch repeats key ({0}) more than once")]
    DuplicateKey(String),

    #[error("batch has duplicate column {0:?}")]
    DuplicateColumn(String),

    #[error("column {column:?} has unsupported type {data_type}")]
    UnsupportedType { column: String, data_type: String },

    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
