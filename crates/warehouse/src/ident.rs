//! SQL identifier validation and quoting.
//!
//! Every identifier interpolated into generated SQL goes through
//! [`quote_ident`]: it is always double-quoted with embedded quotes doubled,
//! so names with spaces, dashes, reserved words or mixed case round-trip
//! exactly as written.

use std::fmt;

use crate::error::MergeError;

/// PostgreSQL truncates identifiers beyond NAMEDATALEN - 1 bytes.
const MAX_IDENT_BYTES: usize = 63;

/// Reject identifiers that cannot be represented faithfully.
pub fn validate_ident(name: &str) -> Result<(), MergeError> {
    if name.is_empty() {
        return Err(MergeError::InvalidIdentifier(name.to_string(), "empty"));
    }
    if name.contains('\0') {
        return Err(MergeError::InvalidIdentifier(name.to_string(), "contains NUL"));
    }
    if name.len() > MAX_IDENT_BYTES {
        return Err(MergeError::InvalidIdentifier(name.to_string(), "longer than 63 bytes"));
    }
    Ok(())
}

/// Validate and double-quote an identifier.
pub fn quote_ident(name: &str) -> Result<String, MergeError> {
    validate_ident(name)?;
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

/// A schema-qualified table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    schema: String,
    table: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Result<Self, MergeError> {
        let schema = schema.into();
        let table = table.into();
        validate_ident(&schema)?;
        validate_ident(&table)?;
        Ok(Self { schema, table })
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// `"schema"."table"`, ready for interpolation.
    pub fn quoted(&self) -> String {
        format!("{}.{}", quote(&self.schema), quote(&self.table))
    }

    pub fn quoted_schema(&self) -> String {
        quote(&self.schema)
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

// Names already validated by `TableRef::new`.
fn quote(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
