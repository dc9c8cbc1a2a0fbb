//! Warehouse Client
//!
//! SQL pass-through to the Redshift cluster. Statements are forwarded as-is
//! and results are rendered as CSV-like text; nothing here validates SQL.

mod redshift;

pub use redshift::RedshiftClient;

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WarehouseError {
    #[error("{0}")]
    Query(String),
    #[error("invalid {kind} name {value:?}")]
    InvalidIdentifier { kind: &'static str, value: String },
}

impl WarehouseError {
    pub fn diagnostic(&self) -> String {
        format!("Error executing query: {}", self)
    }
}

impl From<sqlx::Error> for WarehouseError {
    fn from(err: sqlx::Error) -> Self {
        WarehouseError::Query(err.to_string())
    }
}

/// Rows returned by one statement (or the concatenated result sets of a
/// multi-statement batch). `None` cells are SQL NULLs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryOutput {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
    pub rows_affected: u64,
}

impl QueryOutput {
    /// Header line followed by one line per row. NULL renders as an empty
    /// cell; cells containing separators are quoted.
    pub fn to_csv(&self) -> String {
        if self.columns.is_empty() {
            return format!("OK, {} rows affected", self.rows_affected);
        }

        let mut lines = Vec::with_capacity(self.rows.len() + 1);
        lines.push(
            self.columns
                .iter()
                .map(|c| csv_cell(c))
                .collect::<Vec<_>>()
                .join(","),
        );
        for row in &self.rows {
            lines.push(
                row.iter()
                    .map(|cell| cell.as_deref().map(csv_cell).unwrap_or_default())
                    .collect::<Vec<_>>()
                    .join(","),
            );
        }
        lines.join("\n")
    }
}

fn csv_cell(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Run `sql` verbatim with autocommit semantics.
    async fn execute(&self, sql: &str) -> Result<QueryOutput, WarehouseError>;
}

lazy_static! {
    static ref IDENTIFIER: Regex =
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_$]*$").expect("identifier pattern is valid");
}

/// Reject anything that is not a plain unquoted identifier.
pub fn validate_identifier<'a>(kind: &'static str, value: &'a str) -> Result<&'a str, WarehouseError> {
    let value = value.trim();
    if IDENTIFIER.is_match(value) {
        Ok(value)
    } else {
        Err(WarehouseError::InvalidIdentifier {
            kind,
            value: value.to_string(),
        })
    }
}

/// Tables in `schema`, one per row, alphabetically.
pub fn schema_tables_sql(schema: &str) -> Result<String, WarehouseError> {
    let schema = validate_identifier("schema", schema)?;
    Ok(format!(
        "SELECT table_name FROM information_schema.tables \
         WHERE table_schema = '{}' GROUP BY table_name ORDER BY table_name",
        schema
    ))
}

pub fn table_ddl_sql(schema: &str, table: &str) -> Result<String, WarehouseError> {
    let schema = validate_identifier("schema", schema)?;
    let table = validate_identifier("table", table)?;
    Ok(format!("SHOW TABLE {}.{}", schema, table))
}
