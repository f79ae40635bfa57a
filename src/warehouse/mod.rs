pub mod auth;
pub mod bigquery;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use futures::stream::BoxStream;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::search::models::BuiltQuery;

/// Failure reported by a warehouse backend.
///
/// The display text is surfaced to API clients verbatim, so variants carry
/// the backend's own message rather than a paraphrase.
#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error("{0}")]
    Api(String),

    #[error("{0}")]
    Transport(#[from] reqwest::Error),

    #[error("{0}")]
    Database(#[from] sqlx::Error),

    #[error("credential error: {0}")]
    Credentials(String),

    #[error("unexpected response: {0}")]
    Decode(String),

    #[error("invalid API URL {0}")]
    InvalidUrl(String),
}

/// Lazy, single-pass stream of result rows
pub type RowStream<'a> = BoxStream<'a, Result<WarehouseRow, WarehouseError>>;

/// Query language flavour a backend accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// GoogleSQL: `@name` placeholders and `project.dataset.table` identifiers
    BigQuery,
    /// SQLite: `?N` placeholders and bare table names
    Sqlite,
}

/// Identifier of a table inside the warehouse
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub project: String,
    pub dataset: String,
    pub table: String,
}

impl TableRef {
    pub fn new(
        project: impl Into<String>,
        dataset: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            dataset: dataset.into(),
            table: table.into(),
        }
    }

    /// `project.dataset.table`
    pub fn qualified(&self) -> String {
        format!("{}.{}.{}", self.project, self.dataset, self.table)
    }
}

/// A single scalar cell as returned by the warehouse
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Timestamp(DateTime<Utc>),
}

impl CellValue {
    /// Text rendering of the cell, `None` for NULL
    pub fn as_text(&self) -> Option<String> {
        match self {
            CellValue::Null => None,
            CellValue::Text(s) => Some(s.clone()),
            CellValue::Int(i) => Some(i.to_string()),
            CellValue::Float(f) => Some(f.to_string()),
            CellValue::Bool(b) => Some(b.to_string()),
            CellValue::Date(d) => Some(d.format("%Y-%m-%d").to_string()),
            CellValue::DateTime(dt) => Some(dt.format("%Y-%m-%dT%H:%M:%S").to_string()),
            CellValue::Timestamp(ts) => Some(ts.to_rfc3339()),
        }
    }

    /// Calendar date carried by the cell, if it holds one.
    ///
    /// Text cells are accepted when they start with a `YYYY-MM-DD` date, which
    /// covers archives that keep dates as ISO strings.
    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            CellValue::Date(d) => Some(*d),
            CellValue::DateTime(dt) => Some(dt.date()),
            CellValue::Timestamp(ts) => Some(ts.date_naive()),
            CellValue::Text(s) => s
                .get(..10)
                .and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok()),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            CellValue::Null => Value::Null,
            CellValue::Int(i) => Value::from(*i),
            CellValue::Float(f) => Value::from(*f),
            CellValue::Bool(b) => Value::from(*b),
            other => other.as_text().map(Value::String).unwrap_or(Value::Null),
        }
    }
}

/// A result row with access by column name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WarehouseRow {
    cells: HashMap<String, CellValue>,
}

impl WarehouseRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, column: impl Into<String>, value: CellValue) {
        self.cells.insert(column.into(), value);
    }

    /// Cell for `column`, `None` when the query did not select it
    pub fn get(&self, column: &str) -> Option<&CellValue> {
        self.cells.get(column)
    }
}

impl<K: Into<String>> FromIterator<(K, CellValue)> for WarehouseRow {
    fn from_iter<I: IntoIterator<Item = (K, CellValue)>>(iter: I) -> Self {
        Self {
            cells: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

/// Interface to the columnar store holding the email archive.
/// Implementations exist for BigQuery and for a local SQLite archive.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Dialect the built query must be rendered in
    fn dialect(&self) -> Dialect;

    /// Metadata lookup for a table; `Ok(false)` when the table does not exist
    async fn table_exists(&self, table: &TableRef) -> Result<bool, WarehouseError>;

    /// Submit a parameterized query and stream its rows
    async fn query<'a>(&'a self, query: &'a BuiltQuery) -> Result<RowStream<'a>, WarehouseError>;
}

/// Shared handle to a configured warehouse
pub type SharedWarehouse = Arc<dyn Warehouse>;
