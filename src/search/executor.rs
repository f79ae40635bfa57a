use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use serde_json::Value;
use tracing::debug;

use super::models::{BuiltQuery, EmailRecord, JoinMode};
use crate::warehouse::{CellValue, Warehouse, WarehouseError, WarehouseRow};

/// Lazy stream of mapped search results
pub type RecordStream<'a> = BoxStream<'a, Result<EmailRecord, WarehouseError>>;

/// Runs built queries and maps warehouse rows to [`EmailRecord`]s
pub struct SearchExecutor<'w> {
    warehouse: &'w dyn Warehouse,
}

impl<'w> SearchExecutor<'w> {
    pub fn new(warehouse: &'w dyn Warehouse) -> Self {
        Self { warehouse }
    }

    /// Submit `query` and stream its rows as records.
    ///
    /// The stream is single-pass; an error at any point ends the search.
    pub async fn execute<'a>(&'a self, query: &'a BuiltQuery) -> Result<RecordStream<'a>, WarehouseError>
    where
        'w: 'a,
    {
        debug!(
            "Submitting search query with {} parameter(s), join mode {:?}",
            query.params().len(),
            query.join_mode()
        );
        let rows = self.warehouse.query(query).await?;
        let join_mode = query.join_mode();
        Ok(rows
            .map_ok(move |row| record_from_row(&row, join_mode))
            .boxed())
    }

    /// Run `query` to completion; any failure discards every row
    pub async fn collect(&self, query: &BuiltQuery) -> Result<Vec<EmailRecord>, WarehouseError> {
        self.execute(query).await?.try_collect().await
    }
}

fn text(row: &WarehouseRow, column: &str) -> Option<String> {
    row.get(column).and_then(CellValue::as_text)
}

/// Map one row; `date` becomes `YYYY-MM-DD` or is left out
pub fn record_from_row(row: &WarehouseRow, join_mode: JoinMode) -> EmailRecord {
    let date = row.get("date").and_then(|cell| match cell.as_date() {
        Some(day) => Some(day.format("%Y-%m-%d").to_string()),
        None => cell.as_text(),
    });

    let (summary, category) = match join_mode {
        JoinMode::Joined => (Some(text(row, "summary")), Some(text(row, "category"))),
        JoinMode::Flat => (None, None),
    };

    EmailRecord {
        id: row.get("id").map(CellValue::to_json).unwrap_or(Value::Null),
        body: text(row, "Body"),
        subject: text(row, "Subject"),
        sender: text(row, "sender"),
        recipient: text(row, "recipient"),
        date,
        filename: text(row, "filename"),
        summary,
        category,
    }
}
