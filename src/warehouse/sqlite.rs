use async_trait::async_trait;
use futures::StreamExt;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row, TypeInfo, ValueRef};
use std::str::FromStr;
use tracing::info;

use super::{CellValue, Dialect, RowStream, TableRef, Warehouse, WarehouseError, WarehouseRow};
use crate::search::models::{BuiltQuery, ParamValue};

/// Local SQLite copy of the archive, used for development and tests.
///
/// Tables keep the warehouse column names (`id`, `Body`, `Subject`, `From`,
/// `To`, `Date_Sent`, `filename`); dates are stored as `YYYY-MM-DD` text.
pub struct SqliteWarehouse {
    pool: SqlitePool,
}

impl SqliteWarehouse {
    /// Open the archive at `database_url`
    pub async fn new(database_url: &str) -> Result<Self, WarehouseError> {
        info!("Connecting to SQLite archive: {}", database_url);

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;

        Ok(Self { pool })
    }

    #[cfg(test)]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn decode_row(row: &SqliteRow) -> Result<WarehouseRow, WarehouseError> {
    let mut decoded = WarehouseRow::new();

    for column in row.columns() {
        let index = column.ordinal();
        let raw = row.try_get_raw(index)?;
        let cell = if raw.is_null() {
            CellValue::Null
        } else {
            match raw.type_info().name() {
                "INTEGER" | "BOOLEAN" => CellValue::Int(row.try_get::<i64, _>(index)?),
                "REAL" => CellValue::Float(row.try_get::<f64, _>(index)?),
                "BLOB" => CellValue::Text(
                    String::from_utf8_lossy(&row.try_get::<Vec<u8>, _>(index)?).into_owned(),
                ),
                _ => CellValue::Text(row.try_get::<String, _>(index)?),
            }
        };
        decoded.insert(column.name(), cell);
    }

    Ok(decoded)
}

#[async_trait]
impl Warehouse for SqliteWarehouse {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn table_exists(&self, table: &TableRef) -> Result<bool, WarehouseError> {
        let found: Option<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?")
                .bind(&table.table)
                .fetch_optional(&self.pool)
                .await?;

        Ok(found.is_some())
    }

    async fn query<'a>(&'a self, query: &'a BuiltQuery) -> Result<RowStream<'a>, WarehouseError> {
        // Placeholders are `?N`, so binding in list order lines up with N
        let mut statement = sqlx::query(query.sql());
        for param in query.params() {
            statement = match &param.value {
                ParamValue::String(s) => statement.bind(s.as_str()),
                ParamValue::Date(d) => statement.bind(d.format("%Y-%m-%d").to_string()),
                ParamValue::Int64(i) => statement.bind(*i),
            };
        }

        let rows = statement
            .fetch(&self.pool)
            .map(|row| row.map_err(WarehouseError::from).and_then(|row| decode_row(&row)));

        Ok(rows.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::builder::QueryBuilder;
    use crate::search::models::{SearchRequest, SearchScope};
    use crate::search::probe::QueryShape;
    use futures::TryStreamExt;
    use tempfile::{tempdir, TempDir};

    async fn create_test_archive() -> (TempDir, SqliteWarehouse) {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join("archive.db");
        let warehouse = SqliteWarehouse::new(&format!("sqlite:{}", db_path.display()))
            .await
            .unwrap();

        sqlx::query(
            r#"
            CREATE TABLE emails (
                id INTEGER PRIMARY KEY,
                Body TEXT,
                Subject TEXT,
                `From` TEXT,
                `To` TEXT,
                Date_Sent TEXT,
                filename TEXT
            )
            "#,
        )
        .execute(warehouse.pool())
        .await
        .unwrap();

        for (id, subject, body, date) in [
            (1, "Invoice March", "Please pay the INVOICE", "2021-03-05"),
            (2, "Lunch", "See you at noon", "2021-03-06"),
            (3, "Re: invoice", "Paid, thanks", "2021-03-07"),
        ] {
            sqlx::query(
                "INSERT INTO emails (id, Body, Subject, `From`, `To`, Date_Sent, filename) VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(id)
            .bind(body)
            .bind(subject)
            .bind("alice@example.com")
            .bind("bob@example.com")
            .bind(date)
            .bind(format!("{:04}.eml", id))
            .execute(warehouse.pool())
            .await
            .unwrap();
        }

        (temp_dir, warehouse)
    }

    #[tokio::test]
    async fn test_table_exists() {
        let (_dir, warehouse) = create_test_archive().await;
        assert!(warehouse
            .table_exists(&TableRef::new("p", "d", "emails"))
            .await
            .unwrap());
        assert!(!warehouse
            .table_exists(&TableRef::new("p", "d", "summaries"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_query_binds_repeated_placeholders() {
        let (_dir, warehouse) = create_test_archive().await;
        let table = TableRef::new("p", "d", "emails");
        let request = SearchRequest {
            query: Some("invoice".to_string()),
            scope: SearchScope::AllFields,
            ..Default::default()
        };
        let query = QueryBuilder::new(Dialect::Sqlite, &table).build(&request, &QueryShape::Flat);

        let rows: Vec<WarehouseRow> = warehouse.query(&query).await.unwrap().try_collect().await.unwrap();

        let ids: Vec<_> = rows.iter().map(|r| r.get("id").cloned()).collect();
        assert_eq!(ids, vec![Some(CellValue::Int(3)), Some(CellValue::Int(1))]);
        assert_eq!(
            rows[0].get("sender"),
            Some(&CellValue::Text("alice@example.com".to_string()))
        );
        assert_eq!(
            rows[0].get("date"),
            Some(&CellValue::Text("2021-03-07".to_string()))
        );
    }

    #[tokio::test]
    async fn test_malformed_query_fails() {
        let (_dir, warehouse) = create_test_archive().await;
        let table = TableRef::new("p", "d", "missing_table");
        let query = QueryBuilder::new(Dialect::Sqlite, &table)
            .build(&SearchRequest::default(), &QueryShape::Flat);

        let result: Result<Vec<WarehouseRow>, _> = match warehouse.query(&query).await {
            Ok(stream) => stream.try_collect().await,
            Err(e) => Err(e),
        };
        assert!(result.unwrap_err().to_string().contains("missing_table"));
    }
}
