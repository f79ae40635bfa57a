//! BigQuery backend over the v2 REST API.
//!
//! Queries go through `jobs.query`; further pages (and jobs that outlive the
//! initial call) are fetched lazily with `jobs.getQueryResults` as the row
//! stream is consumed.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use futures::stream::{self, StreamExt};
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::VecDeque;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::auth::{Credentials, TokenProvider};
use super::{CellValue, Dialect, RowStream, TableRef, Warehouse, WarehouseError, WarehouseRow};
use crate::search::models::BuiltQuery;

pub const DEFAULT_API_URL: &str = "https://bigquery.googleapis.com/bigquery/v2";

/// How long each API call waits server-side for a running job
const JOB_WAIT_MS: u64 = 10_000;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    job_reference: Option<JobReference>,
    #[serde(default)]
    job_complete: bool,
    schema: Option<TableSchema>,
    #[serde(default)]
    rows: Vec<TableRow>,
    page_token: Option<String>,
    #[serde(default)]
    errors: Vec<ErrorProto>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    project_id: String,
    job_id: String,
    location: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct TableSchema {
    #[serde(default)]
    fields: Vec<FieldSchema>,
}

#[derive(Debug, Clone, Deserialize)]
struct FieldSchema {
    name: String,
    #[serde(rename = "type")]
    field_type: String,
    mode: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TableRow {
    #[serde(default)]
    f: Vec<TableCell>,
}

#[derive(Debug, Deserialize)]
struct TableCell {
    #[serde(default)]
    v: Value,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorProto,
}

#[derive(Debug, Deserialize)]
struct ErrorProto {
    #[serde(default)]
    reason: Option<String>,
    message: String,
}

/// BigQuery client bound to a billing project
pub struct BigQueryWarehouse {
    http: Client,
    api_url: Url,
    project_id: String,
    tokens: TokenProvider,
}

impl BigQueryWarehouse {
    pub fn new(
        project_id: impl Into<String>,
        credentials: Credentials,
        api_url: impl Into<String>,
    ) -> Result<Self, WarehouseError> {
        let api_url = api_url.into();
        let api_url = Url::parse(&api_url)
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or(WarehouseError::InvalidUrl(api_url))?;
        let http = Client::builder().build()?;
        let project_id = project_id.into();

        info!(
            "BigQuery client for project {} using {}",
            project_id,
            credentials.describe()
        );

        Ok(Self {
            tokens: TokenProvider::new(http.clone(), credentials),
            http,
            api_url,
            project_id,
        })
    }

    /// API URL with `segments` appended, each percent-encoded
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.api_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder, WarehouseError> {
        Ok(request.bearer_auth(self.tokens.token().await?))
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, WarehouseError> {
        let response = self.authorized(request).await?.send().await?;
        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| WarehouseError::Decode(e.to_string()));
        }

        let body = response.text().await.unwrap_or_default();
        Err(WarehouseError::Api(error_message(status, &body)))
    }

    async fn fetch_results(
        &self,
        job: &JobReference,
        page_token: Option<&str>,
    ) -> Result<QueryResponse, WarehouseError> {
        let url = self.endpoint(&["projects", &job.project_id, "queries", &job.job_id]);

        let mut params = vec![("timeoutMs", JOB_WAIT_MS.to_string())];
        if let Some(token) = page_token {
            params.push(("pageToken", token.to_string()));
        }
        if let Some(location) = &job.location {
            params.push(("location", location.clone()));
        }

        debug!("Fetching results page for job {}", job.job_id);
        self.send_json(self.http.get(url).query(&params)).await
    }
}

/// Prefer the API's own error message; fall back to status and body
fn error_message(status: StatusCode, body: &str) -> String {
    serde_json::from_str::<ErrorEnvelope>(body)
        .map(|envelope| envelope.error.message)
        .unwrap_or_else(|_| format!("BigQuery returned {}: {}", status, body))
}

fn request_body(query: &BuiltQuery) -> Value {
    let parameters: Vec<Value> = query
        .params()
        .iter()
        .map(|p| {
            json!({
                "name": p.name,
                "parameterType": { "type": p.param_type().as_str() },
                "parameterValue": { "value": p.value.to_wire_string() },
            })
        })
        .collect();

    json!({
        "query": query.sql(),
        "useLegacySql": false,
        "parameterMode": "NAMED",
        "queryParameters": parameters,
        "timeoutMs": JOB_WAIT_MS,
        "requestId": Uuid::new_v4().to_string(),
    })
}

/// Convert a raw `v` value according to its column type
fn decode_cell(field: &FieldSchema, raw: &Value) -> Result<CellValue, WarehouseError> {
    let text = match raw {
        Value::Null => return Ok(CellValue::Null),
        Value::String(s) => s.as_str(),
        // Repeated and nested columns arrive as JSON structures
        other => return Ok(CellValue::Text(other.to_string())),
    };

    if field.mode.as_deref() == Some("REPEATED") {
        return Ok(CellValue::Text(text.to_string()));
    }

    let invalid = || {
        WarehouseError::Decode(format!(
            "column {} holds invalid {} value {:?}",
            field.name, field.field_type, text
        ))
    };

    let cell = match field.field_type.as_str() {
        "INTEGER" | "INT64" => CellValue::Int(text.parse().map_err(|_| invalid())?),
        "FLOAT" | "FLOAT64" => CellValue::Float(text.parse().map_err(|_| invalid())?),
        "BOOLEAN" | "BOOL" => CellValue::Bool(text.eq_ignore_ascii_case("true")),
        "DATE" => CellValue::Date(NaiveDate::parse_from_str(text, "%Y-%m-%d").map_err(|_| invalid())?),
        "DATETIME" => CellValue::DateTime(
            NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f").map_err(|_| invalid())?,
        ),
        "TIMESTAMP" => {
            // Seconds since the epoch, possibly in exponent notation
            let seconds: f64 = text.parse().map_err(|_| invalid())?;
            let micros = (seconds * 1_000_000.0).round() as i64;
            CellValue::Timestamp(DateTime::from_timestamp_micros(micros).ok_or_else(invalid)?)
        }
        _ => CellValue::Text(text.to_string()),
    };
    Ok(cell)
}

/// Paging state behind a result stream
struct PageCursor<'a> {
    warehouse: &'a BigQueryWarehouse,
    job: Option<JobReference>,
    fields: Vec<FieldSchema>,
    buffer: VecDeque<WarehouseRow>,
    page_token: Option<String>,
    complete: bool,
}

impl<'a> PageCursor<'a> {
    fn new(warehouse: &'a BigQueryWarehouse) -> Self {
        Self {
            warehouse,
            job: None,
            fields: Vec::new(),
            buffer: VecDeque::new(),
            page_token: None,
            complete: false,
        }
    }

    fn absorb(&mut self, response: QueryResponse) -> Result<(), WarehouseError> {
        // `errors` also carries warnings; it is only fatal for a finished job
        // that produced no result schema
        let failed = response.job_complete && response.schema.is_none() && self.fields.is_empty();
        if failed {
            if let Some(error) = response.errors.into_iter().next() {
                return Err(WarehouseError::Api(error.message));
            }
        } else {
            for error in &response.errors {
                warn!(
                    "BigQuery reported {}: {}",
                    error.reason.as_deref().unwrap_or("a problem"),
                    error.message
                );
            }
        }

        if let Some(job) = response.job_reference {
            self.job = Some(job);
        }
        if let Some(schema) = response.schema {
            self.fields = schema.fields;
        }
        self.complete = response.job_complete;
        self.page_token = response.page_token;

        for row in response.rows {
            if row.f.len() != self.fields.len() {
                return Err(WarehouseError::Decode(format!(
                    "row has {} cells but schema has {} fields",
                    row.f.len(),
                    self.fields.len()
                )));
            }
            let mut decoded = WarehouseRow::new();
            for (field, cell) in self.fields.iter().zip(row.f.iter()) {
                decoded.insert(field.name.clone(), decode_cell(field, &cell.v)?);
            }
            self.buffer.push_back(decoded);
        }
        Ok(())
    }

    async fn next_row(&mut self) -> Result<Option<WarehouseRow>, WarehouseError> {
        loop {
            if let Some(row) = self.buffer.pop_front() {
                return Ok(Some(row));
            }
            if self.complete && self.page_token.is_none() {
                return Ok(None);
            }

            let job = self.job.clone().ok_or_else(|| {
                WarehouseError::Decode("query response carried no job reference".to_string())
            })?;
            let page = self
                .warehouse
                .fetch_results(&job, self.page_token.as_deref())
                .await?;
            self.absorb(page)?;
        }
    }
}

#[async_trait]
impl Warehouse for BigQueryWarehouse {
    fn dialect(&self) -> Dialect {
        Dialect::BigQuery
    }

    async fn table_exists(&self, table: &TableRef) -> Result<bool, WarehouseError> {
        let url = self.endpoint(&[
            "projects",
            &table.project,
            "datasets",
            &table.dataset,
            "tables",
            &table.table,
        ]);

        let response = self
            .authorized(self.http.get(url).query(&[("fields", "id")]))
            .await?
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(WarehouseError::Api(error_message(status, &body)))
            }
        }
    }

    async fn query<'a>(&'a self, query: &'a BuiltQuery) -> Result<RowStream<'a>, WarehouseError> {
        let url = self.endpoint(&["projects", &self.project_id, "queries"]);
        let response: QueryResponse = self
            .send_json(self.http.post(url).json(&request_body(query)))
            .await?;

        let mut cursor = PageCursor::new(self);
        cursor.absorb(response)?;

        Ok(stream::try_unfold(cursor, |mut cursor| async move {
            let row = cursor.next_row().await?;
            Ok::<_, WarehouseError>(row.map(|row| (row, cursor)))
        })
        .boxed())
    }
}
