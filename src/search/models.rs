use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Default number of rows returned when the request does not set a limit
pub const DEFAULT_LIMIT: i64 = 100;

/// Which email fields keyword search looks at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchScope {
    Subject,
    Body,
    #[default]
    AllFields,
}

impl SearchScope {
    /// Parse the wire value (`"Subject"`, `"Body"`, `"All fields"`)
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Subject" => Some(Self::Subject),
            "Body" => Some(Self::Body),
            "All fields" => Some(Self::AllFields),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Subject => "Subject",
            Self::Body => "Body",
            Self::AllFields => "All fields",
        }
    }
}

/// A request field that failed validation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Search request body as received over HTTP, before validation
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchPayload {
    pub query: Option<String>,
    pub limit: Option<i64>,
    pub search_type: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub sender_filter: Option<String>,
    pub recipient_filter: Option<String>,
    pub show_summaries: Option<bool>,
    pub category_filter: Option<String>,
}

impl SearchPayload {
    /// Check field shapes and produce a typed request
    pub fn validate(self) -> Result<SearchRequest, ValidationError> {
        let limit = self.limit.unwrap_or(DEFAULT_LIMIT);
        if limit <= 0 {
            return Err(ValidationError::new("limit", "must be a positive integer"));
        }

        let scope = match self.search_type.as_deref() {
            None => SearchScope::default(),
            Some(raw) => SearchScope::parse(raw).ok_or_else(|| {
                ValidationError::new(
                    "search_type",
                    format!("expected one of Subject, Body, All fields; got {:?}", raw),
                )
            })?,
        };

        Ok(SearchRequest {
            query: non_blank(self.query),
            limit,
            scope,
            date_from: parse_date("date_from", self.date_from)?,
            date_to: parse_date("date_to", self.date_to)?,
            sender_filter: non_blank(self.sender_filter),
            recipient_filter: non_blank(self.recipient_filter),
            category_filter: non_blank(self.category_filter),
            show_summaries: self.show_summaries.unwrap_or(false),
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_date(field: &'static str, value: Option<String>) -> Result<Option<NaiveDate>, ValidationError> {
    match non_blank(value) {
        None => Ok(None),
        Some(raw) => NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
            .map(Some)
            .map_err(|_| ValidationError::new(field, format!("expected YYYY-MM-DD, got {:?}", raw))),
    }
}

/// Validated search request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub query: Option<String>,
    pub limit: i64,
    pub scope: SearchScope,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub sender_filter: Option<String>,
    pub recipient_filter: Option<String>,
    pub category_filter: Option<String>,
    /// Display hint for the client; never changes the query
    pub show_summaries: bool,
}

impl Default for SearchRequest {
    fn default() -> Self {
        Self {
            query: None,
            limit: DEFAULT_LIMIT,
            scope: SearchScope::default(),
            date_from: None,
            date_to: None,
            sender_filter: None,
            recipient_filter: None,
            category_filter: None,
            show_summaries: false,
        }
    }
}

impl SearchRequest {
    /// Whitespace-separated keywords of the free-text query
    pub fn keywords(&self) -> Vec<&str> {
        self.query
            .as_deref()
            .map(|q| q.split_whitespace().collect())
            .unwrap_or_default()
    }
}

/// Declared type of a bound parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    Date,
    Int64,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "STRING",
            Self::Date => "DATE",
            Self::Int64 => "INT64",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    String(String),
    Date(NaiveDate),
    Int64(i64),
}

impl ParamValue {
    pub fn param_type(&self) -> ParamType {
        match self {
            Self::String(_) => ParamType::String,
            Self::Date(_) => ParamType::Date,
            Self::Int64(_) => ParamType::Int64,
        }
    }

    /// Canonical text form used on the wire
    pub fn to_wire_string(&self) -> String {
        match self {
            Self::String(s) => s.clone(),
            Self::Date(d) => d.format("%Y-%m-%d").to_string(),
            Self::Int64(i) => i.to_string(),
        }
    }
}

/// A named, typed value bound into a query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryParameter {
    pub name: String,
    pub value: ParamValue,
}

impl QueryParameter {
    pub fn new(name: impl Into<String>, value: ParamValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    pub fn param_type(&self) -> ParamType {
        self.value.param_type()
    }
}

/// Whether a query references the annotation table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinMode {
    Joined,
    Flat,
}

/// Finalized query text with its ordered parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltQuery {
    sql: String,
    params: Vec<QueryParameter>,
    join_mode: JoinMode,
}

impl BuiltQuery {
    pub(crate) fn new(sql: String, params: Vec<QueryParameter>, join_mode: JoinMode) -> Self {
        Self {
            sql,
            params,
            join_mode,
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[QueryParameter] {
        &self.params
    }

    #[cfg(test)]
    pub fn param(&self, name: &str) -> Option<&QueryParameter> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn join_mode(&self) -> JoinMode {
        self.join_mode
    }
}

/// One search hit as returned to API clients.
///
/// Field names are part of the public JSON contract. `summary` and `category`
/// are omitted entirely for flat queries and present (possibly `null`) for
/// joined ones.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmailRecord {
    pub id: Value,
    #[serde(rename = "Body")]
    pub body: Option<String>,
    #[serde(rename = "Subject")]
    pub subject: Option<String>,
    pub sender: Option<String>,
    pub recipient: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<Option<String>>,
}
