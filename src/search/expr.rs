//! Predicate tree for search queries.
//!
//! Leaves reference bound parameters by position instead of embedding
//! values, so user input never reaches the query text.

use super::models::{ParamValue, QueryParameter};

/// Table a column belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Emails,
    Annotations,
}

/// Columns of the email and annotation tables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Id,
    Body,
    Subject,
    From,
    To,
    DateSent,
    Filename,
    Summary,
    Category,
}

impl Column {
    pub fn source(&self) -> Source {
        match self {
            Column::Summary | Column::Category => Source::Annotations,
            _ => Source::Emails,
        }
    }

    /// Identifier as written in query text; `From` and `To` are reserved words
    pub fn identifier(&self) -> &'static str {
        match self {
            Column::Id => "id",
            Column::Body => "Body",
            Column::Subject => "Subject",
            Column::From => "`From`",
            Column::To => "`To`",
            Column::DateSent => "Date_Sent",
            Column::Filename => "filename",
            Column::Summary => "summary",
            Column::Category => "category",
        }
    }

    /// Name of the column in result rows
    pub fn output_name(&self) -> &'static str {
        match self {
            Column::From => "sender",
            Column::To => "recipient",
            Column::DateSent => "date",
            other => other.identifier(),
        }
    }
}

/// Position of a parameter in the query's parameter list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamRef(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    /// `column >= value`
    Lower,
    /// `column <= value`
    Upper,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    /// Matches every row
    Always,
    /// Case-insensitive substring match; the parameter carries the `%..%` pattern
    KeywordMatch { column: Column, param: ParamRef },
    /// Inclusive bound on an ordered column
    RangeBound {
        column: Column,
        bound: Bound,
        param: ParamRef,
    },
    EqualityMatch { column: Column, param: ParamRef },
    Conjunction(Vec<Predicate>),
    Disjunction(Vec<Predicate>),
}

impl Predicate {
    /// AND of `predicates`, collapsing to `Always` when there are none
    pub fn all(predicates: Vec<Predicate>) -> Predicate {
        if predicates.is_empty() {
            Predicate::Always
        } else {
            Predicate::Conjunction(predicates)
        }
    }
}

/// Ordered parameter list being assembled for one query
#[derive(Debug, Default)]
pub struct ParamSet {
    params: Vec<QueryParameter>,
}

impl ParamSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a parameter and return its reference
    pub fn bind(&mut self, name: impl Into<String>, value: ParamValue) -> ParamRef {
        self.params.push(QueryParameter::new(name, value));
        ParamRef(self.params.len() - 1)
    }

    pub fn as_slice(&self) -> &[QueryParameter] {
        &self.params
    }

    pub fn into_vec(self) -> Vec<QueryParameter> {
        self.params
    }
}
