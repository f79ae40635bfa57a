//! Serializes predicate trees and select statements into query text.

use super::expr::{Bound, Column, ParamRef, Predicate, Source};
use super::models::QueryParameter;
use crate::warehouse::{Dialect, TableRef};

const EMAIL_ALIAS: &str = "e";
const ANNOTATION_ALIAS: &str = "s";

/// Columns returned by every search, in output order
const EMAIL_PROJECTION: [Column; 7] = [
    Column::Id,
    Column::Body,
    Column::Subject,
    Column::From,
    Column::To,
    Column::DateSent,
    Column::Filename,
];

const ANNOTATION_PROJECTION: [Column; 2] = [Column::Summary, Column::Category];

/// Search statement ready to be rendered
pub struct SelectStatement<'a> {
    pub emails: &'a TableRef,
    /// Annotation table to LEFT JOIN, if any
    pub annotations: Option<&'a TableRef>,
    pub filter: &'a Predicate,
    pub limit: ParamRef,
}

pub struct Renderer<'a> {
    dialect: Dialect,
    params: &'a [QueryParameter],
    joined: bool,
}

impl<'a> Renderer<'a> {
    pub fn new(dialect: Dialect, params: &'a [QueryParameter], joined: bool) -> Self {
        Self {
            dialect,
            params,
            joined,
        }
    }

    pub fn table(&self, table: &TableRef) -> String {
        match self.dialect {
            Dialect::BigQuery => format!("`{}`", table.qualified()),
            Dialect::Sqlite => format!("`{}`", table.table),
        }
    }

    pub fn placeholder(&self, param: ParamRef) -> String {
        match self.dialect {
            Dialect::BigQuery => format!("@{}", self.params[param.0].name),
            Dialect::Sqlite => format!("?{}", param.0 + 1),
        }
    }

    pub fn column(&self, column: Column) -> String {
        if !self.joined {
            return column.identifier().to_string();
        }
        let alias = match column.source() {
            Source::Emails => EMAIL_ALIAS,
            Source::Annotations => ANNOTATION_ALIAS,
        };
        format!("{}.{}", alias, column.identifier())
    }

    fn projected(&self, column: Column) -> String {
        let expr = self.column(column);
        if expr == column.output_name() {
            expr
        } else {
            format!("{} AS {}", expr, column.output_name())
        }
    }

    pub fn predicate(&self, predicate: &Predicate) -> String {
        match predicate {
            Predicate::Always => "1=1".to_string(),
            Predicate::KeywordMatch { column, param } => format!(
                "LOWER({}) LIKE LOWER({})",
                self.column(*column),
                self.placeholder(*param)
            ),
            Predicate::RangeBound {
                column,
                bound,
                param,
            } => {
                let op = match bound {
                    Bound::Lower => ">=",
                    Bound::Upper => "<=",
                };
                format!("{} {} {}", self.column(*column), op, self.placeholder(*param))
            }
            Predicate::EqualityMatch { column, param } => {
                format!("{} = {}", self.column(*column), self.placeholder(*param))
            }
            Predicate::Conjunction(children) => match children.as_slice() {
                [] => "1=1".to_string(),
                [only] => self.predicate(only),
                _ => children
                    .iter()
                    .map(|child| self.nested(child))
                    .collect::<Vec<_>>()
                    .join(" AND "),
            },
            Predicate::Disjunction(children) => format!(
                "({})",
                children
                    .iter()
                    .map(|child| self.nested(child))
                    .collect::<Vec<_>>()
                    .join(" OR ")
            ),
        }
    }

    /// Child of a boolean group; conjunctions need their own parentheses
    fn nested(&self, predicate: &Predicate) -> String {
        match predicate {
            Predicate::Conjunction(children) if children.len() > 1 => {
                format!("({})", self.predicate(predicate))
            }
            _ => self.predicate(predicate),
        }
    }

    pub fn select(&self, statement: &SelectStatement<'_>) -> String {
        let mut columns: Vec<String> = EMAIL_PROJECTION
            .iter()
            .map(|c| self.projected(*c))
            .collect();

        let mut from = self.table(statement.emails);
        if let Some(annotations) = statement.annotations {
            columns.extend(ANNOTATION_PROJECTION.iter().map(|c| self.projected(*c)));
            from = format!(
                "{} {}\nLEFT JOIN {} {}\nON {} = {}.{}",
                from,
                EMAIL_ALIAS,
                self.table(annotations),
                ANNOTATION_ALIAS,
                self.column(Column::Id),
                ANNOTATION_ALIAS,
                Column::Id.identifier(),
            );
        }

        format!(
            "SELECT\n    {}\nFROM {}\nWHERE {}\nORDER BY {} DESC\nLIMIT {}",
            columns.join(",\n    "),
            from,
            self.predicate(statement.filter),
            self.column(Column::DateSent),
            self.placeholder(statement.limit),
        )
    }

    /// Distinct non-null categories of the annotation table
    pub fn categories(&self, annotations: &TableRef) -> String {
        format!(
            "SELECT DISTINCT category FROM {} WHERE category IS NOT NULL ORDER BY category",
            self.table(annotations)
        )
    }
}
