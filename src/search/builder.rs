use super::expr::{Bound, Column, ParamSet, Predicate};
use super::models::{BuiltQuery, JoinMode, ParamValue, SearchRequest, SearchScope};
use super::probe::QueryShape;
use super::render::{Renderer, SelectStatement};
use crate::warehouse::{Dialect, TableRef};

/// Turns validated search requests into parameterized queries.
///
/// Building is pure: the same request and shape always give the same query
/// text and the same parameter list. Parameter names are positional
/// (`keyword_0`, `keyword_1`, ...) followed by fixed names for filters.
pub struct QueryBuilder<'a> {
    dialect: Dialect,
    emails: &'a TableRef,
}

impl<'a> QueryBuilder<'a> {
    pub fn new(dialect: Dialect, emails: &'a TableRef) -> Self {
        Self { dialect, emails }
    }

    pub fn build(&self, request: &SearchRequest, shape: &QueryShape) -> BuiltQuery {
        let mut params = ParamSet::new();
        let filter = Self::filter(request, shape, &mut params);
        let limit = params.bind("limit", ParamValue::Int64(request.limit));

        let annotations = shape.annotations();
        let sql = Renderer::new(self.dialect, params.as_slice(), annotations.is_some()).select(
            &SelectStatement {
                emails: self.emails,
                annotations,
                filter: &filter,
                limit,
            },
        );

        BuiltQuery::new(sql, params.into_vec(), shape.join_mode())
    }

    /// Predicate tree for a request; `Always` when nothing filters
    pub fn filter(request: &SearchRequest, shape: &QueryShape, params: &mut ParamSet) -> Predicate {
        let mut groups = Vec::new();

        let fields = scope_columns(request.scope);
        for (i, keyword) in request.keywords().into_iter().enumerate() {
            let param = params.bind(
                format!("keyword_{}", i),
                ParamValue::String(format!("%{}%", keyword)),
            );
            groups.push(Predicate::Disjunction(
                fields
                    .iter()
                    .map(|column| Predicate::KeywordMatch {
                        column: *column,
                        param,
                    })
                    .collect(),
            ));
        }

        if let Some(sender) = &request.sender_filter {
            let param = params.bind("sender", ParamValue::String(format!("%{}%", sender)));
            groups.push(Predicate::KeywordMatch {
                column: Column::From,
                param,
            });
        }

        if let Some(recipient) = &request.recipient_filter {
            let param = params.bind("recipient", ParamValue::String(format!("%{}%", recipient)));
            groups.push(Predicate::KeywordMatch {
                column: Column::To,
                param,
            });
        }

        if let Some(from) = request.date_from {
            let param = params.bind("date_from", ParamValue::Date(from));
            groups.push(Predicate::RangeBound {
                column: Column::DateSent,
                bound: Bound::Lower,
                param,
            });
        }

        if let Some(to) = request.date_to {
            let param = params.bind("date_to", ParamValue::Date(to));
            groups.push(Predicate::RangeBound {
                column: Column::DateSent,
                bound: Bound::Upper,
                param,
            });
        }

        // The category column only exists in the joined shape
        if let Some(category) = &request.category_filter {
            if shape.join_mode() == JoinMode::Joined {
                let param = params.bind("category", ParamValue::String(category.clone()));
                groups.push(Predicate::EqualityMatch {
                    column: Column::Category,
                    param,
                });
            }
        }

        Predicate::all(groups)
    }

    /// Distinct category labels of the annotation table
    pub fn categories(&self, annotations: &TableRef) -> BuiltQuery {
        let sql = Renderer::new(self.dialect, &[], false).categories(annotations);
        BuiltQuery::new(sql, Vec::new(), JoinMode::Flat)
    }
}

fn scope_columns(scope: SearchScope) -> &'static [Column] {
    match scope {
        SearchScope::Subject => &[Column::Subject],
        SearchScope::Body => &[Column::Body],
        SearchScope::AllFields => &[Column::Subject, Column::Body],
    }
}
