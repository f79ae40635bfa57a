pub mod builder;
pub mod executor;
pub mod expr;
pub mod models;
pub mod probe;
pub mod render;

use futures::{future, TryStreamExt};
use tracing::{info, warn};

use crate::warehouse::{SharedWarehouse, TableRef, WarehouseError};
use builder::QueryBuilder;
use executor::SearchExecutor;
use models::{EmailRecord, SearchRequest};
use probe::SchemaProbe;

/// The email archive: a warehouse plus the tables searched in it
#[derive(Clone)]
pub struct Archive {
    warehouse: SharedWarehouse,
    emails: TableRef,
    annotations: Option<TableRef>,
}

impl Archive {
    pub fn new(warehouse: SharedWarehouse, emails: TableRef, annotations: Option<TableRef>) -> Self {
        Self {
            warehouse,
            emails,
            annotations,
        }
    }

    /// Probe, build and execute one search
    pub async fn search(&self, request: &SearchRequest) -> Result<Vec<EmailRecord>, WarehouseError> {
        let warehouse = self.warehouse.as_ref();

        let shape = SchemaProbe::new(warehouse)
            .probe(self.annotations.as_ref())
            .await;
        let query = QueryBuilder::new(warehouse.dialect(), &self.emails).build(request, &shape);

        let records = SearchExecutor::new(warehouse).collect(&query).await?;

        info!(
            "Search returned {} result(s) (join mode {:?}, scope {}, limit {})",
            records.len(),
            query.join_mode(),
            request.scope.as_str(),
            request.limit
        );
        Ok(records)
    }

    /// Distinct annotation categories; empty on any failure
    pub async fn categories(&self) -> Vec<String> {
        let Some(annotations) = &self.annotations else {
            return Vec::new();
        };

        match self.fetch_categories(annotations).await {
            Ok(categories) => categories,
            Err(e) => {
                warn!("Error fetching categories: {}", e);
                Vec::new()
            }
        }
    }

    async fn fetch_categories(&self, annotations: &TableRef) -> Result<Vec<String>, WarehouseError> {
        let warehouse = self.warehouse.as_ref();
        let query = QueryBuilder::new(warehouse.dialect(), &self.emails).categories(annotations);

        let categories = warehouse
            .query(&query)
            .await?
            .try_filter_map(|row| {
                future::ready(Ok::<_, WarehouseError>(
                    row.get("category").and_then(|c| c.as_text()),
                ))
            })
            .try_collect()
            .await;
        categories
    }
}
