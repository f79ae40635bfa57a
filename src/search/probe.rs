use tracing::{debug, warn};

use super::models::JoinMode;
use crate::warehouse::{TableRef, Warehouse};

/// Query shape chosen for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryShape {
    /// Annotation table is reachable and gets LEFT JOINed
    Joined(TableRef),
    /// Email table only
    Flat,
}

impl QueryShape {
    pub fn join_mode(&self) -> JoinMode {
        match self {
            QueryShape::Joined(_) => JoinMode::Joined,
            QueryShape::Flat => JoinMode::Flat,
        }
    }

    pub fn annotations(&self) -> Option<&TableRef> {
        match self {
            QueryShape::Joined(table) => Some(table),
            QueryShape::Flat => None,
        }
    }
}

/// Checks whether the annotation table can be joined.
///
/// Runs once per search and never caches. Every failure degrades to
/// [`QueryShape::Flat`].
pub struct SchemaProbe<'w> {
    warehouse: &'w dyn Warehouse,
}

impl<'w> SchemaProbe<'w> {
    pub fn new(warehouse: &'w dyn Warehouse) -> Self {
        Self { warehouse }
    }

    pub async fn probe(&self, annotations: Option<&TableRef>) -> QueryShape {
        let Some(table) = annotations else {
            debug!("No annotation table configured, using flat query shape");
            return QueryShape::Flat;
        };

        match self.warehouse.table_exists(table).await {
            Ok(true) => QueryShape::Joined(table.clone()),
            Ok(false) => {
                debug!("Annotation table {} not found", table.qualified());
                QueryShape::Flat
            }
            Err(e) => {
                warn!(
                    "Annotation table probe for {} failed, continuing without it: {}",
                    table.qualified(),
                    e
                );
                QueryShape::Flat
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::models::BuiltQuery;
    use crate::warehouse::{Dialect, RowStream, WarehouseError};
    use async_trait::async_trait;

    /// Warehouse stub whose metadata lookup returns a fixed answer
    struct StubWarehouse {
        exists: Result<bool, &'static str>,
    }

    #[async_trait]
    impl Warehouse for StubWarehouse {
        fn dialect(&self) -> Dialect {
            Dialect::BigQuery
        }

        async fn table_exists(&self, _table: &TableRef) -> Result<bool, WarehouseError> {
            self.exists.map_err(|e| WarehouseError::Api(e.to_string()))
        }

        async fn query<'a>(
            &'a self,
            _query: &'a BuiltQuery,
        ) -> Result<RowStream<'a>, WarehouseError> {
            Err(WarehouseError::Api("not used".to_string()))
        }
    }

    fn summaries() -> TableRef {
        TableRef::new("proj", "mail", "summaries")
    }

    #[tokio::test]
    async fn test_probe_joined_when_table_exists() {
        let warehouse = StubWarehouse { exists: Ok(true) };
        let shape = SchemaProbe::new(&warehouse).probe(Some(&summaries())).await;
        assert_eq!(shape, QueryShape::Joined(summaries()));
        assert_eq!(shape.join_mode(), JoinMode::Joined);
    }

    #[tokio::test]
    async fn test_probe_flat_when_table_missing() {
        let warehouse = StubWarehouse { exists: Ok(false) };
        let shape = SchemaProbe::new(&warehouse).probe(Some(&summaries())).await;
        assert_eq!(shape, QueryShape::Flat);
    }

    #[tokio::test]
    async fn test_probe_swallows_errors() {
        let warehouse = StubWarehouse {
            exists: Err("403 Access Denied"),
        };
        let shape = SchemaProbe::new(&warehouse).probe(Some(&summaries())).await;
        assert_eq!(shape, QueryShape::Flat);
    }

    #[tokio::test]
    async fn test_probe_flat_when_unconfigured() {
        let warehouse = StubWarehouse { exists: Ok(true) };
        let shape = SchemaProbe::new(&warehouse).probe(None).await;
        assert_eq!(shape, QueryShape::Flat);
        assert!(shape.annotations().is_none());
    }
}
