use crate::collectors::{CollectContext, FanOutUnit, MetricList, Processor, Publisher, QueryRef};
use crate::labels;
use anyhow::Result;
use futures::future::BoxFuture;
use prometheus::{GaugeVec, Opts, Registry};
use tracing::{debug, instrument};

/// Result size of the configured saved work item queries.
#[derive(Clone)]
pub struct QueryCollector {
    query_result: GaugeVec,
}

impl QueryCollector {
    #[must_use]
    #[allow(clippy::expect_used)]
    ///
    /// # Panics
    ///
    /// Panics if metric creation fails.
    pub fn new() -> Self {
        Self {
            query_result: GaugeVec::new(
                Opts::new(
                    "azure_devops_query_result",
                    "Number of work items returned by a saved query",
                ),
                &["projectID", "queryID"],
            )
            .expect("azure_devops_query_result"),
        }
    }
}

impl Default for QueryCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for QueryCollector {
    type Unit = QueryRef;

    fn name(&self) -> &'static str {
        "query"
    }

    #[instrument(skip(self, registry), level = "info", err, fields(collector = "query"))]
    fn register_metrics(&self, registry: &Registry) -> Result<()> {
        registry.register(Box::new(self.query_result.clone()))?;
        Ok(())
    }

    fn reset(&self) {
        self.query_result.reset();
    }

    #[instrument(skip_all, level = "info", err, fields(collector = "query", otel.kind = "internal"))]
    fn collect<'a>(
        &'a self,
        ctx: &'a CollectContext,
        query: &'a QueryRef,
        publisher: &'a Publisher,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let result = ctx.api.run_query(&query.project_id, &query.query_id).await?;
            let count = result.result_count();
            debug!(query = %query.describe(), count, "ran saved query");

            let mut list = MetricList::new();
            #[allow(clippy::cast_precision_loss)]
            list.add(
                labels!("projectID" => query.project_id, "queryID" => query.query_id),
                count as f64,
            );
            publisher.gauge(list, &self.query_result);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::testing::{context, publish_unit, registry_for, value};
    use crate::devops::mock::MockApi;
    use crate::devops::models::{WiqlResult, WorkItemLink, WorkItemRef};
    use std::sync::Arc;

    fn query(query_id: &str) -> QueryRef {
        QueryRef {
            query_id: query_id.to_string(),
            project_id: "p1".to_string(),
        }
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn test_flat_and_tree_results() {
        let mut api = MockApi::new();
        api.queries.insert(
            "flat".to_string(),
            WiqlResult {
                query_type: "flat".to_string(),
                work_items: vec![WorkItemRef::default(), WorkItemRef::default(), WorkItemRef::default()],
                ..WiqlResult::default()
            },
        );
        api.queries.insert(
            "tree".to_string(),
            WiqlResult {
                query_type: "tree".to_string(),
                work_item_relations: vec![
                    WorkItemLink {
                        target: Some(WorkItemRef::default()),
                    },
                    WorkItemLink { target: None },
                ],
                ..WiqlResult::default()
            },
        );
        let ctx = context(Arc::new(api));
        let collector = QueryCollector::new();
        let registry = registry_for(&collector);

        publish_unit(&collector, &ctx, &query("flat")).await.unwrap();
        assert_eq!(
            value(&registry, "azure_devops_query_result", &[("queryID", "flat")]),
            Some(3.0)
        );

        publish_unit(&collector, &ctx, &query("tree")).await.unwrap();
        assert_eq!(
            value(&registry, "azure_devops_query_result", &[("queryID", "tree")]),
            Some(1.0)
        );
    }

    #[tokio::test]
    async fn test_failing_query_propagates() {
        let mut api = MockApi::new();
        api.failing.insert("p1".to_string());
        let ctx = context(Arc::new(api));
        let collector = QueryCollector::new();

        assert!(publish_unit(&collector, &ctx, &query("flat")).await.is_err());
    }
}
