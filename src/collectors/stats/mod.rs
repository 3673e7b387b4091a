use crate::collectors::{CollectContext, MetricList, Processor, Publisher};
use crate::devops::BuildFilter;
use crate::devops::models::Project;
use crate::labels;
use anyhow::Result;
use chrono::{TimeDelta, Utc};
use futures::future::BoxFuture;
use prometheus::{CounterVec, HistogramOpts, HistogramVec, Opts, Registry};
use tracing::instrument;

const BUILD_SECONDS_BUCKETS: &[f64] = &[
    10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 900.0, 1800.0, 3600.0, 7200.0,
];

/// Cumulative build statistics over the builds finished since the previous
/// pass. Opt-in: every pass only adds, nothing is reset.
#[derive(Clone)]
pub struct StatsCollector {
    project_builds: CounterVec,
    project_builds_wait: HistogramVec,
    project_builds_duration: HistogramVec,
    project_success: HistogramVec,
    agentpool_builds: CounterVec,
    agentpool_builds_wait: HistogramVec,
    agentpool_builds_duration: HistogramVec,
}

impl StatsCollector {
    #[must_use]
    #[allow(clippy::expect_used)]
    ///
    /// # Panics
    ///
    /// Panics if metric creation fails.
    pub fn new() -> Self {
        let project = ["projectID", "buildDefinitionID", "result"];
        let pool = ["agentPoolID", "projectID", "result"];
        let summary = |name: &str, help: &str, labels: &[&str], buckets: &[f64]| {
            HistogramVec::new(
                HistogramOpts::new(name, help).buckets(buckets.to_vec()),
                labels,
            )
            .expect("valid stats metric")
        };
        let counter = |name: &str, help: &str, labels: &[&str]| {
            CounterVec::new(Opts::new(name, help), labels).expect("valid stats metric")
        };

        Self {
            project_builds: counter(
                "azure_devops_stats_project_builds",
                "Finished builds per project and definition",
                &project,
            ),
            project_builds_wait: summary(
                "azure_devops_stats_project_builds_wait",
                "Queue wait of finished builds in seconds",
                &project,
                BUILD_SECONDS_BUCKETS,
            ),
            project_builds_duration: summary(
                "azure_devops_stats_project_builds_duration",
                "Job duration of finished builds in seconds",
                &project,
                BUILD_SECONDS_BUCKETS,
            ),
            project_success: summary(
                "azure_devops_stats_project_success",
                "Success of finished builds (1 succeeded, 0 otherwise)",
                &["projectID", "buildDefinitionID"],
                &[0.5, 1.0],
            ),
            agentpool_builds: counter(
                "azure_devops_stats_agentpool_builds",
                "Finished builds per agent pool",
                &pool,
            ),
            agentpool_builds_wait: summary(
                "azure_devops_stats_agentpool_builds_wait",
                "Queue wait of finished builds per agent pool in seconds",
                &pool,
                BUILD_SECONDS_BUCKETS,
            ),
            agentpool_builds_duration: summary(
                "azure_devops_stats_agentpool_builds_duration",
                "Job duration of finished builds per agent pool in seconds",
                &pool,
                BUILD_SECONDS_BUCKETS,
            ),
        }
    }
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(clippy::cast_precision_loss)]
fn seconds(delta: TimeDelta) -> f64 {
    delta.num_milliseconds() as f64 / 1000.0
}

impl Processor for StatsCollector {
    type Unit = Project;

    fn name(&self) -> &'static str {
        "stats"
    }

    #[instrument(skip(self, registry), level = "info", err, fields(collector = "stats"))]
    fn register_metrics(&self, registry: &Registry) -> Result<()> {
        registry.register(Box::new(self.project_builds.clone()))?;
        registry.register(Box::new(self.project_builds_wait.clone()))?;
        registry.register(Box::new(self.project_builds_duration.clone()))?;
        registry.register(Box::new(self.project_success.clone()))?;
        registry.register(Box::new(self.agentpool_builds.clone()))?;
        registry.register(Box::new(self.agentpool_builds_wait.clone()))?;
        registry.register(Box::new(self.agentpool_builds_duration.clone()))?;
        Ok(())
    }

    // Counters and summaries only.
    fn reset(&self) {}

    #[instrument(skip_all, level = "info", err, fields(collector = "stats", otel.kind = "internal"))]
    fn collect<'a>(
        &'a self,
        ctx: &'a CollectContext,
        project: &'a Project,
        publisher: &'a Publisher,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let window = TimeDelta::from_std(ctx.runner.interval).unwrap_or(TimeDelta::MAX);
            let filter = BuildFilter {
                min_time: Utc::now().checked_sub_signed(window),
                finished_only: true,
            };
            let builds = ctx.api.list_builds(&project.id, &filter).await?;

            let mut project_builds = MetricList::new();
            let mut project_wait = MetricList::new();
            let mut project_duration = MetricList::new();
            let mut project_success = MetricList::new();
            let mut pool_builds = MetricList::new();
            let mut pool_wait = MetricList::new();
            let mut pool_duration = MetricList::new();

            for build in builds.iter().filter(|b| b.finish_time.is_some()) {
                let by_definition = labels!(
                    "projectID" => project.id,
                    "buildDefinitionID" => build.definition.id,
                    "result" => build.result,
                );
                let by_pool = labels!(
                    "agentPoolID" => build.queue.pool.id,
                    "projectID" => project.id,
                    "result" => build.result,
                );

                project_builds.add(by_definition.clone(), 1.0);
                pool_builds.add(by_pool.clone(), 1.0);

                if let Some(wait) = build.wait_duration() {
                    project_wait.add(by_definition.clone(), seconds(wait));
                    pool_wait.add(by_pool.clone(), seconds(wait));
                }
                if let Some(duration) = build.job_duration() {
                    project_duration.add(by_definition, seconds(duration));
                    pool_duration.add(by_pool, seconds(duration));
                }

                project_success.add_bool(
                    labels!(
                        "projectID" => project.id,
                        "buildDefinitionID" => build.definition.id,
                    ),
                    build.result == "succeeded",
                );
            }

            publisher.counter(project_builds, &self.project_builds);
            publisher.summary(project_wait, &self.project_builds_wait);
            publisher.summary(project_duration, &self.project_builds_duration);
            publisher.summary(project_success, &self.project_success);
            publisher.counter(pool_builds, &self.agentpool_builds);
            publisher.summary(pool_wait, &self.agentpool_builds_wait);
            publisher.summary(pool_duration, &self.agentpool_builds_duration);
            Ok(())
        })
    }

    fn enabled_by_default(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::testing::{context, observations, publish_unit, registry_for, value};
    use crate::devops::mock::MockApi;
    use crate::devops::models::{Build, DefinitionRef, PoolRef, QueueRef};
    use chrono::DateTime;
    use std::sync::Arc;

    fn build(id: i64, result: &str) -> Build {
        Build {
            id,
            result: result.to_string(),
            definition: DefinitionRef {
                id: 10,
                ..DefinitionRef::default()
            },
            queue: QueueRef {
                pool: PoolRef {
                    id: 4,
                    ..PoolRef::default()
                },
                ..QueueRef::default()
            },
            queue_time: DateTime::from_timestamp(1_700_000_000, 0),
            start_time: DateTime::from_timestamp(1_700_000_010, 0),
            finish_time: DateTime::from_timestamp(1_700_000_070, 0),
            ..Build::default()
        }
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn test_stats_accumulate_and_survive_reset() {
        let mut api = MockApi::new();
        api.builds.insert(
            "p1".to_string(),
            vec![build(1, "succeeded"), build(2, "succeeded"), build(3, "failed")],
        );
        let ctx = context(Arc::new(api));
        let collector = StatsCollector::new();
        let registry = registry_for(&collector);
        let project = Project {
            id: "p1".to_string(),
            ..Project::default()
        };

        publish_unit(&collector, &ctx, &project).await.unwrap();
        let first = value(
            &registry,
            "azure_devops_stats_project_builds",
            &[("result", "succeeded")],
        )
        .unwrap();
        publish_unit(&collector, &ctx, &project).await.unwrap();
        let second = value(
            &registry,
            "azure_devops_stats_project_builds",
            &[("result", "succeeded")],
        )
        .unwrap();

        assert!((first - 2.0).abs() < f64::EPSILON);
        assert!((second - 4.0).abs() < f64::EPSILON);
        assert_eq!(
            value(&registry, "azure_devops_stats_agentpool_builds", &[("agentPoolID", "4"), ("result", "failed")]),
            Some(2.0)
        );
        assert_eq!(
            observations(&registry, "azure_devops_stats_project_builds_duration", &[("result", "succeeded")]),
            4
        );
        assert_eq!(
            observations(&registry, "azure_devops_stats_project_success", &[("projectID", "p1")]),
            6
        );
    }

    #[test]
    fn test_opt_in() {
        assert!(!StatsCollector::new().enabled_by_default());
    }
}
