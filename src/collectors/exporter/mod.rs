mod process;
mod recorder;

pub use process::{ProcessMetrics, ProcessSample};
pub use recorder::{PassRecorder, PassTimer};

use crate::collectors::{CollectContext, MetricList, Processor, Publisher};
use crate::labels;
use anyhow::Result;
use futures::future::BoxFuture;
use prometheus::core::Collector;
use prometheus::{GaugeVec, Opts, Registry};
use std::sync::LockResult;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, instrument, warn};

fn register_all(registry: &Registry, collectors: Vec<Box<dyn Collector>>) -> Result<()> {
    for collector in collectors {
        registry.register(collector)?;
    }
    Ok(())
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Take the guard of a poisoned lock; self-metrics stay usable after a panic.
fn recover<G>(lock: LockResult<G>, what: &str) -> G {
    lock.unwrap_or_else(|poisoned| {
        warn!("{what} lock was poisoned, recovering");
        poisoned.into_inner()
    })
}

/// Exporter self-monitoring: upstream request accounting, last pass
/// durations of every runner and the process itself.
#[derive(Clone)]
pub struct ExporterCollector {
    api_requests: GaugeVec,
    api_concurrency: GaugeVec,
    collector_last_duration: GaugeVec,
    process: ProcessMetrics,
}

impl Default for ExporterCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl ExporterCollector {
    #[must_use]
    #[allow(clippy::expect_used)]
    ///
    /// # Panics
    ///
    /// Panics if metric creation fails.
    pub fn new() -> Self {
        let api_requests = GaugeVec::new(
            Opts::new(
                "azure_devops_api_requests",
                "Total Azure DevOps API requests issued since start",
            ),
            &[],
        )
        .expect("azure_devops_api_requests");

        let api_concurrency = GaugeVec::new(
            Opts::new(
                "azure_devops_api_concurrency",
                "Azure DevOps API requests currently in flight",
            ),
            &[],
        )
        .expect("azure_devops_api_concurrency");

        let collector_last_duration = GaugeVec::new(
            Opts::new(
                "azure_devops_collector_last_duration_seconds",
                "Duration of the last finished pass per collector",
            ),
            &["collector"],
        )
        .expect("azure_devops_collector_last_duration_seconds");

        Self {
            api_requests,
            api_concurrency,
            collector_last_duration,
            process: ProcessMetrics::new(),
        }
    }
}

impl Processor for ExporterCollector {
    type Unit = ();

    fn name(&self) -> &'static str {
        "exporter"
    }

    #[instrument(skip(self, registry), level = "info", err, fields(collector = "exporter"))]
    fn register_metrics(&self, registry: &Registry) -> Result<()> {
        register_all(
            registry,
            vec![
                Box::new(self.api_requests.clone()),
                Box::new(self.api_concurrency.clone()),
                Box::new(self.collector_last_duration.clone()),
            ],
        )?;
        self.process.register(registry)?;
        debug!("registered exporter metrics");
        Ok(())
    }

    fn reset(&self) {
        self.api_requests.reset();
        self.api_concurrency.reset();
        self.collector_last_duration.reset();
    }

    #[instrument(skip_all, level = "info", err, fields(collector = "exporter", otel.kind = "internal"))]
    fn collect<'a>(
        &'a self,
        ctx: &'a CollectContext,
        _unit: &'a (),
        publisher: &'a Publisher,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut requests = MetricList::new();
            #[allow(clippy::cast_precision_loss)]
            requests.add(labels!(), ctx.api.request_count() as f64);
            publisher.gauge(requests, &self.api_requests);

            let mut concurrency = MetricList::new();
            #[allow(clippy::cast_precision_loss)]
            concurrency.add(labels!(), ctx.api.current_concurrency() as f64);
            publisher.gauge(concurrency, &self.api_concurrency);

            let mut durations = MetricList::new();
            for (collector, seconds) in ctx.recorder.last_durations() {
                durations.add(labels!("collector" => collector), seconds);
            }
            publisher.gauge(durations, &self.collector_last_duration);

            // Sample now so the publication only copies values.
            let process = self.process.clone();
            match tokio::task::spawn_blocking(move || process.sample()).await {
                Ok(Some(sample)) => {
                    let process = self.process.clone();
                    publisher.publish(move || {
                        process.apply(&sample);
                        Ok(())
                    });
                }
                Ok(None) => debug!("exporter process not visible, skipping process metrics"),
                Err(err) => warn!("process sampling failed: {err}"),
            }

            Ok(())
        })
    }

    fn live(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::testing::{context, publish_unit, registry_for, value};
    use crate::devops::mock::MockApi;
    use std::sync::Arc;

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn test_exporter_metrics() {
        let api = Arc::new(MockApi::new());
        let ctx = context(Arc::clone(&api));
        ctx.recorder.start_pass("build").finish(0);
        let collector = ExporterCollector::new();
        let registry = registry_for(&collector);

        let published = publish_unit(&collector, &ctx, &()).await.unwrap();

        assert_eq!(value(&registry, "azure_devops_api_requests", &[]), Some(0.0));
        assert_eq!(value(&registry, "azure_devops_api_concurrency", &[]), Some(0.0));
        assert!(
            value(
                &registry,
                "azure_devops_collector_last_duration_seconds",
                &[("collector", "build")]
            )
            .is_some()
        );

        #[cfg(target_os = "linux")]
        {
            assert_eq!(published, 4);
            assert!(
                value(&registry, "azure_devops_exporter_process_resident_memory_bytes", &[])
                    .is_some_and(|bytes| bytes > 0.0)
            );
        }
        #[cfg(not(target_os = "linux"))]
        let _ = published;
    }
}
