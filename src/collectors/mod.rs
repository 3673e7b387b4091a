use crate::devops::DevopsApi;
use anyhow::Result;
use futures::future::BoxFuture;
use prometheus::Registry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[macro_use]
mod register_macro;

pub mod config;
pub mod metric_list;
pub mod publisher;
pub mod runner;
pub mod scope;
pub mod util;

#[cfg(test)]
pub mod testing;

pub use config::{CollectorConfig, Settings};
pub use metric_list::{Labels, MetricError, MetricList};
pub use publisher::Publisher;
pub use scope::{AgentPoolId, FanOutUnit, QueryRef, Scope};

/// Identity of the runner a processor is collecting for.
#[derive(Clone, Debug)]
pub struct RunnerInfo {
    pub name: &'static str,
    pub interval: Duration,
}

/// Everything a processor may use during one pass.
#[derive(Clone)]
pub struct CollectContext {
    pub api: Arc<dyn DevopsApi>,
    pub settings: Arc<Settings>,
    pub recorder: Arc<exporter::PassRecorder>,
    pub runner: RunnerInfo,
}

/// Strategy for one metric family group: what to fetch and how to label it.
///
/// Scheduling, fan-out and publishing belong to the
/// [`Runner`](runner::Runner); `Unit` selects the fan-out shape.
pub trait Processor: Send + Sync + 'static {
    type Unit: FanOutUnit;

    fn name(&self) -> &'static str;

    /// Register metrics with the prometheus registry.
    ///
    /// # Errors
    ///
    /// Returns an error if any metric fails to register.
    fn register_metrics(&self, registry: &Registry) -> Result<()>;

    /// Clear the gauge families before a replay. Counters and summaries are
    /// cumulative and never reset.
    fn reset(&self);

    /// Collect one fan-out unit, staging publications on `publisher`.
    fn collect<'a>(
        &'a self,
        ctx: &'a CollectContext,
        unit: &'a Self::Unit,
        publisher: &'a Publisher,
    ) -> BoxFuture<'a, Result<()>>;

    fn enabled_by_default(&self) -> bool {
        true
    }

    /// Live collectors follow `--scrape.time.live` instead of `--scrape.time`.
    fn live(&self) -> bool {
        false
    }
}

register_collectors! {
    project => ProjectCollector,
    repository => RepositoryCollector,
    pullrequest => PullRequestCollector,
    build => BuildCollector,
    latestbuild => LatestBuildCollector,
    release => ReleaseCollector,
    deployment => DeploymentCollector,
    stats => StatsCollector,
    agentpool => AgentPoolCollector,
    resourceusage => ResourceUsageCollector,
    query => QueryCollector,
    exporter => ExporterCollector,
}
