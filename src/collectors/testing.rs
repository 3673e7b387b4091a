//! Helpers for processor and runner unit tests.

use super::exporter::PassRecorder;
use super::{CollectContext, Processor, Publisher, QueryRef, RunnerInfo, Scope, Settings};
use crate::devops::DevopsApi;
use crate::devops::mock::MockApi;
use crate::discovery::{DiscoveryConfig, ProjectSnapshot, ServiceDiscovery};
use anyhow::Result;
use prometheus::Registry;
use prometheus::proto::MetricFamily;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub fn context(api: Arc<MockApi>) -> CollectContext {
    CollectContext {
        api,
        settings: Arc::new(Settings::default()),
        recorder: Arc::new(PassRecorder::new()),
        runner: RunnerInfo {
            name: "test",
            interval: Duration::from_secs(60),
        },
    }
}

pub fn scope(api: Arc<MockApi>, queries: Vec<QueryRef>) -> Arc<Scope> {
    let api: Arc<dyn DevopsApi> = api;
    Arc::new(Scope {
        discovery: Arc::new(ServiceDiscovery::new(api, DiscoveryConfig::default())),
        projects: ProjectSnapshot::new(),
        queries: Arc::new(queries),
    })
}

/// Context and scope sharing one mock.
pub struct TestProbe {
    pub ctx: CollectContext,
    pub scope: Arc<Scope>,
}

impl TestProbe {
    pub fn new(api: Arc<MockApi>, name: &'static str) -> Self {
        let mut ctx = context(Arc::clone(&api));
        ctx.runner.name = name;
        Self {
            ctx,
            scope: scope(api, Vec::new()),
        }
    }
}

/// Register `processor` on a fresh registry.
#[allow(clippy::unwrap_used)]
pub fn registry_for<P: Processor>(processor: &P) -> Registry {
    let registry = Registry::new();
    processor.register_metrics(&registry).unwrap();
    registry
}

/// Collect one unit and publish it the way the runner does.
pub async fn publish_unit<P: Processor>(
    processor: &P,
    ctx: &CollectContext,
    unit: &P::Unit,
) -> Result<usize> {
    let publisher = Publisher::new();
    processor.collect(ctx, unit, &publisher).await?;
    processor.reset();
    Ok(publisher.replay()?)
}

/// One exported series: its labels and its gauge/counter value.
#[derive(Clone, Debug)]
pub struct Sample {
    pub labels: HashMap<String, String>,
    pub value: f64,
}

impl Sample {
    pub fn label(&self, name: &str) -> &str {
        self.labels.get(name).map_or("", String::as_str)
    }
}

fn family(registry: &Registry, name: &str) -> Option<MetricFamily> {
    registry.gather().into_iter().find(|f| f.name() == name)
}

/// Every series of family `name`; empty when the family has no series.
pub fn samples(registry: &Registry, name: &str) -> Vec<Sample> {
    family(registry, name)
        .map(|family| {
            family
                .get_metric()
                .iter()
                .map(|metric| Sample {
                    labels: metric
                        .get_label()
                        .iter()
                        .map(|l| (l.name().to_string(), l.value().to_string()))
                        .collect(),
                    value: if metric.get_counter().has_value() {
                        metric.get_counter().value()
                    } else {
                        metric.get_gauge().value()
                    },
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Series of `name` whose labels include every pair of `matching`.
pub fn find(registry: &Registry, name: &str, matching: &[(&str, &str)]) -> Vec<Sample> {
    samples(registry, name)
        .into_iter()
        .filter(|sample| matching.iter().all(|(k, v)| sample.label(k) == *v))
        .collect()
}

/// Value of the single series of `name` matching `matching`.
pub fn value(registry: &Registry, name: &str, matching: &[(&str, &str)]) -> Option<f64> {
    let found = find(registry, name, matching);
    match found.as_slice() {
        [only] => Some(only.value),
        _ => None,
    }
}

/// Sample count of the histogram series of `name` matching `matching`.
pub fn observations(registry: &Registry, name: &str, matching: &[(&str, &str)]) -> u64 {
    family(registry, name)
        .map(|family| {
            family
                .get_metric()
                .iter()
                .filter(|metric| {
                    matching.iter().all(|(k, v)| {
                        metric
                            .get_label()
                            .iter()
                            .any(|l| l.name() == *k && l.value() == *v)
                    })
                })
                .map(|metric| metric.get_histogram().sample_count())
                .sum()
        })
        .unwrap_or_default()
}
