//! Process root: shared state, initial discovery and runner lifecycle.

use crate::collectors::exporter::PassRecorder;
use crate::collectors::runner::Runner;
use crate::collectors::{
    COLLECTOR_NAMES, CollectContext, CollectorConfig, Processor, QueryRef, RunnerInfo, Scope,
    Settings, all_factories,
};
use crate::devops::DevopsApi;
use crate::discovery::{DiscoveryConfig, ProjectSnapshot, ServiceDiscovery};
use anyhow::{Context, Result, anyhow};
use futures::stream::{FuturesUnordered, StreamExt};
use prometheus::Registry;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, instrument, warn};

/// State shared by every runner of the process.
pub struct AppContext {
    pub api: Arc<dyn DevopsApi>,
    pub settings: Arc<Settings>,
    pub discovery: Arc<ServiceDiscovery>,
    pub scope: Arc<Scope>,
    pub registry: Registry,
    pub recorder: Arc<PassRecorder>,
    pub collectors: CollectorConfig,
}

impl AppContext {
    #[must_use]
    pub fn new(
        api: Arc<dyn DevopsApi>,
        settings: Settings,
        discovery: DiscoveryConfig,
        queries: Vec<QueryRef>,
        collectors: CollectorConfig,
        registry: Registry,
    ) -> Self {
        let discovery = Arc::new(ServiceDiscovery::new(Arc::clone(&api), discovery));
        let scope = Arc::new(Scope {
            discovery: Arc::clone(&discovery),
            projects: ProjectSnapshot::new(),
            queries: Arc::new(queries),
        });

        Self {
            api,
            settings: Arc::new(settings),
            discovery,
            scope,
            registry,
            recorder: Arc::new(PassRecorder::new()),
            collectors,
        }
    }

    /// Register `processor`'s families and start its runner.
    ///
    /// # Errors
    ///
    /// Returns an error if a family is already registered.
    pub fn spawn_runner<P: Processor>(&self, processor: P) -> Result<JoinHandle<()>> {
        let name = processor.name();
        processor
            .register_metrics(&self.registry)
            .with_context(|| format!("failed to register {name} metrics"))?;

        let ctx = CollectContext {
            api: Arc::clone(&self.api),
            settings: Arc::clone(&self.settings),
            recorder: Arc::clone(&self.recorder),
            runner: RunnerInfo {
                name,
                interval: self.collectors.interval_for(name, processor.live()),
            },
        };

        let runner = Arc::new(Runner::new(processor, ctx, Arc::clone(&self.scope)));
        Ok(runner.start())
    }

    /// Discover, then start the refresh loop and every enabled runner.
    ///
    /// # Errors
    ///
    /// Returns an error if the initial discovery fails or a collector
    /// cannot register its metrics.
    #[instrument(skip(self), level = "info", err)]
    pub async fn start(&self) -> Result<Vec<JoinHandle<()>>> {
        let projects = self
            .discovery
            .update()
            .await
            .context("initial service discovery failed")?;
        info!(projects = projects.len(), "service discovery finished");
        self.scope.projects.store(projects);

        self.recorder.register(&self.registry)?;

        let mut handles = vec![self.spawn_refresh_loop()];
        let factories = all_factories();

        for &name in COLLECTOR_NAMES {
            if !self.collectors.is_enabled(name) {
                continue;
            }

            if let Some(factory) = factories.get(name) {
                handles.push(factory().spawn(self)?);
            }
        }

        info!(tasks = handles.len(), "collectors started");
        Ok(handles)
    }

    fn spawn_refresh_loop(&self) -> JoinHandle<()> {
        let discovery = Arc::clone(&self.discovery);
        let snapshot = self.scope.projects.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(discovery.refresh_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // first tick completes immediately, discovery already ran
            ticker.tick().await;

            loop {
                ticker.tick().await;
                match discovery.update().await {
                    Ok(projects) => snapshot.store(projects),
                    Err(err) => warn!("service discovery refresh failed: {err:#}"),
                }
            }
        })
    }
}

/// Wait on the background tasks; none of them is expected to finish.
///
/// # Errors
///
/// Returns an error when a task exits or is cancelled.
///
/// # Panics
///
/// Re-raises the panic of a task, so a failing runner takes the process down.
pub async fn supervise(handles: Vec<JoinHandle<()>>) -> Result<()> {
    let mut tasks: FuturesUnordered<_> = handles.into_iter().collect();

    match tasks.next().await {
        Some(Err(err)) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
        Some(Err(err)) => Err(anyhow!("background task failed: {err}")),
        Some(Ok(())) => Err(anyhow!("background task exited")),
        None => Ok(()),
    }
}
