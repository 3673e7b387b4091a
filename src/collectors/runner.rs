//! Collector runner: one named polling loop per processor.
//!
//! A pass resolves its fan-out units, collects every unit concurrently into
//! its own [`Publisher`], forwards the publications of successful units to a
//! channel, and lets a dedicated aggregator task reset the processor's gauges
//! and replay everything once all units are done.

use super::publisher::Publication;
use super::{CollectContext, FanOutUnit, Processor, Publisher, Scope};
use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, info_span, warn};
use tracing_futures::Instrument as _;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunnerState {
    /// No pass has published yet.
    Uninitialized,
    Idle,
    Collecting,
    Publishing,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PassOutcome {
    /// No fan-out units known yet; nothing fetched, nothing reset.
    Skipped,
    /// The previous pass of this runner is still running.
    Busy,
    Published {
        units: usize,
        failed: usize,
        publications: usize,
    },
}

#[derive(Clone, Debug)]
pub struct RunnerStatus {
    pub state: RunnerState,
    pub last_start: Option<DateTime<Utc>>,
    pub last_end: Option<DateTime<Utc>>,
    pub last_duration: Option<Duration>,
}

impl Default for RunnerStatus {
    fn default() -> Self {
        Self {
            state: RunnerState::Uninitialized,
            last_start: None,
            last_end: None,
            last_duration: None,
        }
    }
}

#[derive(Default)]
struct StatusCell(Mutex<RunnerStatus>);

impl StatusCell {
    fn lock(&self) -> MutexGuard<'_, RunnerStatus> {
        match self.0.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("RunnerStatus mutex was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn set_state(&self, state: RunnerState) {
        self.lock().state = state;
    }
}

/// Clears the busy flag when the pass ends, even by panic.
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Runner<P: Processor> {
    processor: Arc<P>,
    ctx: CollectContext,
    scope: Arc<Scope>,
    busy: AtomicBool,
    publish_lock: Arc<tokio::sync::Mutex<()>>,
    status: Arc<StatusCell>,
}

impl<P: Processor> Runner<P> {
    #[must_use]
    pub fn new(processor: P, ctx: CollectContext, scope: Arc<Scope>) -> Self {
        Self {
            processor: Arc::new(processor),
            ctx,
            scope,
            busy: AtomicBool::new(false),
            publish_lock: Arc::new(tokio::sync::Mutex::new(())),
            status: Arc::new(StatusCell::default()),
        }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.ctx.runner.name
    }

    #[must_use]
    pub fn status(&self) -> RunnerStatus {
        self.status.lock().clone()
    }

    #[must_use]
    pub fn processor(&self) -> &P {
        &self.processor
    }

    /// Run forever: one detached pass per tick.
    ///
    /// A panicking pass is re-raised on the returned handle.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        let interval = self.ctx.runner.interval;
        info!(collector = self.name(), interval_secs = interval.as_secs(), "starting collector");

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut passes = JoinSet::new();

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let runner = Arc::clone(&self);
                        let span = info_span!("collector.pass", collector = runner.name(), otel.kind = "internal");
                        passes.spawn(async move { runner.collect().await }.instrument(span));
                    }
                    Some(done) = passes.join_next(), if !passes.is_empty() => {
                        if let Err(err) = done
                            && err.is_panic()
                        {
                            std::panic::resume_unwind(err.into_panic());
                        }
                    }
                }
            }
        })
    }

    /// One collection pass.
    ///
    /// # Panics
    ///
    /// Panics when a publication does not match its family's label schema,
    /// and re-raises panics of the processor.
    pub async fn collect(&self) -> PassOutcome {
        let name = self.name();

        let Some(_busy) = BusyGuard::acquire(&self.busy) else {
            warn!(collector = name, "previous pass still running, skipping tick");
            self.ctx.recorder.record_skip(name);
            return PassOutcome::Busy;
        };

        // Captured once; a snapshot swapped in meanwhile is seen next pass.
        let Some(units) = P::Unit::resolve(&self.scope).await else {
            debug!(collector = name, "no fan-out units yet, skipping pass");
            return PassOutcome::Skipped;
        };

        let timer = self.ctx.recorder.start_pass(name);
        let started = Utc::now();
        {
            let mut status = self.status.lock();
            status.state = RunnerState::Collecting;
            status.last_start = Some(started);
        }

        let (tx, rx) = mpsc::unbounded_channel::<Publication>();
        let aggregator = tokio::spawn(aggregate(
            Arc::clone(&self.processor),
            Arc::clone(&self.publish_lock),
            Arc::clone(&self.status),
            rx,
        ));

        let mut failed = 0;
        {
            let tx = &tx;
            let mut tasks: FuturesUnordered<_> = units
                .iter()
                .map(|unit| {
                    let span = info_span!(
                        "collector.unit",
                        collector = name,
                        unit = %unit.describe(),
                        otel.kind = "internal"
                    );
                    async move {
                        let publisher = Publisher::new();
                        match self.processor.collect(&self.ctx, unit, &publisher).await {
                            Ok(()) => {
                                publisher.forward(tx);
                                true
                            }
                            Err(err) => {
                                warn!(
                                    collector = name,
                                    unit = %unit.describe(),
                                    error = %err,
                                    "collection failed, unit contributes no metrics"
                                );
                                false
                            }
                        }
                    }
                    .instrument(span)
                })
                .collect();

            while let Some(ok) = tasks.next().await {
                if !ok {
                    failed += 1;
                }
            }
        }
        // Closing the channel tells the aggregator every producer is done.
        drop(tx);

        let publications = match aggregator.await {
            Ok(Ok(count)) => count,
            #[allow(clippy::panic)]
            Ok(Err(err)) => panic!("collector {name}: {err}"),
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(err) => {
                error!(collector = name, error = %err, "aggregator task cancelled");
                0
            }
        };

        let elapsed = timer.finish(failed);
        {
            let mut status = self.status.lock();
            status.state = RunnerState::Idle;
            status.last_end = Some(Utc::now());
            status.last_duration = Some(Duration::from_secs_f64(elapsed));
        }

        debug!(
            collector = name,
            units = units.len(),
            failed,
            publications,
            elapsed_secs = elapsed,
            "pass finished"
        );

        PassOutcome::Published {
            units: units.len(),
            failed,
            publications,
        }
    }
}

/// Buffer publications until every producer hung up, then reset and replay
/// under the runner's publish lock.
async fn aggregate<P: Processor>(
    processor: Arc<P>,
    publish_lock: Arc<tokio::sync::Mutex<()>>,
    status: Arc<StatusCell>,
    mut rx: UnboundedReceiver<Publication>,
) -> Result<usize, super::MetricError> {
    let mut buffered = Vec::new();
    while let Some(publication) = rx.recv().await {
        buffered.push(publication);
    }

    let _guard = publish_lock.lock().await;
    status.set_state(RunnerState::Publishing);

    processor.reset();
    let count = buffered.len();
    for publication in buffered {
        publication()?;
    }
    Ok(count)
}
