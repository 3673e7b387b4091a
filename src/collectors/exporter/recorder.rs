use super::{recover, register_all, unix_now};
use anyhow::Result;
use prometheus::{CounterVec, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// Per-runner pass accounting, shared by every runner of the process.
///
/// These families are cumulative and never reset by a pass.
#[derive(Clone)]
pub struct PassRecorder {
    pass_duration_seconds: HistogramVec,
    pass_errors_total: CounterVec,
    last_pass_timestamp: GaugeVec,
    passes_skipped_total: CounterVec,

    last_durations: Arc<RwLock<BTreeMap<&'static str, f64>>>,
}

impl Default for PassRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl PassRecorder {
    #[must_use]
    #[allow(clippy::expect_used)]
    ///
    /// # Panics
    ///
    /// Panics if metric creation fails.
    pub fn new() -> Self {
        let pass_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "azure_devops_exporter_collector_pass_duration_seconds",
                "Time spent in one collection pass per collector in seconds",
            )
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0]),
            &["collector"],
        )
        .expect("azure_devops_exporter_collector_pass_duration_seconds");

        let pass_errors_total = CounterVec::new(
            Opts::new(
                "azure_devops_exporter_collector_pass_errors_total",
                "Total number of failed fan-out units per collector",
            ),
            &["collector"],
        )
        .expect("azure_devops_exporter_collector_pass_errors_total");

        let last_pass_timestamp = GaugeVec::new(
            Opts::new(
                "azure_devops_exporter_collector_last_pass_timestamp_seconds",
                "Unix timestamp of the last finished pass per collector",
            ),
            &["collector"],
        )
        .expect("azure_devops_exporter_collector_last_pass_timestamp_seconds");

        let passes_skipped_total = CounterVec::new(
            Opts::new(
                "azure_devops_exporter_collector_passes_skipped_total",
                "Timer ticks dropped because the previous pass was still running",
            ),
            &["collector"],
        )
        .expect("azure_devops_exporter_collector_passes_skipped_total");

        Self {
            pass_duration_seconds,
            pass_errors_total,
            last_pass_timestamp,
            passes_skipped_total,
            last_durations: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    #[must_use]
    pub fn start_pass(&self, collector: &'static str) -> PassTimer {
        PassTimer {
            collector,
            start: Instant::now(),
            recorder: self.clone(),
        }
    }

    pub fn record_skip(&self, collector: &str) {
        self.passes_skipped_total
            .with_label_values(&[collector])
            .inc();
    }

    /// Duration of the last finished pass of every collector, by name.
    #[must_use]
    pub fn last_durations(&self) -> Vec<(&'static str, f64)> {
        recover(self.last_durations.read(), "PassRecorder")
            .iter()
            .map(|(name, seconds)| (*name, *seconds))
            .collect()
    }

    #[allow(clippy::cast_precision_loss)]
    fn record_pass(&self, collector: &'static str, duration: f64, failed_units: usize) {
        let timestamp = unix_now();

        self.pass_duration_seconds
            .with_label_values(&[collector])
            .observe(duration);

        self.last_pass_timestamp
            .with_label_values(&[collector])
            .set(timestamp);

        if failed_units > 0 {
            self.pass_errors_total
                .with_label_values(&[collector])
                .inc_by(failed_units as f64);
        }

        recover(self.last_durations.write(), "PassRecorder").insert(collector, duration);
    }

    ///
    /// # Errors
    ///
    /// Returns an error if metric registration fails.
    pub fn register(&self, registry: &Registry) -> Result<()> {
        register_all(
            registry,
            vec![
                Box::new(self.pass_duration_seconds.clone()),
                Box::new(self.pass_errors_total.clone()),
                Box::new(self.last_pass_timestamp.clone()),
                Box::new(self.passes_skipped_total.clone()),
            ],
        )
    }
}

pub struct PassTimer {
    collector: &'static str,
    start: Instant,
    recorder: PassRecorder,
}

impl PassTimer {
    /// Record the pass, counting `failed_units` as errors. Returns seconds elapsed.
    pub fn finish(self, failed_units: usize) -> f64 {
        let duration = self.start.elapsed().as_secs_f64();
        self.recorder
            .record_pass(self.collector, duration, failed_units);
        duration
    }
}
