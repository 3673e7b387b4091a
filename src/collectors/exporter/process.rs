use super::{recover, register_all, unix_now};
use anyhow::Result;
use prometheus::{Gauge, IntGauge, Opts, Registry};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use sysinfo::{MINIMUM_CPU_UPDATE_INTERVAL, Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::debug;

/// One reading of the exporter process.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ProcessSample {
    /// Absent when the previous CPU reading is too recent to diff against.
    pub cpu_percent: Option<f64>,
    pub resident_memory_bytes: u64,
    pub virtual_memory_bytes: u64,
    pub open_fds: Option<u64>,
}

struct Sampler {
    system: System,
    last_cpu: Option<Instant>,
}

/// Resource usage of the exporter process itself.
#[derive(Clone)]
pub struct ProcessMetrics {
    cpu_percent: Gauge,
    cpu_cores: IntGauge,
    resident_memory_bytes: IntGauge,
    virtual_memory_bytes: IntGauge,
    open_fds: IntGauge,
    start_time_seconds: Gauge,
    sampler: Arc<Mutex<Sampler>>,
    pid: Pid,
}

impl Default for ProcessMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

impl ProcessMetrics {
    #[must_use]
    #[allow(clippy::expect_used)]
    ///
    /// # Panics
    ///
    /// Panics if metric creation fails.
    pub fn new() -> Self {
        let gauge = |name: &str, help: &str| {
            Gauge::with_opts(Opts::new(name, help)).expect("valid process metric")
        };
        let int_gauge = |name: &str, help: &str| {
            IntGauge::with_opts(Opts::new(name, help)).expect("valid process metric")
        };

        let mut system = System::new();
        system.refresh_cpu_all();
        let cores = system.cpus().len().max(1);

        let metrics = Self {
            cpu_percent: gauge(
                "azure_devops_exporter_process_cpu_percent",
                "CPU usage of the exporter in percent of one core",
            ),
            cpu_cores: int_gauge(
                "azure_devops_exporter_process_cpu_cores",
                "CPU cores available on the host",
            ),
            resident_memory_bytes: int_gauge(
                "azure_devops_exporter_process_resident_memory_bytes",
                "Resident memory of the exporter in bytes",
            ),
            virtual_memory_bytes: int_gauge(
                "azure_devops_exporter_process_virtual_memory_bytes",
                "Virtual memory of the exporter in bytes",
            ),
            open_fds: int_gauge(
                "azure_devops_exporter_process_open_fds",
                "Open file descriptors of the exporter",
            ),
            start_time_seconds: gauge(
                "azure_devops_exporter_process_start_time_seconds",
                "Start time of the exporter as a unix timestamp",
            ),
            sampler: Arc::new(Mutex::new(Sampler {
                system,
                last_cpu: None,
            })),
            pid: Pid::from_u32(std::process::id()),
        };

        metrics.cpu_cores.set(i64::try_from(cores).unwrap_or(1));
        metrics.start_time_seconds.set(unix_now());
        metrics
    }

    ///
    /// # Errors
    ///
    /// Returns an error if metric registration fails.
    pub fn register(&self, registry: &Registry) -> Result<()> {
        register_all(
            registry,
            vec![
                Box::new(self.cpu_percent.clone()),
                Box::new(self.cpu_cores.clone()),
                Box::new(self.resident_memory_bytes.clone()),
                Box::new(self.virtual_memory_bytes.clone()),
                Box::new(self.open_fds.clone()),
                Box::new(self.start_time_seconds.clone()),
            ],
        )
    }

    /// Read the process from the OS. This blocks on procfs, so callers on
    /// the runtime go through `spawn_blocking`.
    #[must_use]
    pub fn sample(&self) -> Option<ProcessSample> {
        let mut sampler = recover(self.sampler.lock(), "process sampler");
        let now = Instant::now();

        // CPU usage is a diff of two readings at least this far apart.
        let cpu_due = sampler
            .last_cpu
            .is_none_or(|last| now.duration_since(last) >= MINIMUM_CPU_UPDATE_INTERVAL);
        if cpu_due {
            sampler.system.refresh_processes_specifics(
                ProcessesToUpdate::Some(&[self.pid]),
                true,
                ProcessRefreshKind::everything(),
            );
            sampler.last_cpu = Some(now);
        }

        let process = sampler.system.process(self.pid)?;
        Some(ProcessSample {
            cpu_percent: cpu_due.then(|| f64::from(process.cpu_usage())),
            resident_memory_bytes: process.memory(),
            virtual_memory_bytes: process.virtual_memory(),
            open_fds: if cpu_due { open_fds(self.pid) } else { None },
        })
    }

    /// Copy a sample into the gauges.
    pub fn apply(&self, sample: &ProcessSample) {
        if let Some(cpu) = sample.cpu_percent {
            self.cpu_percent.set(cpu);
        }
        self.resident_memory_bytes
            .set(saturating_i64(sample.resident_memory_bytes));
        self.virtual_memory_bytes
            .set(saturating_i64(sample.virtual_memory_bytes));
        if let Some(fds) = sample.open_fds {
            self.open_fds.set(saturating_i64(fds));
        }

        debug!(
            cpu_percent = ?sample.cpu_percent,
            rss_mb = sample.resident_memory_bytes / 1024 / 1024,
            fds = ?sample.open_fds,
            "collected process metrics"
        );
    }
}

#[cfg(target_os = "linux")]
fn open_fds(pid: Pid) -> Option<u64> {
    std::fs::read_dir(format!("/proc/{pid}/fd"))
        .ok()
        .and_then(|entries| u64::try_from(entries.count()).ok())
}

#[cfg(not(target_os = "linux"))]
fn open_fds(_pid: Pid) -> Option<u64> {
    None
}
