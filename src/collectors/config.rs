use chrono::TimeDelta;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

pub const DEFAULT_SCRAPE_TIME: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_SCRAPE_TIME_LIVE: Duration = Duration::from_secs(30);

/// Shortest accepted runner interval.
const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Which collectors run, and how often.
#[derive(Clone, Debug)]
pub struct CollectorConfig {
    pub enabled_collectors: HashSet<String>,
    pub scrape_time: Duration,
    pub scrape_time_live: Duration,
    pub intervals: HashMap<String, Duration>,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            enabled_collectors: HashSet::new(),
            scrape_time: DEFAULT_SCRAPE_TIME,
            scrape_time_live: DEFAULT_SCRAPE_TIME_LIVE,
            intervals: HashMap::new(),
        }
    }
}

impl CollectorConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_enabled(mut self, collectors: &[String]) -> Self {
        self.enabled_collectors = collectors.iter().cloned().collect();
        self
    }

    #[must_use]
    pub const fn with_scrape_time(mut self, scrape_time: Duration, live: Duration) -> Self {
        self.scrape_time = scrape_time;
        self.scrape_time_live = live;
        self
    }

    #[must_use]
    pub fn with_interval(mut self, collector: &str, interval: Duration) -> Self {
        self.intervals.insert(collector.to_string(), interval);
        self
    }

    #[must_use]
    pub fn is_enabled(&self, name: &str) -> bool {
        self.enabled_collectors.contains(name)
    }

    /// Per-collector override, else the live or regular scrape time.
    #[must_use]
    pub fn interval_for(&self, name: &str, live: bool) -> Duration {
        let fallback = if live {
            self.scrape_time_live
        } else {
            self.scrape_time
        };
        self.intervals
            .get(name)
            .copied()
            .unwrap_or(fallback)
            .max(MIN_INTERVAL)
    }
}

/// Collection limits shared by all processors.
#[derive(Clone, Debug)]
pub struct Settings {
    /// Lookback window for build listings.
    pub build_history: TimeDelta,
    /// Lookback window for releases and deployments.
    pub release_history: TimeDelta,
    /// Concurrent sub-requests a processor keeps open inside one unit.
    pub fanout: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            build_history: TimeDelta::hours(48),
            release_history: TimeDelta::hours(48),
            fanout: 10,
        }
    }
}
