//! Per-pass metric buffer.
//!
//! Processors compute values into a [`MetricList`] while talking to the API
//! and only touch the exported families when the runner replays the list.
//! Gauges take the last value per label tuple; counters and summaries
//! accumulate every entry.

use chrono::{DateTime, TimeDelta, Utc};
use prometheus::{CounterVec, GaugeVec, HistogramVec};
use std::collections::HashMap;

/// Ordered label set, built with [`labels!`](crate::labels).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Labels(Vec<(&'static str, String)>);

impl Labels {
    #[must_use]
    pub const fn from_pairs(pairs: Vec<(&'static str, String)>) -> Self {
        Self(pairs)
    }

    /// Copy of this set with one more label appended.
    #[must_use]
    pub fn with(&self, name: &'static str, value: impl ToString) -> Self {
        let mut pairs = self.0.clone();
        pairs.push((name, value.to_string()));
        Self(pairs)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.as_str())
    }

    fn as_map(&self) -> HashMap<&str, &str> {
        self.0.iter().map(|(k, v)| (*k, v.as_str())).collect()
    }
}

/// Build a [`Labels`] set: `labels!("projectID" => project.id, ...)`.
#[macro_export]
macro_rules! labels {
    ($($name:literal => $value:expr),* $(,)?) => {
        $crate::collectors::metric_list::Labels::from_pairs(vec![
            $(($name, ::std::string::ToString::to_string(&$value)),)*
        ])
    };
}

#[derive(Debug, thiserror::Error)]
pub enum MetricError {
    /// The label set does not match the family's declared label names.
    #[error("label set {labels:?} does not match schema of {family}: {source}")]
    Schema {
        family: String,
        labels: Labels,
        #[source]
        source: prometheus::Error,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Entry {
    pub labels: Labels,
    pub value: f64,
}

#[allow(clippy::cast_precision_loss)]
#[must_use]
pub const fn to_f64(value: i64) -> f64 {
    value as f64
}

#[allow(clippy::cast_precision_loss)]
fn seconds(delta: TimeDelta) -> f64 {
    delta.num_milliseconds() as f64 / 1000.0
}

fn family_name(collector: &dyn prometheus::core::Collector) -> String {
    collector
        .desc()
        .first()
        .map_or_else(String::new, |desc| desc.fq_name.clone())
}

#[derive(Clone, Debug, Default)]
pub struct MetricList {
    entries: Vec<Entry>,
}

impl MetricList {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    #[must_use]
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn add(&mut self, labels: Labels, value: f64) {
        self.entries.push(Entry { labels, value });
    }

    /// Presence marker, value 1.
    pub fn add_info(&mut self, labels: Labels) {
        self.add(labels, 1.0);
    }

    pub fn add_bool(&mut self, labels: Labels, condition: bool) {
        self.add(labels, if condition { 1.0 } else { 0.0 });
    }

    /// Unix seconds of `time`; zero, pre-epoch and missing instants are skipped.
    #[allow(clippy::cast_precision_loss)]
    pub fn add_time(&mut self, labels: Labels, time: Option<DateTime<Utc>>) {
        if let Some(time) = time
            && time.timestamp() > 0
        {
            self.add(labels, time.timestamp_millis() as f64 / 1000.0);
        }
    }

    /// Duration in fractional seconds.
    pub fn add_duration(&mut self, labels: Labels, duration: TimeDelta) {
        self.add(labels, seconds(duration));
    }

    pub fn add_if_not_nil(&mut self, labels: Labels, value: Option<f64>) {
        if let Some(value) = value {
            self.add(labels, value);
        }
    }

    pub fn add_if_not_zero(&mut self, labels: Labels, value: f64) {
        if value != 0.0 {
            self.add(labels, value);
        }
    }

    pub fn add_if_greater_zero(&mut self, labels: Labels, value: f64) {
        if value > 0.0 {
            self.add(labels, value);
        }
    }

    /// Replay into a gauge family; later entries overwrite earlier ones.
    ///
    /// # Errors
    ///
    /// Returns [`MetricError::Schema`] when a label set does not match.
    pub fn gauge_set(&self, gauge: &GaugeVec) -> Result<(), MetricError> {
        for entry in &self.entries {
            schema(gauge, &entry.labels, gauge.get_metric_with(&entry.labels.as_map()))?
                .set(entry.value);
        }
        Ok(())
    }

    /// Replay into a counter family; every entry increments.
    ///
    /// # Errors
    ///
    /// Returns [`MetricError::Schema`] when a label set does not match.
    pub fn counter_add(&self, counter: &CounterVec) -> Result<(), MetricError> {
        for entry in &self.entries {
            let metric = schema(
                counter,
                &entry.labels,
                counter.get_metric_with(&entry.labels.as_map()),
            )?;
            if entry.value > 0.0 {
                metric.inc_by(entry.value);
            }
        }
        Ok(())
    }

    /// Replay into a summary family; every entry is one observation.
    ///
    /// # Errors
    ///
    /// Returns [`MetricError::Schema`] when a label set does not match.
    pub fn summary_set(&self, summary: &HistogramVec) -> Result<(), MetricError> {
        for entry in &self.entries {
            schema(
                summary,
                &entry.labels,
                summary.get_metric_with(&entry.labels.as_map()),
            )?
            .observe(entry.value);
        }
        Ok(())
    }
}

fn schema<M>(
    family: &dyn prometheus::core::Collector,
    labels: &Labels,
    metric: prometheus::Result<M>,
) -> Result<M, MetricError> {
    metric.map_err(|source| MetricError::Schema {
        family: family_name(family),
        labels: labels.clone(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::{HistogramOpts, Opts, Registry};

    #[allow(clippy::unwrap_used)]
    fn gauge(names: &[&str]) -> GaugeVec {
        GaugeVec::new(Opts::new("test_gauge", "test gauge"), names).unwrap()
    }

    #[test]
    fn test_add_variants() {
        let mut list = MetricList::new();
        list.add(labels!("a" => "1"), 2.5);
        list.add_info(labels!("a" => "2"));
        list.add_bool(labels!("a" => "3"), true);
        list.add_bool(labels!("a" => "4"), false);

        let values: Vec<f64> = list.entries().iter().map(|e| e.value).collect();
        assert_eq!(values, vec![2.5, 1.0, 1.0, 0.0]);
    }

    #[test]
    fn test_add_time_skips_zero_and_missing() {
        let mut list = MetricList::new();
        list.add_time(labels!("a" => "1"), None);
        list.add_time(labels!("a" => "1"), DateTime::from_timestamp(0, 0));
        list.add_time(labels!("a" => "1"), DateTime::from_timestamp(-62_135_596_800, 0));
        assert!(list.is_empty());

        list.add_time(labels!("a" => "1"), DateTime::from_timestamp(1_700_000_000, 0));
        assert_eq!(list.len(), 1);
        assert!((list.entries().first().map_or(0.0, |e| e.value) - 1.7e9).abs() < f64::EPSILON);
    }

    #[test]
    fn test_add_duration_fractional_seconds() {
        let mut list = MetricList::new();
        list.add_duration(labels!("a" => "1"), TimeDelta::milliseconds(1500));
        assert_eq!(list.entries().first().map(|e| e.value), Some(1.5));
    }

    #[test]
    fn test_guarded_adds() {
        let mut list = MetricList::new();
        list.add_if_not_nil(labels!("a" => "nil"), None);
        list.add_if_not_nil(labels!("a" => "some"), Some(0.0));
        list.add_if_not_zero(labels!("a" => "zero"), 0.0);
        list.add_if_not_zero(labels!("a" => "neg"), -1.0);
        list.add_if_greater_zero(labels!("a" => "neg"), -1.0);
        list.add_if_greater_zero(labels!("a" => "pos"), 3.0);

        let kept: Vec<&str> = list
            .entries()
            .iter()
            .filter_map(|e| e.labels.get("a"))
            .collect();
        assert_eq!(kept, vec!["some", "neg", "pos"]);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_gauge_set_last_value_wins() {
        let gauge = gauge(&["projectID"]);
        let mut list = MetricList::new();
        list.add(labels!("projectID" => "p1"), 1.0);
        list.add(labels!("projectID" => "p1"), 4.0);
        list.add(labels!("projectID" => "p2"), 2.0);

        list.gauge_set(&gauge).unwrap();
        list.gauge_set(&gauge).unwrap();

        assert!((gauge.with_label_values(&["p1"]).get() - 4.0).abs() < f64::EPSILON);
        assert!((gauge.with_label_values(&["p2"]).get() - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_counter_add_accumulates() {
        let counter = CounterVec::new(Opts::new("test_counter", "c"), &["result"]).unwrap();
        let mut list = MetricList::new();
        list.add(labels!("result" => "succeeded"), 1.0);
        list.add(labels!("result" => "succeeded"), 1.0);

        list.counter_add(&counter).unwrap();
        let first = counter.with_label_values(&["succeeded"]).get();
        list.counter_add(&counter).unwrap();
        let second = counter.with_label_values(&["succeeded"]).get();

        assert!((first - 2.0).abs() < f64::EPSILON);
        assert!(second >= first);
        assert!((second - 4.0).abs() < f64::EPSILON);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_summary_set_observes_every_entry() {
        let summary =
            HistogramVec::new(HistogramOpts::new("test_summary", "s"), &["projectID"]).unwrap();
        let mut list = MetricList::new();
        list.add(labels!("projectID" => "p1"), 10.0);
        list.add(labels!("projectID" => "p1"), 20.0);

        list.summary_set(&summary).unwrap();

        let histogram = summary.with_label_values(&["p1"]);
        assert_eq!(histogram.get_sample_count(), 2);
        assert!((histogram.get_sample_sum() - 30.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_missing_label_is_schema_error() {
        let gauge = gauge(&["projectID", "buildID"]);
        let mut list = MetricList::new();
        list.add(labels!("projectID" => "p1"), 1.0);

        let err = list.gauge_set(&gauge);
        assert!(matches!(err, Err(MetricError::Schema { ref family, .. }) if family == "test_gauge"));
    }

    #[test]
    fn test_unknown_label_is_schema_error() {
        let gauge = gauge(&["projectID"]);
        let mut list = MetricList::new();
        list.add(labels!("repositoryID" => "r1"), 1.0);

        assert!(list.gauge_set(&gauge).is_err());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_gauge_set_visible_in_registry() {
        let registry = Registry::new();
        let gauge = gauge(&["projectID"]);
        registry.register(Box::new(gauge.clone())).unwrap();

        let mut list = MetricList::new();
        list.add_info(labels!("projectID" => "p1"));
        list.gauge_set(&gauge).unwrap();

        let families = registry.gather();
        assert_eq!(families.len(), 1);
        assert_eq!(families.first().map(|f| f.get_metric().len()), Some(1));
    }

    #[test]
    fn test_labels_with_and_get() {
        let base = labels!("projectID" => "p1", "buildID" => 7);
        let extended = base.with("type", "started");

        assert_eq!(base.get("buildID"), Some("7"));
        assert_eq!(extended.get("type"), Some("started"));
        assert_eq!(base.get("type"), None);
    }
}
