use super::metric_list::{MetricError, MetricList};
use prometheus::{CounterVec, GaugeVec, HistogramVec};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc::UnboundedSender;
use tracing::warn;

/// Deferred write into a published family, executed by the aggregator.
pub type Publication = Box<dyn FnOnce() -> Result<(), MetricError> + Send>;

/// Staging area for one fan-out unit.
///
/// Publications stay here until the unit finishes. The runner forwards them
/// to the pass channel only if the unit succeeded, so a failing unit never
/// contributes partial data.
#[derive(Default)]
pub struct Publisher {
    staged: Mutex<Vec<Publication>>,
}

impl Publisher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn staged(&self) -> MutexGuard<'_, Vec<Publication>> {
        match self.staged.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Publisher mutex was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    pub fn publish<F>(&self, publication: F)
    where
        F: FnOnce() -> Result<(), MetricError> + Send + 'static,
    {
        self.staged().push(Box::new(publication));
    }

    pub fn gauge(&self, list: MetricList, gauge: &GaugeVec) {
        let gauge = gauge.clone();
        self.publish(move || list.gauge_set(&gauge));
    }

    pub fn counter(&self, list: MetricList, counter: &CounterVec) {
        let counter = counter.clone();
        self.publish(move || list.counter_add(&counter));
    }

    pub fn summary(&self, list: MetricList, summary: &HistogramVec) {
        let summary = summary.clone();
        self.publish(move || list.summary_set(&summary));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.staged().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hand every staged publication to the pass channel, in staging order.
    pub(crate) fn forward(self, tx: &UnboundedSender<Publication>) -> usize {
        let staged = match self.staged.into_inner() {
            Ok(staged) => staged,
            Err(poisoned) => poisoned.into_inner(),
        };
        let count = staged.len();
        for publication in staged {
            // The aggregator outlives every producer of its pass.
            if tx.send(publication).is_err() {
                warn!("pass channel closed before publications were forwarded");
                return 0;
            }
        }
        count
    }

    /// Run every staged publication directly. Test helper.
    ///
    /// # Errors
    ///
    /// Returns the first schema error.
    #[cfg(test)]
    pub fn replay(self) -> Result<usize, MetricError> {
        let staged = self.staged.into_inner().unwrap_or_default();
        let count = staged.len();
        for publication in staged {
            publication()?;
        }
        Ok(count)
    }
}
