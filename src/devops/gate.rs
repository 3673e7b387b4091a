//! Process-wide admission control for upstream calls.
//!
//! Every request of every runner acquires a permit from the same semaphore,
//! which caps the number of calls in flight. The gate also owns the retry
//! loop and the request accounting exported as self metrics.

use super::error::{ApiError, Result};
use std::future::Future;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

const BASE_BACKOFF: Duration = Duration::from_millis(200);
const MAX_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub struct RequestGate {
    permits: Semaphore,
    concurrency: usize,
    retries: u32,
    base_backoff: Duration,
    requests: AtomicU64,
    in_flight: AtomicI64,
}

/// Decrements the in-flight gauge when the request finishes or is dropped.
struct InFlight<'a>(&'a AtomicI64);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicI64) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl RequestGate {
    /// `concurrency` is clamped to at least one permit.
    #[must_use]
    pub fn new(concurrency: usize, retries: u32) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            permits: Semaphore::new(concurrency),
            concurrency,
            retries,
            base_backoff: BASE_BACKOFF,
            requests: AtomicU64::new(0),
            in_flight: AtomicI64::new(0),
        }
    }

    #[must_use]
    pub const fn with_backoff(mut self, base: Duration) -> Self {
        self.base_backoff = base;
        self
    }

    #[must_use]
    pub const fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Total number of attempts issued, retries included.
    #[must_use]
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Attempts currently holding a permit.
    #[must_use]
    pub fn current_concurrency(&self) -> i64 {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt);
        self.base_backoff.saturating_mul(factor).min(MAX_BACKOFF)
    }

    /// Run `call` under a permit, retrying retryable failures.
    ///
    /// The permit is released while backing off so a failing endpoint does
    /// not starve the rest of the exporter.
    ///
    /// # Errors
    ///
    /// Returns the last error once retries are exhausted, or the first
    /// non-retryable error.
    pub async fn execute<T, F, Fut>(&self, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            let outcome = {
                let _permit = self
                    .permits
                    .acquire()
                    .await
                    .map_err(|_| ApiError::GateClosed)?;
                let _in_flight = InFlight::enter(&self.in_flight);
                self.requests.fetch_add(1, Ordering::Relaxed);
                call().await
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.retries => {
                    let delay = self.backoff(attempt);
                    attempt += 1;
                    warn!(
                        error = %err,
                        attempt,
                        retries = self.retries,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "upstream request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    debug!(error = %err, attempt, "upstream request failed");
                    return Err(err);
                }
            }
        }
    }
}
