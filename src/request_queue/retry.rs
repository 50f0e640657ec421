//! # Rate-Limited Calls with Retry
//!
//! Every external search goes through [`RequestQueue::call_with_retry`]:
//!
//! ```text
//!     attempt 0 ──► wait while paused ──► acquire slot* ──► call ──► Ok ──► return
//!                                                            │
//!                                                           Err
//!                                                            │
//!     attempt n ◄── sleep n × 1s ◄── retries left? ──No──► return original error
//!
//!     * attempt 0 skips the slot when the caller already holds admission;
//!       retries always take a fresh slot.
//! ```
//!
//! Backoff is linear: 1s, 2s, 3s with the defaults, four invocations at most.

use super::{
    processor::RequestQueue,
    search::{AdvancedSearchRequest, CatalogSearch, SearchRequest},
    utils::sleep_for,
};
use std::fmt;
use std::future::Future;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry schedule for one logical call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Retry `n` (1-based) waits `n * base_delay`.
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Creates a policy.
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Never retries.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Delay to sleep after failed attempt `attempt` (0-based), or `None`
    /// once the retries are used up.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt < self.max_retries {
            Some(self.base_delay.saturating_mul(attempt + 1))
        } else {
            None
        }
    }

    /// The full backoff schedule.
    ///
    /// ```rust
    /// use rategate::RetryPolicy;
    /// use std::time::Duration;
    ///
    /// let policy = RetryPolicy::default();
    /// assert_eq!(
    ///     policy.delays(),
    ///     vec![Duration::from_secs(1), Duration::from_secs(2), Duration::from_secs(3)]
    /// );
    /// ```
    pub fn delays(&self) -> Vec<Duration> {
        (0..self.max_retries).filter_map(|attempt| self.delay_for(attempt)).collect()
    }

    /// Invocations made for a call that never succeeds.
    pub fn total_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            super::config::MAX_RETRIES,
            Duration::from_millis(super::config::RETRY_BASE_DELAY_MS),
        )
    }
}

impl RequestQueue {
    /// Retry schedule derived from this queue's configuration.
    pub fn retry_policy(&self) -> RetryPolicy {
        let config = &self.inner.config;
        RetryPolicy::new(
            config.max_retries,
            Duration::from_millis(config.retry_base_delay_ms),
        )
    }

    /// Runs `op` behind the pause gate and the rate limit, retrying failures.
    ///
    /// Each attempt first waits out the pause gate, then takes a queue slot
    /// (attempt 0 only if `acquire_limit` is set; retries always do), then
    /// invokes `op`. A failure with retries left is logged and followed by
    /// the policy's backoff. When retries run out the error from the last
    /// attempt is returned as is.
    ///
    /// Pass `acquire_limit = false` only when the caller already holds a
    /// grant for this call, e.g. the first call of a hand-sequenced batch;
    /// otherwise it would queue behind itself.
    pub async fn call_with_retry<T, E, F, Fut>(
        &self,
        label: &str,
        acquire_limit: bool,
        mut op: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let policy = self.retry_policy();
        let mut attempt = 0u32;

        loop {
            self.wait_while_paused().await;
            if acquire_limit || attempt > 0 {
                self.acquire_slot().await;
            }

            self.inner.total_calls.fetch_add(1, Ordering::Relaxed);
            let err = match op().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!("{} succeeded on attempt {}", label, attempt + 1);
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            match policy.delay_for(attempt) {
                Some(delay) => {
                    attempt += 1;
                    self.inner.total_retries.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        "{} failed: {}; retry {}/{} in {:?}",
                        label, err, attempt, policy.max_retries, delay
                    );
                    sleep_for(delay).await;
                }
                None => {
                    self.inner.total_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        "{} failed after {} attempts: {}",
                        label,
                        attempt + 1,
                        err
                    );
                    return Err(err);
                }
            }
        }
    }

    /// Plain title search through `client`, gated and retried.
    ///
    /// # Errors
    ///
    /// The client's own error from the final attempt, unchanged.
    pub async fn search_with_rate_limit<C>(
        &self,
        client: &C,
        request: &SearchRequest,
        acquire_limit: bool,
    ) -> Result<C::Output, C::Error>
    where
        C: CatalogSearch + ?Sized,
    {
        debug!(
            "Searching '{}' (page {}, per_page {}, bypass_cache {})",
            request.query, request.page, request.per_page, request.bypass_cache
        );
        self.call_with_retry("search", acquire_limit, || client.search(request))
            .await
    }

    /// Filtered search through `client`, gated and retried.
    ///
    /// # Errors
    ///
    /// The client's own error from the final attempt, unchanged.
    pub async fn advanced_search_with_rate_limit<C>(
        &self,
        client: &C,
        request: &AdvancedSearchRequest,
        acquire_limit: bool,
    ) -> Result<C::Output, C::Error>
    where
        C: CatalogSearch + ?Sized,
    {
        debug!(
            "Advanced search '{}' (page {}, {} genres, {} tags, {} formats)",
            request.query,
            request.page,
            request.genres.len(),
            request.tags.len(),
            request.formats.len()
        );
        self.call_with_retry("advanced search", acquire_limit, || {
            client.advanced_search(request)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::QueueConfig;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;
    use tokio::time::{sleep, Instant};

    #[derive(Debug, PartialEq, Eq, thiserror::Error)]
    #[error("catalog returned HTTP {status}")]
    struct HttpError {
        status: u16,
    }

    /// Fails the first `failures` calls with increasing status codes.
    struct FlakyCatalog {
        failures: u32,
        calls: AtomicU32,
        call_times: Mutex<Vec<Instant>>,
        last_bypass: Mutex<Option<bool>>,
    }

    impl FlakyCatalog {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
                call_times: Mutex::new(Vec::new()),
                last_bypass: Mutex::new(None),
            }
        }

        fn respond(&self, bypass_cache: bool) -> Result<String, HttpError> {
            *self.last_bypass.lock() = Some(bypass_cache);
            self.call_times.lock().push(Instant::now());
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(HttpError {
                    status: 500 + call as u16,
                })
            } else {
                Ok(format!("page after {} failures", call))
            }
        }
    }

    #[async_trait]
    impl CatalogSearch for FlakyCatalog {
        type Output = String;
        type Error = HttpError;

        async fn search(&self, request: &SearchRequest) -> Result<String, HttpError> {
            self.respond(request.bypass_cache)
        }

        async fn advanced_search(
            &self,
            request: &AdvancedSearchRequest,
        ) -> Result<String, HttpError> {
            self.respond(request.bypass_cache)
        }
    }

    fn gaps(times: &[Instant]) -> Vec<Duration> {
        times.windows(2).map(|pair| pair[1] - pair[0]).collect()
    }

    #[test]
    fn test_policy_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.total_attempts(), 4);
        assert_eq!(policy.delay_for(0), Some(Duration::from_secs(1)));
        assert_eq!(policy.delay_for(2), Some(Duration::from_secs(3)));
        assert_eq!(policy.delay_for(3), None);

        assert!(RetryPolicy::none().delays().is_empty());
        assert_eq!(RetryPolicy::none().total_attempts(), 1);
    }

    #[test]
    fn test_policy_from_config() {
        let queue = RequestQueue::with_config(QueueConfig::default().with_retries(2, 250));
        assert_eq!(
            queue.retry_policy().delays(),
            vec![Duration::from_millis(250), Duration::from_millis(500)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_first_attempt() {
        let queue = RequestQueue::new();
        let catalog = FlakyCatalog::new(0);

        let page = queue
            .search_with_rate_limit(&catalog, &SearchRequest::new("Monster"), true)
            .await
            .unwrap();

        assert_eq!(page, "page after 0 failures");
        assert_eq!(catalog.calls.load(Ordering::SeqCst), 1);
        assert_eq!(queue.metrics().total_granted, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fails_twice_then_succeeds() {
        let queue = RequestQueue::new();
        let catalog = FlakyCatalog::new(2);

        let page = queue
            .search_with_rate_limit(&catalog, &SearchRequest::new("Pluto"), true)
            .await
            .unwrap();

        assert_eq!(page, "page after 2 failures");
        assert_eq!(catalog.calls.load(Ordering::SeqCst), 3);

        let metrics = queue.metrics();
        assert_eq!(metrics.total_calls, 3);
        assert_eq!(metrics.total_retries, 2);
        assert_eq!(metrics.total_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_return_original_error() {
        // No pacing in the way, so gaps are the backoff alone.
        let config = QueueConfig::new(6_000_000, 0);
        let queue = RequestQueue::with_config(config);
        let catalog = FlakyCatalog::new(u32::MAX);

        let err = queue
            .search_with_rate_limit(&catalog, &SearchRequest::new("20th Century Boys"), true)
            .await
            .unwrap_err();

        assert_eq!(err, HttpError { status: 503 });
        assert_eq!(catalog.calls.load(Ordering::SeqCst), 4);

        let gaps = gaps(&catalog.call_times.lock());
        let expected = [1000u64, 2000, 3000];
        for (gap, ms) in gaps.iter().zip(expected) {
            assert!(*gap >= Duration::from_millis(ms), "gap {:?}", gap);
            assert!(*gap < Duration::from_millis(ms + 20), "gap {:?}", gap);
        }
        assert_eq!(queue.metrics().total_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_always_reacquire_slot() {
        let queue = RequestQueue::new();
        let catalog = FlakyCatalog::new(1);

        queue
            .search_with_rate_limit(&catalog, &SearchRequest::new("Dorohedoro"), false)
            .await
            .unwrap();

        // First attempt skipped the queue, the retry went through it.
        assert_eq!(queue.metrics().total_enqueued, 1);
        assert_eq!(catalog.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_respects_pacing_and_backoff() {
        let queue = RequestQueue::new();
        queue.acquire_slot().await;
        let catalog = FlakyCatalog::new(1);

        queue
            .advanced_search_with_rate_limit(
                &catalog,
                &AdvancedSearchRequest::new("Blame!").format("MANGA"),
                true,
            )
            .await
            .unwrap();

        let times = catalog.call_times.lock().clone();
        let spacing = queue.config().grant_spacing();
        // The retry's 1s backoff is shorter than the grant spacing, so the
        // queue decides when it goes out.
        assert!(gaps(&times)[0] >= spacing);
        assert_eq!(queue.metrics().total_granted, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_blocks_before_each_attempt() {
        let queue = RequestQueue::with_config(QueueConfig::new(6_000_000, 0));
        let catalog = Arc::new(FlakyCatalog::new(1));
        queue.set_paused(true);

        let start = Instant::now();
        let call = {
            let queue = queue.clone();
            let catalog = catalog.clone();
            tokio::spawn(async move {
                queue
                    .search_with_rate_limit(&*catalog, &SearchRequest::new("Akira"), true)
                    .await
            })
        };

        sleep(Duration::from_millis(300)).await;
        assert_eq!(catalog.calls.load(Ordering::SeqCst), 0);
        assert_eq!(queue.pending(), 0);
        queue.set_paused(false);

        // Pause again while the first failure is backing off.
        sleep(Duration::from_millis(10)).await;
        assert_eq!(catalog.calls.load(Ordering::SeqCst), 1);
        queue.set_paused(true);
        sleep(Duration::from_millis(2000)).await;
        assert_eq!(catalog.calls.load(Ordering::SeqCst), 1);
        queue.set_paused(false);

        assert!(call.await.unwrap().is_ok());
        assert_eq!(catalog.calls.load(Ordering::SeqCst), 2);
        assert!(catalog.call_times.lock()[0] - start >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bypass_cache_forwarded() {
        let queue = RequestQueue::new();
        let catalog = FlakyCatalog::new(0);

        queue
            .search_with_rate_limit(
                &catalog,
                &SearchRequest::new("Oyasumi Punpun").bypass_cache(true),
                true,
            )
            .await
            .unwrap();

        assert_eq!(*catalog.last_bypass.lock(), Some(true));
    }
}
