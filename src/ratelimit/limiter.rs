//! Decision facade over the limiter algorithms.

use std::sync::Arc;

use tracing::debug;

use super::backend::LimiterBackend;
use super::fixed_window::FixedWindowLimiter;
use super::policy::{Algorithm, Decision, Policy};
use super::sliding_log::SlidingLogLimiter;
use crate::config::{FloodgateConfig, RetryConfig, DEFAULT_KEY_PREFIX};
use crate::error::Result;
use crate::store::{CounterStore, RedisCounterStore};

/// The single entry point callers invoke once per incoming request per
/// policy.
///
/// A thin dispatcher: it validates the policy, forwards it unchanged to
/// the configured algorithm, and emits one structured decision event per
/// evaluation for external collectors. It carries no state of its own;
/// all coordination lives in the counter store, so one instance can be
/// shared freely across tasks and processes.
pub struct RateLimiter {
    backend: Box<dyn LimiterBackend>,
    algorithm: Algorithm,
}

impl RateLimiter {
    /// Create a limiter with the default key prefix and retry behavior.
    pub fn new(algorithm: Algorithm, store: Arc<dyn CounterStore>) -> Self {
        Self::with_config(algorithm, store, DEFAULT_KEY_PREFIX, RetryConfig::default())
    }

    /// Create a limiter with an explicit key prefix and retry behavior.
    pub fn with_config(
        algorithm: Algorithm,
        store: Arc<dyn CounterStore>,
        key_prefix: &str,
        retry: RetryConfig,
    ) -> Self {
        let backend: Box<dyn LimiterBackend> = match algorithm {
            Algorithm::FixedWindow => {
                Box::new(FixedWindowLimiter::new(store, key_prefix, retry))
            }
            Algorithm::SlidingLog => Box::new(SlidingLogLimiter::new(store, key_prefix, retry)),
        };
        Self { backend, algorithm }
    }

    /// Connect to the Redis counter store described by `config` and
    /// build a limiter over it.
    pub async fn connect(config: &FloodgateConfig) -> Result<Self> {
        let store = Arc::new(RedisCounterStore::new(&config.store).await?);
        Ok(Self::with_config(
            config.algorithm,
            store,
            &config.store.key_prefix,
            config.retry.clone(),
        ))
    }

    /// Evaluate one incoming request against `policy`.
    ///
    /// Returns a [`Decision`] when the evaluation completed, or an error
    /// when the policy is invalid or the store could not be reached; an
    /// error is never equivalent to a denial.
    pub async fn allow(&self, policy: &Policy) -> Result<Decision> {
        policy.validate()?;

        let decision = self.backend.allow(policy).await?;

        debug!(
            key = %policy.key,
            algorithm = ?self.algorithm,
            allowed = decision.allowed,
            count = decision.count,
            limit = policy.limit,
            "Rate limit decision"
        );

        Ok(decision)
    }

    /// Read the usage the store currently holds for `policy` without
    /// recording a request. Primarily useful for tests and diagnostics.
    pub async fn current_usage(&self, policy: &Policy) -> Result<u64> {
        policy.validate()?;
        Ok(self.backend.current_usage(policy).await?)
    }

    /// The algorithm this limiter dispatches to.
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FloodgateError;
    use crate::store::{LogAdmission, MemoryCounterStore, StoreError, StoreOp, StoreReply};
    use async_trait::async_trait;
    use futures::future::join_all;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Store whose every operation fails, for failure injection.
    struct FailingStore;

    #[async_trait]
    impl CounterStore for FailingStore {
        async fn increment_with_expiry(
            &self,
            _key: &str,
            _ttl: Duration,
        ) -> std::result::Result<u64, StoreError> {
            Err(StoreError::Unavailable("injected".to_string()))
        }

        async fn set_expiry(
            &self,
            _key: &str,
            _ttl: Duration,
        ) -> std::result::Result<(), StoreError> {
            Err(StoreError::Unavailable("injected".to_string()))
        }

        async fn get_integer(
            &self,
            _key: &str,
        ) -> std::result::Result<Option<u64>, StoreError> {
            Err(StoreError::Unavailable("injected".to_string()))
        }

        async fn transaction(
            &self,
            _ops: &[StoreOp],
        ) -> std::result::Result<Vec<StoreReply>, StoreError> {
            Err(StoreError::Unavailable("injected".to_string()))
        }

        async fn admit_log_entry(
            &self,
            _set: &str,
            _cutoff_ns: i64,
            _score_ns: i64,
            _member: &str,
            _limit: u64,
        ) -> std::result::Result<LogAdmission, StoreError> {
            Err(StoreError::Unavailable("injected".to_string()))
        }
    }

    /// Store that reports aborted transactions a fixed number of times
    /// before delegating to a real in-memory store.
    struct FlakyStore {
        inner: MemoryCounterStore,
        aborts_left: AtomicU32,
    }

    impl FlakyStore {
        fn new(aborts: u32) -> Self {
            Self {
                inner: MemoryCounterStore::new(),
                aborts_left: AtomicU32::new(aborts),
            }
        }

        fn maybe_abort(&self) -> std::result::Result<(), StoreError> {
            let aborted = self
                .aborts_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
            if aborted.is_ok() {
                Err(StoreError::TransactionAborted("contention".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl CounterStore for FlakyStore {
        async fn increment_with_expiry(
            &self,
            key: &str,
            ttl: Duration,
        ) -> std::result::Result<u64, StoreError> {
            self.maybe_abort()?;
            self.inner.increment_with_expiry(key, ttl).await
        }

        async fn set_expiry(
            &self,
            key: &str,
            ttl: Duration,
        ) -> std::result::Result<(), StoreError> {
            self.maybe_abort()?;
            self.inner.set_expiry(key, ttl).await
        }

        async fn get_integer(
            &self,
            key: &str,
        ) -> std::result::Result<Option<u64>, StoreError> {
            self.maybe_abort()?;
            self.inner.get_integer(key).await
        }

        async fn transaction(
            &self,
            ops: &[StoreOp],
        ) -> std::result::Result<Vec<StoreReply>, StoreError> {
            self.maybe_abort()?;
            self.inner.transaction(ops).await
        }

        async fn admit_log_entry(
            &self,
            set: &str,
            cutoff_ns: i64,
            score_ns: i64,
            member: &str,
            limit: u64,
        ) -> std::result::Result<LogAdmission, StoreError> {
            self.maybe_abort()?;
            self.inner
                .admit_log_entry(set, cutoff_ns, score_ns, member, limit)
                .await
        }
    }

    fn memory_limiter(algorithm: Algorithm) -> RateLimiter {
        RateLimiter::new(algorithm, Arc::new(MemoryCounterStore::new()))
    }

    const LONG_WINDOW: Duration = Duration::from_secs(3600);

    #[tokio::test]
    async fn test_invalid_policy_rejected_before_store_access() {
        // A failing store proves no round-trip happened: touching it
        // would surface StoreUnavailable, not InvalidPolicy.
        let limiter = RateLimiter::new(Algorithm::FixedWindow, Arc::new(FailingStore));
        let policy = Policy::new("k", 10, Duration::ZERO);

        let err = limiter.allow(&policy).await.unwrap_err();
        assert!(matches!(err, FloodgateError::InvalidPolicy(_)));
    }

    #[tokio::test]
    async fn test_store_failure_is_an_error_not_a_decision() {
        for algorithm in [Algorithm::FixedWindow, Algorithm::SlidingLog] {
            let limiter = RateLimiter::new(algorithm, Arc::new(FailingStore));
            let policy = Policy::new("k", 10, LONG_WINDOW);

            let err = limiter.allow(&policy).await.unwrap_err();
            assert!(matches!(err, FloodgateError::StoreUnavailable(_)));
        }
    }

    #[tokio::test]
    async fn test_transient_aborts_are_retried() {
        let limiter = RateLimiter::with_config(
            Algorithm::SlidingLog,
            Arc::new(FlakyStore::new(2)),
            "test",
            RetryConfig {
                max_attempts: 3,
                backoff_base_ms: 1,
            },
        );
        let policy = Policy::new("k", 10, LONG_WINDOW);

        let decision = limiter.allow(&policy).await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.count, 1);
    }

    #[tokio::test]
    async fn test_current_usage_retries_transient_aborts() {
        // Usage reads honor the same retry policy as evaluations.
        for algorithm in [Algorithm::FixedWindow, Algorithm::SlidingLog] {
            let limiter = RateLimiter::with_config(
                algorithm,
                Arc::new(FlakyStore::new(2)),
                "test",
                RetryConfig {
                    max_attempts: 3,
                    backoff_base_ms: 1,
                },
            );
            let policy = Policy::new("k", 10, LONG_WINDOW);

            assert_eq!(
                limiter.current_usage(&policy).await.unwrap(),
                0,
                "algorithm {algorithm:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_persistent_aborts_surface_as_store_unavailable() {
        let limiter = RateLimiter::with_config(
            Algorithm::FixedWindow,
            Arc::new(FlakyStore::new(100)),
            "test",
            RetryConfig {
                max_attempts: 3,
                backoff_base_ms: 1,
            },
        );
        let policy = Policy::new("k", 10, LONG_WINDOW);

        let err = limiter.allow(&policy).await.unwrap_err();
        assert!(matches!(err, FloodgateError::StoreUnavailable(_)));
    }

    #[tokio::test]
    async fn test_both_algorithms_behind_one_interface() {
        for algorithm in [Algorithm::FixedWindow, Algorithm::SlidingLog] {
            let limiter = memory_limiter(algorithm);
            let policy = Policy::new("k", 2, LONG_WINDOW);

            assert!(limiter.allow(&policy).await.unwrap().allowed);
            assert!(limiter.allow(&policy).await.unwrap().allowed);
            assert!(!limiter.allow(&policy).await.unwrap().allowed);

            // Count-then-check means the fixed window bucket counted the
            // denied request too; the sliding log never logged it.
            let expected = match algorithm {
                Algorithm::FixedWindow => 3,
                Algorithm::SlidingLog => 2,
            };
            assert_eq!(
                limiter.current_usage(&policy).await.unwrap(),
                expected,
                "algorithm {algorithm:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_concurrent_callers_get_exactly_limit_allows() {
        // The linearizability property: with M simultaneous callers and
        // limit slots, exactly limit are allowed, for both algorithms.
        for algorithm in [Algorithm::FixedWindow, Algorithm::SlidingLog] {
            let limiter = Arc::new(memory_limiter(algorithm));
            let policy = Policy::new("k", 5, LONG_WINDOW);

            let calls = (0..20).map(|_| {
                let limiter = Arc::clone(&limiter);
                let policy = policy.clone();
                tokio::spawn(async move { limiter.allow(&policy).await.unwrap().allowed })
            });
            let outcomes = join_all(calls).await;

            let allowed = outcomes
                .into_iter()
                .filter(|outcome| *outcome.as_ref().unwrap())
                .count();
            assert_eq!(allowed, 5, "algorithm {algorithm:?}");
        }
    }

    #[tokio::test]
    async fn test_three_per_second_scenario() {
        // limit=3, window=1s: four quick calls give allow,allow,allow,
        // deny; just past the window a fifth call is allowed again under
        // both algorithms.
        for algorithm in [Algorithm::FixedWindow, Algorithm::SlidingLog] {
            let limiter = memory_limiter(algorithm);
            let policy = Policy::new("k", 3, Duration::from_secs(1));

            // Start just after an epoch-aligned boundary so the four
            // quick calls cannot straddle two fixed windows.
            let into_window = crate::ratelimit::policy::now_nanos() % 1_000_000_000;
            tokio::time::sleep(Duration::from_nanos(
                (1_000_000_000 - into_window) as u64 + 5_000_000,
            ))
            .await;

            for _ in 0..3 {
                assert!(limiter.allow(&policy).await.unwrap().allowed);
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            assert!(!limiter.allow(&policy).await.unwrap().allowed);

            tokio::time::sleep(Duration::from_millis(1100)).await;
            assert!(
                limiter.allow(&policy).await.unwrap().allowed,
                "algorithm {algorithm:?}"
            );
        }
    }
}
