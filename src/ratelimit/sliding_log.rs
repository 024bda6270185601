//! Sliding log rate limiting.
//!
//! Each key has a timestamped log of admitted requests in the shared
//! store; a request is admitted when, after pruning entries older than
//! the trailing window, the log still has a free slot. Pruning, the
//! cardinality check, and the insert happen as one atomic store
//! operation, so a denied request leaves no trace in the log and no
//! caller ever observes a partially pruned or partially inserted log.
//!
//! Unlike the fixed window, the budget recovers continuously: a slot
//! frees the moment the oldest entry ages past `now - window`, not at a
//! boundary.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::trace;
use uuid::Uuid;

use super::backend::LimiterBackend;
use super::policy::{now_nanos, Decision, Policy};
use crate::config::RetryConfig;
use crate::store::{with_retries, CounterStore, StoreError, StoreOp, StoreReply};

/// Sliding log limiter over a shared counter store.
pub struct SlidingLogLimiter {
    store: Arc<dyn CounterStore>,
    prefix: String,
    retry: RetryConfig,
}

impl SlidingLogLimiter {
    /// Create a limiter writing request logs under `prefix`.
    pub fn new(store: Arc<dyn CounterStore>, prefix: impl Into<String>, retry: RetryConfig) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            retry,
        }
    }

    /// Log set key for a policy. The `:log` suffix keeps the namespace
    /// disjoint from fixed window buckets, which end in a window index.
    fn log_key(&self, policy: &Policy) -> String {
        format!("{}:{}:log", self.prefix, policy.key)
    }
}

#[async_trait]
impl LimiterBackend for SlidingLogLimiter {
    async fn allow(&self, policy: &Policy) -> Result<Decision, StoreError> {
        let set = self.log_key(policy);
        let now = now_nanos();
        let cutoff = now - policy.window_nanos();
        // The member carries a unique suffix so two arrivals in the same
        // nanosecond occupy two log slots; the score stays the raw
        // timestamp.
        let member = format!("{}:{}", now, Uuid::new_v4());

        let admission = with_retries(&self.retry, || {
            self.store
                .admit_log_entry(&set, cutoff, now, &member, policy.limit)
        })
        .await?;

        if !admission.admitted {
            trace!(
                set = %set,
                count = admission.count,
                limit = policy.limit,
                "Sliding log over limit"
            );
        }

        Ok(Decision {
            allowed: admission.admitted,
            count: admission.count,
        })
    }

    async fn current_usage(&self, policy: &Policy) -> Result<u64, StoreError> {
        let set = self.log_key(policy);
        let cutoff = now_nanos() - policy.window_nanos();

        let ops = [
            StoreOp::RemoveRangeByScore {
                set: set.clone(),
                min: 0,
                max: cutoff,
            },
            StoreOp::CardinalityOf { set },
        ];
        let replies = with_retries(&self.retry, || self.store.transaction(&ops)).await?;

        match replies.last() {
            Some(StoreReply::Cardinality(count)) => Ok(*count),
            _ => Err(StoreError::Corrupt(
                "cardinality reply missing from usage batch".to_string(),
            )),
        }
    }
}
