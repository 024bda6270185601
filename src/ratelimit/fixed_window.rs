//! Fixed window rate limiting.
//!
//! Time is bucketed into discrete windows and requests are counted per
//! (key, window index) pair in the shared counter store. Semantics are
//! count-then-check: the bucket is incremented before the limit
//! comparison, so a denied request still consumes its increment and a
//! bucket saturated by denials stays saturated until the window rolls
//! over. The alternative (check-then-count, where denied traffic goes
//! uncounted) is a different policy, not a fix.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::trace;

use super::backend::LimiterBackend;
use super::policy::{now_nanos, Decision, Policy};
use crate::config::RetryConfig;
use crate::store::{with_retries, CounterStore, StoreError};

/// Fixed window limiter over a shared counter store.
pub struct FixedWindowLimiter {
    store: Arc<dyn CounterStore>,
    prefix: String,
    retry: RetryConfig,
}

impl FixedWindowLimiter {
    /// Create a limiter writing buckets under `prefix`.
    pub fn new(store: Arc<dyn CounterStore>, prefix: impl Into<String>, retry: RetryConfig) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            retry,
        }
    }

    /// Bucket key for the window containing `now_ns`: the policy key
    /// plus the window index, namespaced under the prefix.
    fn bucket_key(&self, policy: &Policy, now_ns: i64) -> String {
        format!(
            "{}:{}:{}",
            self.prefix,
            policy.key,
            now_ns / policy.window_nanos()
        )
    }
}

#[async_trait]
impl LimiterBackend for FixedWindowLimiter {
    async fn allow(&self, policy: &Policy) -> Result<Decision, StoreError> {
        let bucket = self.bucket_key(policy, now_nanos());

        // The increment and the bucket's initial TTL are one indivisible
        // store operation, so every bucket expires even if this caller
        // dies right here.
        let count = with_retries(&self.retry, || {
            self.store.increment_with_expiry(&bucket, policy.window)
        })
        .await?;

        if count > policy.limit {
            trace!(
                bucket = %bucket,
                count,
                limit = policy.limit,
                "Fixed window over limit"
            );
            return Ok(Decision {
                allowed: false,
                count,
            });
        }

        // Idempotent refresh, as in the allow path of the window
        // contract; repeated sets to the same TTL are harmless.
        with_retries(&self.retry, || self.store.set_expiry(&bucket, policy.window)).await?;

        Ok(Decision {
            allowed: true,
            count,
        })
    }

    async fn current_usage(&self, policy: &Policy) -> Result<u64, StoreError> {
        let bucket = self.bucket_key(policy, now_nanos());
        let count = with_retries(&self.retry, || self.store.get_integer(&bucket)).await?;
        Ok(count.unwrap_or(0))
    }
}
