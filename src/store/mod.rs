//! Counter store abstraction shared by all limiter algorithms.
//!
//! The store is the only shared mutable resource in the system: every
//! process evaluating policies coordinates exclusively through the
//! atomicity guarantees exposed here. No caller-side component caches
//! counts across calls or holds a lock across a store round-trip.

mod memory;
mod redis;

pub use self::redis::RedisCounterStore;
pub use memory::MemoryCounterStore;

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use thiserror::Error;
use tracing::debug;

use crate::config::RetryConfig;

/// Errors surfaced by counter store adapters.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Connection, timeout, or I/O failure. The fate of the in-flight
    /// operation is unknown, so it must not be retried blindly.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store reported a failed atomic batch. Nothing was applied;
    /// safe to retry.
    #[error("store transaction aborted: {0}")]
    TransactionAborted(String),

    /// The store returned a reply this client cannot interpret.
    #[error("malformed store reply: {0}")]
    Corrupt(String),
}

impl From<StoreError> for crate::error::FloodgateError {
    fn from(e: StoreError) -> Self {
        crate::error::FloodgateError::StoreUnavailable(e.to_string())
    }
}

/// One operation in a transactional batch against sorted sets.
#[derive(Debug, Clone)]
pub enum StoreOp {
    /// Remove every member of `set` with a score in `[min, max]`.
    RemoveRangeByScore { set: String, min: i64, max: i64 },
    /// Insert `member` into `set` with the given score, replacing the
    /// score of an existing member.
    AddToSet {
        set: String,
        score: i64,
        member: String,
    },
    /// Read the number of members in `set`.
    CardinalityOf { set: String },
}

/// Reply to one [`StoreOp`], in batch order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreReply {
    /// Members removed by `RemoveRangeByScore`
    Removed(u64),
    /// New members added by `AddToSet` (0 if the member already existed)
    Added(u64),
    /// Cardinality read by `CardinalityOf`
    Cardinality(u64),
}

/// Outcome of a conditional log admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogAdmission {
    /// Whether the new entry was inserted.
    pub admitted: bool,
    /// Log cardinality after pruning, including the new entry when
    /// admitted.
    pub count: u64,
}

/// Atomic counter and ordered-set operations offered by an external store.
///
/// Implementations must guarantee that each method executes as one
/// indivisible unit with respect to concurrent callers on the same keys.
/// How that atomicity is achieved is the adapter's business; the limiter
/// core assumes nothing beyond this contract.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increment the integer at `key` by one and return the
    /// post-increment value. When the increment creates the key, its
    /// time-to-live is set to `ttl` in the same indivisible unit, so no
    /// counter can outlive its window even if the caller dies immediately
    /// afterwards.
    async fn increment_with_expiry(&self, key: &str, ttl: Duration) -> Result<u64, StoreError>;

    /// Reset the time-to-live of `key` to `ttl`. A no-op for missing
    /// keys; repeated calls with the same `ttl` are harmless.
    async fn set_expiry(&self, key: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Read the integer at `key`, or `None` when the key is absent or
    /// expired.
    async fn get_integer(&self, key: &str) -> Result<Option<u64>, StoreError>;

    /// Execute `ops` as one all-or-nothing transaction, isolated from
    /// concurrent batches on the same keys, and return one reply per
    /// operation in order.
    async fn transaction(&self, ops: &[StoreOp]) -> Result<Vec<StoreReply>, StoreError>;

    /// Atomically prune `set` of entries with score at or below
    /// `cutoff_ns`, then insert `member` with score `score_ns` only if
    /// the pruned cardinality is still below `limit`.
    ///
    /// A plain transactional batch cannot branch on an intermediate
    /// value, so conditional admission into the request log is a
    /// first-class store operation. A rejected entry leaves no trace in
    /// the set.
    async fn admit_log_entry(
        &self,
        set: &str,
        cutoff_ns: i64,
        score_ns: i64,
        member: &str,
        limit: u64,
    ) -> Result<LogAdmission, StoreError>;
}

/// Run `op`, retrying aborted transactions with jittered exponential
/// backoff up to the configured attempt budget. Any other error, and an
/// abort that survives the budget, is returned as-is.
pub(crate) async fn with_retries<T, F, Fut>(
    retry: &RetryConfig,
    mut op: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, StoreError>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Err(StoreError::TransactionAborted(reason)) if attempt + 1 < retry.max_attempts => {
                attempt += 1;
                let base = retry.backoff_base_ms.max(1) << attempt.min(6);
                let jitter = rand::thread_rng().gen_range(0..=base / 2);
                debug!(
                    attempt,
                    reason = %reason,
                    backoff_ms = base + jitter,
                    "Retrying aborted store transaction"
                );
                tokio::time::sleep(Duration::from_millis(base + jitter)).await;
            }
            result => return result,
        }
    }
}
