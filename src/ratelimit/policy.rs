//! Rate limit policies and evaluation outcomes.

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::{FloodgateError, Result};

/// Algorithm used to evaluate a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    /// Discrete windows with one counter per (key, window index)
    #[default]
    FixedWindow,
    /// Trailing window over a timestamped request log
    SlidingLog,
}

/// One rate limit to enforce: at most `limit` requests per `window` for
/// the client identified by `key`.
///
/// Policies are immutable per evaluation and are not persisted by the
/// core; the caller supplies one on every call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    /// Client key the limit applies to
    pub key: String,
    /// Maximum requests per window; zero denies everything
    pub limit: u64,
    /// Length of the window
    pub window: Duration,
}

impl Policy {
    /// Create a new policy.
    pub fn new(key: impl Into<String>, limit: u64, window: Duration) -> Self {
        Self {
            key: key.into(),
            limit,
            window,
        }
    }

    /// Reject unusable policies before any store round-trip.
    ///
    /// A `limit` of zero is a valid policy that denies every request.
    /// Only an empty key or a zero window is rejected, since no bucket
    /// index or log cutoff can be derived from them.
    pub fn validate(&self) -> Result<()> {
        if self.key.is_empty() {
            return Err(FloodgateError::InvalidPolicy(
                "policy key must not be empty".to_string(),
            ));
        }
        if self.window.is_zero() {
            return Err(FloodgateError::InvalidPolicy(
                "policy window must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Window length in nanoseconds, clamped to the i64 timestamp domain.
    pub(crate) fn window_nanos(&self) -> i64 {
        self.window.as_nanos().min(i64::MAX as u128).max(1) as i64
    }
}

impl std::fmt::Display for Policy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}/{:?}", self.key, self.limit, self.window)
    }
}

/// Outcome of one successful evaluation.
///
/// A `Decision` exists only when every store round-trip completed; store
/// failures surface as errors instead, never as an implicit allow or
/// deny.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Usage observed by this evaluation: the post-increment bucket
    /// count (fixed window) or the log cardinality after pruning
    /// (sliding log)
    pub count: u64,
}

/// Current time as nanoseconds since the Unix epoch.
///
/// All window arithmetic in this crate is done in nanoseconds end to end.
pub(crate) fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before Unix epoch")
        .as_nanos() as i64
}
