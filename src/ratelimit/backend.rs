//! Limiter algorithm trait behind the decision facade.

use async_trait::async_trait;

use super::policy::{Decision, Policy};
use crate::store::StoreError;

/// Trait implemented by every rate limiting algorithm.
///
/// Implementations hold no cross-call state of their own; all shared
/// state lives in the counter store, so one instance serves any number
/// of concurrent callers across any number of processes.
#[async_trait]
pub trait LimiterBackend: Send + Sync {
    /// Evaluate one incoming request against `policy`.
    ///
    /// The policy is assumed to be validated; the facade rejects invalid
    /// policies before dispatching here.
    async fn allow(&self, policy: &Policy) -> Result<Decision, StoreError>;

    /// Read the usage the store currently holds for `policy` without
    /// recording a request.
    async fn current_usage(&self, policy: &Policy) -> Result<u64, StoreError>;
}
