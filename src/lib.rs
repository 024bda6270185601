//! Floodgate - Distributed Rate Limiting Core
//!
//! This crate decides, per client key, whether an incoming request may
//! proceed. Multiple stateless processes enforce one consistent global
//! limit by delegating all coordination to a shared external counter
//! store (Redis in production, an in-process store for tests and
//! single-node use); no in-process locks guard cross-process state.
//!
//! Two algorithms sit behind the [`ratelimit::RateLimiter`] facade: a
//! fixed window counter and a sliding request log.

pub mod config;
pub mod error;
pub mod ratelimit;
pub mod store;

pub use config::FloodgateConfig;
pub use error::{FloodgateError, Result};
pub use ratelimit::{Algorithm, Decision, Policy, RateLimiter};
