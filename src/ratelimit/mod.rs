//! Rate limiting algorithms and the decision facade.

mod backend;
mod fixed_window;
mod limiter;
mod policy;
mod sliding_log;

pub use backend::LimiterBackend;
pub use fixed_window::FixedWindowLimiter;
pub use limiter::RateLimiter;
pub use policy::{Algorithm, Decision, Policy};
pub use sliding_log::SlidingLogLimiter;
