//! Idempotent handling of redelivered webhook messages.

pub mod cache;
pub mod coalesce;
pub mod in_flight;

pub use cache::IdempotencyCache;
pub use coalesce::{Begin, Claim, CoalesceConfig, Coalescer, InFlightGuard};
pub use in_flight::InFlightTracker;
