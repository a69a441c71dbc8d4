//! Redis-backed queue provider and metrics sink.

pub mod metrics;
pub mod queue;

pub use metrics::RedisMetricsSink;
pub use queue::RedisQueue;

/// Prefix for every key this crate writes.
pub const KEY_PREFIX: &str = "courier";
