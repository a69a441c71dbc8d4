//! Shared building blocks for the Courier notification reliability services.

pub mod config;
pub mod db;
pub mod error;
pub mod memory;
pub mod providers;
pub mod redis_pool;
pub mod types;
