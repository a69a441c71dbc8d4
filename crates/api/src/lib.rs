//! HTTP surface over the DLQ monitor, the reprocessor and the performance
//! monitor.
//!
//! Endpoints:
//! - GET  /health                    Liveness
//! - GET  /api/dlq/health            Current DLQ health and alerts
//! - GET  /api/dlq/dashboard         Health, 24h depth history, recommendations
//! - POST /api/dlq/metrics           Collect and publish a DLQ snapshot now
//! - POST /api/dlq/reprocess         Run a reprocessing pass
//! - GET  /api/performance/thresholds
//! - PUT  /api/performance/thresholds
//! - GET  /api/performance/system    Memory, uptime and CPU time

pub mod routes;
pub mod state;
