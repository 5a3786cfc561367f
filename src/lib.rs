//! Bulk message enqueuing: generate uniquely identified messages and deliver
//! them to a queue in service-sized batches, serially or from a bounded pool
//! of concurrent workers.

pub mod aggregate;
pub mod config;
pub mod logging;
pub mod message;
pub mod metrics;
pub mod output;
pub mod plan;
pub mod rate;
pub mod roles;
pub mod time_sync;
pub mod transport;
pub mod worker;
