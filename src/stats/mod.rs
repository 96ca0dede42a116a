//! Statistics and metrics
//!
//! Counters kept by a client session.

pub mod metrics;

pub use metrics::SessionStats;
