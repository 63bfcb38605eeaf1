//! # Drover Resilience
//!
//! Fault-aware retry execution. Waits are chosen per fault kind from a keyed
//! table of [`drover_config::RetryConfig`] entries and every sleep can be cut
//! short by a shutdown token.

pub mod retry;
pub mod sleep;

pub use retry::*;
pub use sleep::*;
