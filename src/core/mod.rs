//! Core domain types, configuration and errors for tsagg.
//!
//! Everything else in the crate builds on these.

#![warn(missing_docs)]

/// Configuration tree and builder
pub mod config;
/// Error type and result alias
pub mod error;
/// Ids, values and snapshots
pub mod types;

// Re-export commonly used types
pub use config::{Config, ConfigBuilder, EwmaStrategy};
pub use error::{Result, TsaggError};
pub use types::{MetricId, MetricValue, NumericKind, StatsSnapshot};
