//! tsagg - native-memory time-series aggregation engine.
//!
//! tsagg keeps per-metric statistics (count, min, max, running mean and an
//! optional window of raw values) for very large numbers of metric ids,
//! with O(1) ingestion and lock-free reads. Every metric's state is a
//! single 64-byte record in natively allocated, aligned memory and is
//! guarded by a spinlock that lives inside the record itself.
//!
//! # Features
//!
//! - **Per-period aggregation**: count/min/max/mean, reset at period boundaries
//! - **Raw retention**: growable ring of raw values with median and percentiles
//! - **EWMA**: exponentially weighted moving averages with three update strategies
//! - **Period normalization**: requested lengths rounded to a shared canonical set
//! - **Bounded footprint**: explicit purge releases native memory immediately
//!
//! # Architecture
//!
//! - `core`: errors, configuration and value types
//! - `memory`: native arena and the address-keyed spinlock
//! - `metrics`: aggregator, raw window, EWMA, registry, period normalizer
//! - `engine`: the facade collaborators talk to
//! - `scheduler`: background period rollover
//! - `diagnostics`: introspection report
//! - `cli`: command-line load driver
//!
//! # Example
//!
//! ```no_run
//! use tsagg_lib::core::{Config, MetricId};
//! use tsagg_lib::Engine;
//!
//! fn main() -> tsagg_lib::Result<()> {
//!     let engine = Engine::new(Config::default())?;
//!     engine.submit(MetricId(42), 10)?;
//!     engine.submit(MetricId(42), 20)?;
//!
//!     let stats = engine.stats(MetricId(42))?.expect("metric exists");
//!     assert_eq!(stats.count, 2);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

/// Command-line driver
pub mod cli;
/// Errors, configuration and value types
pub mod core;
/// Introspection report
pub mod diagnostics;
/// Engine facade
pub mod engine;
/// Native memory and the in-record lock
pub mod memory;
/// Aggregation state
pub mod metrics;
/// Background period rollover
pub mod scheduler;

// Re-export core types for convenience
pub use crate::core::{Config, Result};
pub use crate::diagnostics::Diagnostics;
pub use crate::engine::Engine;
