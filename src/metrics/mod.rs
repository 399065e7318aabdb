//! Per-metric aggregation state.
//!
//! Performance targets:
//! - O(1) ingestion per value (amortized when raw retention is on)
//! - one 64-byte native record per metric, no per-metric lock objects
//! - lock-free per-field reads

/// Per-metric period statistics
pub mod aggregator;
/// Moving averages
pub mod ewma;
/// Canonical periods
pub mod period;
/// Raw value retention
pub mod raw_window;
/// Id to aggregator map
pub mod registry;

pub use aggregator::PeriodAggregator;
pub use ewma::{
    build_ewma, Blocking, Ewma, MovingAverage, MutexEwma, SpinEwma, SpinLocked, UnsyncEwma,
    Unsynchronized, UpdateStrategy,
};
pub use period::{Period, PeriodNormalizer};
pub use raw_window::{RawValueWindow, SampleRing};
pub use registry::{PeriodBounds, Registry};
