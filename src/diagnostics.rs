//! Diagnostics surface for management and introspection collaborators.
//!
//! A [`Diagnostics`] value is a cheap point-in-time report: registry size,
//! raw retention usage, period state and (when tracking is on) native
//! allocation totals. Per-metric snapshots are opt-in since they take each
//! aggregator's lock.

use crate::core::{Result, StatsSnapshot};
use crate::memory::arena::ArenaSnapshot;
use crate::metrics::{PeriodBounds, PeriodNormalizer, Registry};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Point-in-time engine report.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostics {
    /// When the report was taken
    pub generated_at: DateTime<Utc>,
    /// Registered aggregators
    pub aggregator_count: usize,
    /// Aggregators retaining raw values
    pub raw_enabled_count: usize,
    /// Registry capacity reserved at construction
    pub registry_capacity: usize,
    /// Distinct canonical periods handed out
    pub cached_periods: usize,
    /// Active period
    pub period_bounds: PeriodBounds,
    /// Native allocation totals, absent unless tracking is enabled
    pub arena: Option<ArenaSnapshot>,
    /// Per-metric stats, only filled by [`Diagnostics::with_metrics`]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub metrics: Vec<StatsSnapshot>,
}

impl Diagnostics {
    /// Gather counters from the registry and normalizer
    pub fn collect(registry: &Registry, normalizer: &PeriodNormalizer) -> Self {
        Self {
            generated_at: Utc::now(),
            aggregator_count: registry.aggregator_count(),
            raw_enabled_count: registry.raw_enabled_count(),
            registry_capacity: registry.capacity(),
            cached_periods: normalizer.cached_periods(),
            period_bounds: registry.period_bounds(),
            arena: registry.arena().snapshot(),
            metrics: Vec::new(),
        }
    }

    /// Attach every metric's consistent snapshot
    pub fn with_metrics(mut self, registry: &Registry) -> Result<Self> {
        self.metrics = registry.snapshots()?;
        Ok(self)
    }

    /// Serialize as pretty JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Emit a one-line structured log of the counters
    pub fn log(&self) {
        match &self.arena {
            Some(arena) => tracing::info!(
                aggregators = self.aggregator_count,
                raw_enabled = self.raw_enabled_count,
                outstanding_bytes = arena.outstanding_bytes,
                outstanding_blocks = arena.outstanding_blocks,
                peak_bytes = arena.peak_bytes,
                "engine diagnostics"
            ),
            None => tracing::info!(
                aggregators = self.aggregator_count,
                raw_enabled = self.raw_enabled_count,
                "engine diagnostics"
            ),
        }
    }
}
