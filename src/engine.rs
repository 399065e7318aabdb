//! Engine: wires the arena, registry and period normalizer together.
//!
//! Collaborators (transport, subscription broker, management endpoints)
//! talk to the core only through this type.

use crate::core::{Config, MetricId, MetricValue, NumericKind, Result, StatsSnapshot, TsaggError};
use crate::diagnostics::Diagnostics;
use crate::memory::arena::NativeArena;
use crate::metrics::ewma::{build_ewma, MovingAverage};
use crate::metrics::{Period, PeriodAggregator, PeriodNormalizer, Registry};
use std::sync::Arc;

/// Aggregation engine built from one resolved [`Config`].
pub struct Engine {
    config: Config,
    arena: NativeArena,
    registry: Arc<Registry>,
    normalizer: Arc<PeriodNormalizer>,
}

impl Engine {
    /// Create a new engine with the given configuration.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let arena = NativeArena::new(&config.memory)?;
        let registry = Arc::new(Registry::new(
            &config.registry,
            &config.raw_window,
            arena.clone(),
        )?);
        let normalizer = Arc::new(PeriodNormalizer::new(&config.period)?);

        tracing::info!(
            capacity = registry.capacity(),
            granularity_secs = config.period.granularity_secs,
            max_period_secs = config.period.max_period_secs,
            tracking = arena.is_tracking(),
            "aggregation engine ready"
        );

        Ok(Self {
            config,
            arena,
            registry,
            normalizer,
        })
    }

    /// Ingest one value. The sole write entry point.
    #[inline]
    pub fn submit(&self, id: MetricId, value: impl Into<MetricValue>) -> Result<()> {
        self.registry.process_value(id, value)
    }

    /// Pre-register a metric with an explicit kind.
    pub fn register(&self, id: MetricId, kind: NumericKind) -> Result<PeriodAggregator> {
        self.registry.get_or_create(id, kind)
    }

    /// Aggregator handle for `id`, if registered
    pub fn aggregator(&self, id: MetricId) -> Option<PeriodAggregator> {
        self.registry.get(id)
    }

    /// Consistent stats for one metric, `None` if it was never seen
    pub fn stats(&self, id: MetricId) -> Result<Option<StatsSnapshot>> {
        self.aggregator(id).map(|agg| agg.snapshot()).transpose()
    }

    /// Toggle raw value retention for an existing metric.
    pub fn set_raw_enabled(&self, id: MetricId, enabled: bool) -> Result<()> {
        let aggregator = self
            .aggregator(id)
            .ok_or_else(|| TsaggError::invalid_argument(format!("unknown metric {}", id)))?;
        aggregator.set_raw_enabled(enabled)
    }

    /// Median of a metric's raw window
    pub fn median(&self, id: MetricId) -> Result<Option<f64>> {
        self.aggregator(id)
            .ok_or_else(|| TsaggError::invalid_argument(format!("unknown metric {}", id)))?
            .median()
    }

    /// Remove a metric and release its native memory
    pub fn purge(&self, id: MetricId) -> bool {
        self.registry.purge(id).is_some()
    }

    /// Period boundary: reset every aggregator and record the new bounds.
    pub fn rollover(&self, period: &Period) -> Result<usize> {
        let reset = self.registry.begin_period(period.duration())?;
        tracing::info!(reset, period = %period, "period rollover");
        Ok(reset)
    }

    /// Canonical period for `seconds`
    pub fn period(&self, seconds: u64) -> Result<Arc<Period>> {
        self.normalizer.get_period(seconds)
    }

    /// Canonical form of the configured default period
    pub fn default_period(&self) -> Result<Arc<Period>> {
        self.normalizer.get_period(self.config.period.default_period_secs)
    }

    /// EWMA over `window_size` ticks using the configured strategy
    pub fn ewma(&self, window_size: u64) -> Result<Box<dyn MovingAverage>> {
        build_ewma(&self.arena, window_size, self.config.ewma.strategy)
    }

    /// EWMA with the configured default window
    pub fn default_ewma(&self) -> Result<Box<dyn MovingAverage>> {
        self.ewma(self.config.ewma.default_window)
    }

    /// Diagnostics without per-metric detail
    pub fn diagnostics(&self) -> Diagnostics {
        Diagnostics::collect(&self.registry, &self.normalizer)
    }

    /// Diagnostics including every metric's snapshot
    pub fn diagnostics_with_metrics(&self) -> Result<Diagnostics> {
        Diagnostics::collect(&self.registry, &self.normalizer).with_metrics(&self.registry)
    }

    /// Shared registry
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Shared period normalizer
    pub fn normalizer(&self) -> &Arc<PeriodNormalizer> {
        &self.normalizer
    }

    /// Arena backing every record
    pub fn arena(&self) -> &NativeArena {
        &self.arena
    }

    /// Configuration the engine was built from
    pub fn config(&self) -> &Config {
        &self.config
    }
}
