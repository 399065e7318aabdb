//! Metric id to aggregator registry.
//!
//! This is the ingestion entry point and the lifecycle owner of every
//! aggregator:
//! - lock-free reads of existing entries (sharded `DashMap`)
//! - single-winner lazy creation on first ingestion
//! - entries live until explicitly purged

use crate::core::config::{RawWindowConfig, RegistryConfig};
use crate::core::types::{millis_to_datetime, now_millis};
use crate::core::{MetricId, MetricValue, NumericKind, Result, StatsSnapshot, TsaggError};
use crate::memory::arena::NativeArena;
use crate::metrics::aggregator::PeriodAggregator;
use ahash::RandomState;
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Bounds of the currently active period, epoch millis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PeriodBounds {
    /// Period start
    pub start_millis: u64,
    /// Period end
    pub end_millis: u64,
}

/// Concurrent registry of per-metric aggregators.
pub struct Registry {
    aggregators: DashMap<MetricId, PeriodAggregator, RandomState>,
    arena: NativeArena,
    window_config: RawWindowConfig,
    bounds: ArcSwap<PeriodBounds>,
    capacity: usize,
}

/// Initial map capacity: `initial / load_factor`, rounded up to a power of two.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn effective_capacity(config: &RegistryConfig) -> usize {
    let scaled = (config.initial_capacity as f64 / config.load_factor).ceil() as usize;
    scaled.max(1).next_power_of_two()
}

impl Registry {
    /// Create a registry sized from configuration
    pub fn new(
        config: &RegistryConfig,
        window_config: &RawWindowConfig,
        arena: NativeArena,
    ) -> Result<Self> {
        if !(config.load_factor > 0.0 && config.load_factor <= 1.0) {
            return Err(TsaggError::config(format!(
                "registry load factor must be in (0, 1], got {}",
                config.load_factor
            )));
        }

        let capacity = effective_capacity(config);
        let aggregators = match config.shard_amount {
            0 => DashMap::with_capacity_and_hasher(capacity, RandomState::new()),
            shards if shards >= 2 && shards.is_power_of_two() => {
                DashMap::with_capacity_and_hasher_and_shard_amount(
                    capacity,
                    RandomState::new(),
                    shards,
                )
            },
            shards => {
                return Err(TsaggError::config(format!(
                    "registry shard amount must be a power of two >= 2, got {}",
                    shards
                )))
            },
        };

        Ok(Self {
            aggregators,
            arena,
            window_config: window_config.clone(),
            bounds: ArcSwap::from_pointee(PeriodBounds::default()),
            capacity,
        })
    }

    /// Existing aggregator for `id`, or a new one of `kind`.
    ///
    /// Concurrent first access for the same id creates exactly one
    /// aggregator. If the id exists already its original kind wins.
    pub fn get_or_create(&self, id: MetricId, kind: NumericKind) -> Result<PeriodAggregator> {
        if let Some(existing) = self.aggregators.get(&id) {
            return Ok(existing.value().clone());
        }

        match self.aggregators.entry(id) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                // A failed allocation leaves the map untouched.
                let aggregator =
                    PeriodAggregator::create(&self.arena, id, kind, &self.window_config)?;
                entry.insert(aggregator.clone());
                tracing::debug!(metric = id.get(), kind = kind.as_str(), "aggregator created");
                Ok(aggregator)
            },
        }
    }

    /// Ingest one value for `id`, creating its aggregator on first sight.
    ///
    /// Non-finite values are rejected before lookup, so they never create
    /// an entry or fix its kind.
    pub fn process_value(&self, id: MetricId, value: impl Into<MetricValue>) -> Result<()> {
        let value = value.into();
        if !value.is_finite() {
            return Err(TsaggError::invalid_argument(format!(
                "metric {}: non-finite value {}",
                id, value
            )));
        }
        self.get_or_create(id, value.kind())?.process_value(value)
    }

    /// Aggregator for `id`, if registered
    pub fn get(&self, id: MetricId) -> Option<PeriodAggregator> {
        self.aggregators.get(&id).map(|entry| entry.value().clone())
    }

    /// Whether `id` is registered
    pub fn contains(&self, id: MetricId) -> bool {
        self.aggregators.contains_key(&id)
    }

    /// Remove `id`. Its native memory is released once outstanding handles drop.
    pub fn purge(&self, id: MetricId) -> Option<PeriodAggregator> {
        let removed = self.aggregators.remove(&id).map(|(_, aggregator)| aggregator);
        if removed.is_some() {
            tracing::debug!(metric = id.get(), "aggregator purged");
        }
        removed
    }

    /// Remove every aggregator, returning how many were dropped
    pub fn purge_all(&self) -> usize {
        let count = self.aggregators.len();
        self.aggregators.clear();
        tracing::debug!(count, "registry purged");
        count
    }

    /// Registered aggregators
    pub fn aggregator_count(&self) -> usize {
        self.aggregators.len()
    }

    /// True when nothing is registered
    pub fn is_empty(&self) -> bool {
        self.aggregators.is_empty()
    }

    /// Aggregators with raw retention on
    pub fn raw_enabled_count(&self) -> usize {
        self.aggregators
            .iter()
            .filter(|entry| entry.value().is_raw_enabled())
            .count()
    }

    /// All registered ids, unordered
    pub fn ids(&self) -> Vec<MetricId> {
        self.aggregators.iter().map(|entry| *entry.key()).collect()
    }

    /// Reset every aggregator for a new period; returns how many were reset.
    pub fn reset_all(&self) -> Result<usize> {
        let mut reset = 0;
        for entry in self.aggregators.iter() {
            entry.value().reset()?;
            reset += 1;
        }
        Ok(reset)
    }

    /// Consistent per-metric snapshots, sorted by id
    pub fn snapshots(&self) -> Result<Vec<StatsSnapshot>> {
        let mut out = self
            .aggregators
            .iter()
            .map(|entry| entry.value().snapshot())
            .collect::<Result<Vec<_>>>()?;
        out.sort_by_key(|snapshot| snapshot.id);
        Ok(out)
    }

    /// Record the active period bounds (epoch millis).
    pub fn set_period_bounds(&self, start_millis: u64, end_millis: u64) -> Result<()> {
        if end_millis < start_millis {
            return Err(TsaggError::invalid_argument(format!(
                "period end {} precedes start {}",
                end_millis, start_millis
            )));
        }
        self.bounds.store(Arc::new(PeriodBounds {
            start_millis,
            end_millis,
        }));
        Ok(())
    }

    /// Start a period of `length` at the current time and reset every aggregator.
    #[allow(clippy::cast_possible_truncation)]
    pub fn begin_period(&self, length: Duration) -> Result<usize> {
        let start = now_millis();
        let end = start.saturating_add(length.as_millis().min(u128::from(u64::MAX)) as u64);
        self.set_period_bounds(start, end)?;
        self.reset_all()
    }

    /// Active period bounds
    pub fn period_bounds(&self) -> PeriodBounds {
        **self.bounds.load()
    }

    /// Active period start
    pub fn start_time(&self) -> DateTime<Utc> {
        millis_to_datetime(self.period_bounds().start_millis)
    }

    /// Active period end
    pub fn end_time(&self) -> DateTime<Utc> {
        millis_to_datetime(self.period_bounds().end_millis)
    }

    /// Map capacity reserved at construction
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Arena backing the aggregators
    pub fn arena(&self) -> &NativeArena {
        &self.arena
    }
}
