//! Period normalization and the canonical period cache.

use crate::core::config::PeriodConfig;
use crate::core::{Result, TsaggError};
use dashmap::DashMap;
use humantime_serde::re::humantime;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Canonical, immutable period descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Period {
    duration: Duration,
    granularity: Duration,
    max_duration: Duration,
}

impl Period {
    /// Canonical length
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Rounding unit
    pub fn granularity(&self) -> Duration {
        self.granularity
    }

    /// Longest allowed period
    pub fn max_duration(&self) -> Duration {
        self.max_duration
    }

    /// Canonical length in whole seconds
    pub fn as_secs(&self) -> u64 {
        self.duration.as_secs()
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", humantime::format_duration(self.duration))
    }
}

/// Rounds requested periods up to the configured granularity.
pub struct PeriodNormalizer {
    granularity_secs: u64,
    max_period_secs: u64,
    cache: DashMap<u64, Arc<Period>>,
}

impl PeriodNormalizer {
    /// Create a normalizer from the period configuration
    pub fn new(config: &PeriodConfig) -> Result<Self> {
        if config.granularity_secs == 0 {
            return Err(TsaggError::config("period granularity must be greater than 0"));
        }
        if config.max_period_secs < config.granularity_secs {
            return Err(TsaggError::config(format!(
                "max period {}s is smaller than granularity {}s",
                config.max_period_secs, config.granularity_secs
            )));
        }

        Ok(Self {
            granularity_secs: config.granularity_secs,
            max_period_secs: config.max_period_secs,
            cache: DashMap::new(),
        })
    }

    /// Round `requested_secs` up to the next multiple of the granularity.
    ///
    /// Requests outside `[1, max_period]` are rejected.
    pub fn round(&self, requested_secs: u64) -> Result<u64> {
        if requested_secs < 1 || requested_secs > self.max_period_secs {
            return Err(TsaggError::invalid_argument(format!(
                "period {}s outside [1, {}]",
                requested_secs, self.max_period_secs
            )));
        }

        let rem = requested_secs % self.granularity_secs;
        if rem == 0 {
            Ok(requested_secs)
        } else {
            Ok(requested_secs + (self.granularity_secs - rem))
        }
    }

    /// Canonical descriptor for `requested_secs`, shared by every request
    /// that rounds to the same value.
    pub fn get_period(&self, requested_secs: u64) -> Result<Arc<Period>> {
        let canonical = self.round(requested_secs)?;
        let entry = self.cache.entry(canonical).or_insert_with(|| {
            Arc::new(Period {
                duration: Duration::from_secs(canonical),
                granularity: Duration::from_secs(self.granularity_secs),
                max_duration: Duration::from_secs(self.max_period_secs),
            })
        });
        Ok(Arc::clone(entry.value()))
    }

    /// Number of distinct canonical periods handed out
    pub fn cached_periods(&self) -> usize {
        self.cache.len()
    }

    /// Rounding unit in seconds
    pub fn granularity_secs(&self) -> u64 {
        self.granularity_secs
    }

    /// Longest allowed period in seconds
    pub fn max_period_secs(&self) -> u64 {
        self.max_period_secs
    }
}
