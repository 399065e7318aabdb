//! Configuration management for tsagg.
//!
//! This module provides configuration handling with:
//! - YAML file support
//! - Builder overrides for programmatic and CLI use
//! - Validation and defaults
//!
//! The aggregation core never reads files itself; a `Config` is resolved
//! up front and injected into [`crate::Engine`].

use crate::core::{Result, TsaggError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Complete configuration for tsagg
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Raw value window sizing
    pub raw_window: RawWindowConfig,
    /// Registry sizing
    pub registry: RegistryConfig,
    /// Period normalization
    pub period: PeriodConfig,
    /// Native memory arena
    pub memory: MemoryConfig,
    /// EWMA defaults
    pub ewma: EwmaConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Debug mode
    #[serde(skip)]
    pub debug: bool,
}

/// Raw value window capacities, shared by every metric.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RawWindowConfig {
    /// Slots allocated when raw retention is switched on
    pub initial_slots: usize,
    /// Slots added each time the window runs out of room
    pub resize_slots: usize,
    /// Hard ceiling; beyond it the oldest samples are evicted
    pub max_slots: usize,
}

/// Registry sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Expected number of metrics
    pub initial_capacity: usize,
    /// Space/speed tradeoff: lower values reserve more room up front
    pub load_factor: f64,
    /// Number of map shards, 0 lets the map decide
    pub shard_amount: usize,
}

/// Period normalization
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeriodConfig {
    /// Every period is rounded up to a multiple of this
    pub granularity_secs: u64,
    /// Largest accepted period
    pub max_period_secs: u64,
    /// Period driven by the rollover scheduler
    pub default_period_secs: u64,
}

/// Native memory arena
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Block alignment in bytes (power of two)
    pub alignment: usize,
    /// Track outstanding native allocations
    pub tracking: bool,
}

/// EWMA defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EwmaConfig {
    /// Window length in ticks
    pub default_window: u64,
    /// Synchronization strategy
    pub strategy: EwmaStrategy,
}

/// EWMA synchronization strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EwmaStrategy {
    /// Plain loads and stores, single writer
    Unsynchronized,
    /// In-record spinlock
    Spin,
    /// Blocking mutex
    Mutex,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: LogLevel,
    /// How often the CLI logs a diagnostics line
    #[serde(with = "humantime_serde")]
    pub report_interval: Duration,
}

/// Log levels
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Most verbose
    Trace,
    /// Debugging detail
    Debug,
    /// Default
    Info,
    /// Warnings only
    Warn,
    /// Errors only
    Error,
}

impl Default for RawWindowConfig {
    fn default() -> Self {
        RawWindowConfig {
            initial_slots: 16,
            resize_slots: 16,
            max_slots: 1024,
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        RegistryConfig {
            initial_capacity: 1024,
            load_factor: 0.75,
            shard_amount: 0,
        }
    }
}

impl Default for PeriodConfig {
    fn default() -> Self {
        PeriodConfig {
            granularity_secs: 5,
            max_period_secs: 300,
            default_period_secs: 60,
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        MemoryConfig {
            alignment: 64, // one cache line
            tracking: false,
        }
    }
}

impl Default for EwmaConfig {
    fn default() -> Self {
        EwmaConfig {
            default_window: 10,
            strategy: EwmaStrategy::Spin,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: LogLevel::Info,
            report_interval: Duration::from_secs(10),
        }
    }
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Result<Self> {
        let config = Config::default();
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let raw = &self.raw_window;
        if raw.initial_slots == 0 || raw.max_slots == 0 {
            return Err(TsaggError::config("raw_window slot counts must be greater than 0"));
        }
        if raw.initial_slots > raw.max_slots {
            return Err(TsaggError::config(format!(
                "raw_window.initial_slots ({}) exceeds raw_window.max_slots ({})",
                raw.initial_slots, raw.max_slots
            )));
        }
        if raw.resize_slots == 0 && raw.initial_slots < raw.max_slots {
            return Err(TsaggError::config(
                "raw_window.resize_slots must be greater than 0 when initial_slots < max_slots",
            ));
        }

        let registry = &self.registry;
        if !(registry.load_factor > 0.0 && registry.load_factor <= 1.0) {
            return Err(TsaggError::config(format!(
                "registry.load_factor must be in (0, 1], got {}",
                registry.load_factor
            )));
        }
        if registry.shard_amount != 0
            && (registry.shard_amount < 2 || !registry.shard_amount.is_power_of_two())
        {
            return Err(TsaggError::config(format!(
                "registry.shard_amount must be 0 or a power of two >= 2, got {}",
                registry.shard_amount
            )));
        }

        let period = &self.period;
        if period.granularity_secs == 0 {
            return Err(TsaggError::config("period.granularity_secs must be greater than 0"));
        }
        if period.max_period_secs < period.granularity_secs {
            return Err(TsaggError::config(format!(
                "period.max_period_secs ({}) is smaller than period.granularity_secs ({})",
                period.max_period_secs, period.granularity_secs
            )));
        }
        if period.default_period_secs == 0 || period.default_period_secs > period.max_period_secs {
            return Err(TsaggError::config(format!(
                "period.default_period_secs must be in [1, {}], got {}",
                period.max_period_secs, period.default_period_secs
            )));
        }

        if !self.memory.alignment.is_power_of_two() {
            return Err(TsaggError::config(format!(
                "memory.alignment must be a power of two, got {}",
                self.memory.alignment
            )));
        }

        if self.ewma.default_window == 0 {
            return Err(TsaggError::config("ewma.default_window must be greater than 0"));
        }

        Ok(())
    }

    /// Read, parse and validate a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        ConfigBuilder::new().from_yaml(&content)?.build()
    }
}

impl LogLevel {
    /// Convert to tracing filter string
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Configuration builder for programmatic construction
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        ConfigBuilder {
            config: Config::default(),
        }
    }

    /// Load configuration from YAML string
    pub fn from_yaml(mut self, yaml: &str) -> Result<Self> {
        self.config = serde_yaml::from_str(yaml)
            .map_err(|e| TsaggError::config(format!("Failed to parse YAML config: {}", e)))?;
        Ok(self)
    }

    /// Set raw window capacities
    pub fn raw_window(mut self, initial: usize, resize: usize, max: usize) -> Self {
        self.config.raw_window = RawWindowConfig {
            initial_slots: initial,
            resize_slots: resize,
            max_slots: max,
        };
        self
    }

    /// Set registry initial capacity
    pub fn registry_capacity(mut self, capacity: usize) -> Self {
        self.config.registry.initial_capacity = capacity;
        self
    }

    /// Set registry load factor
    pub fn load_factor(mut self, load_factor: f64) -> Self {
        self.config.registry.load_factor = load_factor;
        self
    }

    /// Set period granularity and maximum
    pub fn period(mut self, granularity_secs: u64, max_period_secs: u64) -> Self {
        self.config.period.granularity_secs = granularity_secs;
        self.config.period.max_period_secs = max_period_secs;
        self
    }

    /// Set the period driven by the rollover scheduler
    pub fn default_period(mut self, secs: u64) -> Self {
        self.config.period.default_period_secs = secs;
        self
    }

    /// Enable native allocation tracking
    pub fn memory_tracking(mut self, enable: bool) -> Self {
        self.config.memory.tracking = enable;
        self
    }

    /// Set native block alignment
    pub fn alignment(mut self, alignment: usize) -> Self {
        self.config.memory.alignment = alignment;
        self
    }

    /// Set the EWMA strategy
    pub fn ewma_strategy(mut self, strategy: EwmaStrategy) -> Self {
        self.config.ewma.strategy = strategy;
        self
    }

    /// Set debug mode
    pub fn debug(mut self, debug: bool) -> Self {
        self.config.debug = debug;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}
