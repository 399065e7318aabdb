//! Command-line interface for tsagg.
//!
//! The binary is a load driver around the library: it builds an
//! [`Engine`] from configuration, feeds it synthetic values, rolls periods
//! over in the background and reports diagnostics.

use crate::core::config::ConfigBuilder;
use crate::core::{Config, MetricId, NumericKind, Result, TsaggError};
use crate::engine::Engine;
use crate::metrics::MovingAverage;
use crate::scheduler::PeriodScheduler;
use clap::Parser;
use humantime_serde::re::humantime;
use rand::Rng;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Native-memory time-series aggregation engine
#[derive(Parser, Debug)]
#[command(name = "tsagg")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path (default: ~/.config/tsagg/config.yaml)
    #[arg(short, long, env = "TSAGG_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, env = "TSAGG_DEBUG")]
    pub debug: bool,

    /// Validate configuration and exit
    #[arg(long)]
    pub check_config: bool,

    /// Number of distinct synthetic metrics
    #[arg(long, env = "TSAGG_METRICS", default_value = "1000")]
    pub metrics: u64,

    /// How long to run the synthetic load (e.g. "30s", "2m")
    #[arg(long, env = "TSAGG_DURATION", default_value = "30s", value_parser = humantime::parse_duration)]
    pub duration: Duration,

    /// Enable raw value retention on every synthetic metric
    #[arg(long, env = "TSAGG_RAW")]
    pub raw: bool,

    /// Print the final report as JSON
    #[arg(long)]
    pub json: bool,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Load configuration with proper precedence:
    /// 1. CLI arguments (highest priority)
    /// 2. Config file
    /// 3. Defaults (lowest priority)
    pub async fn load_config(&self) -> Result<Config> {
        let mut builder = ConfigBuilder::new();

        let config_path = match &self.config {
            Some(path) => path.clone(),
            None => match dirs::config_dir() {
                Some(dir) => dir.join("tsagg").join("config.yaml"),
                None => return builder.debug(self.debug).build(),
            },
        };

        match tokio::fs::read_to_string(&config_path).await {
            Ok(content) => {
                builder = builder.from_yaml(&content)?;
                tracing::info!("Loaded configuration from: {:?}", config_path);
            },
            Err(e) if self.config.is_some() => {
                return Err(TsaggError::config(format!(
                    "Failed to read config file {:?}: {}",
                    config_path, e
                )));
            },
            Err(_) => {
                tracing::debug!("No config file found at {:?}, using defaults", config_path);
            },
        }

        builder.debug(self.debug).build()
    }

    /// Filter directive for the fmt subscriber.
    ///
    /// `--debug` wins, then `TSAGG_LOG_LEVEL`, then `logging.level` from the
    /// loaded configuration.
    fn log_filter(config: &Config, env_level: Option<String>) -> String {
        if config.debug {
            return "debug".to_string();
        }
        env_level.unwrap_or_else(|| config.logging.level.as_str().to_string())
    }

    /// Initialize logging based on configuration.
    pub fn init_logging(&self, config: &Config) -> Result<()> {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

        let log_level = Self::log_filter(config, std::env::var("TSAGG_LOG_LEVEL").ok());

        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level));

        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .compact(),
            )
            .try_init()
            .map_err(|e| TsaggError::config(format!("Failed to initialize logging: {}", e)))?;

        Ok(())
    }
}

/// Execute the tsagg driver.
pub async fn execute(cli: Cli) -> Result<()> {
    let config = cli.load_config().await?;
    cli.init_logging(&config)?;

    if cli.check_config {
        config.validate()?;
        println!("Configuration is valid!");
        println!(
            "  Raw window: {}/{}/{} slots",
            config.raw_window.initial_slots,
            config.raw_window.resize_slots,
            config.raw_window.max_slots
        );
        println!("  Registry capacity: {}", config.registry.initial_capacity);
        println!(
            "  Period: {}s granularity, {}s max, {}s default",
            config.period.granularity_secs,
            config.period.max_period_secs,
            config.period.default_period_secs
        );
        println!("  EWMA strategy: {:?}", config.ewma.strategy);
        return Ok(());
    }

    if cli.metrics == 0 {
        return Err(TsaggError::invalid_argument("--metrics must be at least 1"));
    }

    let report_interval = config.logging.report_interval;
    let engine = Arc::new(Engine::new(config)?);

    for id in 0..cli.metrics {
        let kind = if id % 2 == 0 {
            NumericKind::Integer
        } else {
            NumericKind::Float
        };
        engine.register(MetricId(id), kind)?;
        if cli.raw {
            engine.set_raw_enabled(MetricId(id), true)?;
        }
    }

    let period = engine.default_period()?;
    tracing::info!(
        metrics = cli.metrics,
        period = %period,
        duration = %humantime::format_duration(cli.duration),
        "starting synthetic load"
    );

    let scheduler = PeriodScheduler::new(Arc::clone(engine.registry()), period).spawn();
    let load = tokio::spawn(run_load(Arc::clone(&engine), cli.metrics));

    let mut report = tokio::time::interval(report_interval);
    // The first tick completes immediately
    report.tick().await;
    let deadline = tokio::time::sleep(cli.duration);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = report.tick() => {
                engine.diagnostics().log();
            }
            _ = &mut deadline => {
                tracing::info!("Run duration elapsed, stopping...");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received shutdown signal, stopping...");
                break;
            }
        }
    }

    load.abort();
    let rollovers = scheduler.shutdown().await?;
    tracing::info!(rollovers, "scheduler stopped");

    let diagnostics = engine.diagnostics_with_metrics()?;
    if cli.json {
        println!("{}", diagnostics.to_json()?);
    } else {
        diagnostics.log();
        print_summary(&engine)?;
    }

    Ok(())
}

/// Feed random values until aborted.
async fn run_load(engine: Arc<Engine>, metrics: u64) {
    let mut ticker = tokio::time::interval(Duration::from_millis(1));
    let ewma = match engine.default_ewma() {
        Ok(ewma) => ewma,
        Err(e) => {
            tracing::error!(error = %e, "failed to build throughput average");
            return;
        },
    };

    loop {
        ticker.tick().await;

        let mut submitted = 0u64;
        {
            let mut rng = rand::thread_rng();
            for _ in 0..256 {
                let id = MetricId(rng.gen_range(0..metrics));
                let result = if id.get() % 2 == 0 {
                    engine.submit(id, rng.gen_range(0..10_000i64))
                } else {
                    engine.submit(id, rng.gen_range(0.0..1.0f64))
                };
                match result {
                    Ok(()) => submitted += 1,
                    Err(e) => {
                        tracing::error!(error = %e, category = e.category(), metric = id.get(), "submit failed");
                    },
                }
            }
        }

        #[allow(clippy::cast_precision_loss)]
        let rate = submitted as f64;
        if let Err(e) = ewma.append(rate) {
            tracing::error!(error = %e, "throughput average update failed");
        }
        tracing::trace!(per_tick = ewma.value(), "synthetic load");
    }
}

fn print_summary(engine: &Engine) -> Result<()> {
    let snapshots = engine.registry().snapshots()?;
    let active = snapshots.iter().filter(|s| s.count > 0).count();

    println!("tsagg {}", env!("CARGO_PKG_VERSION"));
    println!("  Metrics registered: {}", snapshots.len());
    println!("  Active this period: {}", active);
    for snapshot in snapshots.iter().filter(|s| s.count > 0).take(5) {
        println!(
            "  {:>6} {:<7} count={} min={} max={} mean={}{}",
            snapshot.id,
            snapshot.kind.as_str(),
            snapshot.count,
            snapshot.min,
            snapshot.max,
            snapshot.mean,
            snapshot
                .median
                .map(|m| format!(" median={:.3}", m))
                .unwrap_or_default()
        );
    }
    if let Some(arena) = engine.arena().snapshot() {
        println!(
            "  Native memory: {} bytes in {} blocks (peak {})",
            arena.outstanding_bytes, arena.outstanding_blocks, arena.peak_bytes
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn warn_config(debug: bool) -> Config {
        ConfigBuilder::new()
            .from_yaml("logging:\n  level: warn\n")
            .unwrap()
            .debug(debug)
            .build()
            .unwrap()
    }

    #[test]
    fn test_log_filter_uses_configured_level() {
        assert_eq!(Cli::log_filter(&warn_config(false), None), "warn");
        assert_eq!(Cli::log_filter(&Config::default(), None), "info");
    }

    #[test]
    fn test_log_filter_precedence() {
        let env = Some("trace".to_string());
        assert_eq!(Cli::log_filter(&warn_config(false), env.clone()), "trace");
        assert_eq!(Cli::log_filter(&warn_config(true), env), "debug");
    }

    #[tokio::test]
    async fn test_debug_flag_reaches_filter() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "logging:\n  level: error\n").unwrap();

        let cli = Cli::parse_from(["tsagg", "--config", path.to_str().unwrap()]);
        let config = cli.load_config().await.unwrap();
        assert_eq!(Cli::log_filter(&config, None), "error");

        let cli = Cli::parse_from(["tsagg", "--debug", "--config", path.to_str().unwrap()]);
        let config = cli.load_config().await.unwrap();
        assert_eq!(Cli::log_filter(&config, None), "debug");
    }
}
