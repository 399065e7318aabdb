//! Configuration system tests.

use pretty_assertions::assert_eq;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;
use tsagg_lib::core::config::EwmaStrategy;
use tsagg_lib::core::{Config, ConfigBuilder, TsaggError};
use tsagg_lib::Engine;

fn write_yaml(yaml: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(yaml.as_bytes()).unwrap();
    file
}

fn rejected(mutate: impl FnOnce(&mut Config)) -> bool {
    let mut config = Config::default();
    mutate(&mut config);
    config.validate().is_err()
}

#[test]
fn test_default_config() {
    let config = Config::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.raw_window.initial_slots, 16);
    assert_eq!(config.raw_window.resize_slots, 16);
    assert_eq!(config.raw_window.max_slots, 1024);
    assert_eq!(config.registry.initial_capacity, 1024);
    assert_eq!(config.registry.load_factor, 0.75);
    assert_eq!(config.period.granularity_secs, 5);
    assert_eq!(config.period.max_period_secs, 300);
    assert_eq!(config.period.default_period_secs, 60);
    assert_eq!(config.memory.alignment, 64);
    assert!(!config.memory.tracking);
    assert_eq!(config.ewma.default_window, 10);
    assert_eq!(config.ewma.strategy, EwmaStrategy::Spin);
    assert_eq!(config.logging.report_interval, Duration::from_secs(10));
}

#[test]
fn test_config_builder() {
    let config = ConfigBuilder::new()
        .raw_window(4, 4, 16)
        .registry_capacity(64)
        .load_factor(0.5)
        .period(10, 120)
        .default_period(30)
        .memory_tracking(true)
        .alignment(128)
        .ewma_strategy(EwmaStrategy::Mutex)
        .debug(true)
        .build()
        .unwrap();

    assert_eq!(config.raw_window.max_slots, 16);
    assert_eq!(config.registry.initial_capacity, 64);
    assert_eq!(config.registry.load_factor, 0.5);
    assert_eq!(config.period.max_period_secs, 120);
    assert_eq!(config.period.default_period_secs, 30);
    assert_eq!(config.memory.alignment, 128);
    assert_eq!(config.ewma.strategy, EwmaStrategy::Mutex);
    assert!(config.debug);
}

#[test]
fn test_yaml_file_config() {
    let file = write_yaml(
        r#"
raw_window:
  initial_slots: 32
  resize_slots: 32
  max_slots: 256
registry:
  initial_capacity: 100000
  shard_amount: 64
period:
  granularity_secs: 15
  max_period_secs: 900
  default_period_secs: 45
memory:
  tracking: true
ewma:
  default_window: 30
  strategy: unsynchronized
logging:
  level: debug
  report_interval: 1m 30s
"#,
    );

    let config = Config::from_file(file.path()).unwrap();
    assert_eq!(config.raw_window.initial_slots, 32);
    assert_eq!(config.raw_window.max_slots, 256);
    assert_eq!(config.registry.initial_capacity, 100_000);
    assert_eq!(config.registry.shard_amount, 64);
    assert_eq!(config.period.granularity_secs, 15);
    assert_eq!(config.period.default_period_secs, 45);
    assert!(config.memory.tracking);
    assert_eq!(config.memory.alignment, 64);
    assert_eq!(config.ewma.default_window, 30);
    assert_eq!(config.ewma.strategy, EwmaStrategy::Unsynchronized);
    assert_eq!(config.logging.level.as_str(), "debug");
    assert_eq!(config.logging.report_interval, Duration::from_secs(90));
}

#[test]
fn test_yaml_roundtrip_through_file() {
    let original = ConfigBuilder::new()
        .period(10, 600)
        .memory_tracking(true)
        .build()
        .unwrap();
    let file = write_yaml(&serde_yaml::to_string(&original).unwrap());

    let loaded = Config::from_file(file.path()).unwrap();
    assert_eq!(
        serde_json::to_value(&loaded).unwrap(),
        serde_json::to_value(&original).unwrap()
    );
}

#[test]
fn test_invalid_file_rejected() {
    let file = write_yaml(
        r#"
period:
  granularity_secs: 60
  max_period_secs: 30
"#,
    );
    let err = Config::from_file(file.path()).unwrap_err();
    assert_eq!(err.category(), "config");

    let file = write_yaml("ewma:\n  strategy: optimistic\n");
    assert!(matches!(
        Config::from_file(file.path()),
        Err(TsaggError::Config(_))
    ));

    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("absent.yaml");
    assert!(matches!(Config::from_file(&missing), Err(TsaggError::Io(_))));
}

#[test]
fn test_config_validation() {
    assert!(rejected(|c| c.raw_window.initial_slots = 0));
    assert!(rejected(|c| c.raw_window.initial_slots = 4096));
    assert!(rejected(|c| c.raw_window.resize_slots = 0));
    assert!(rejected(|c| c.registry.load_factor = 0.0));
    assert!(rejected(|c| c.registry.load_factor = 1.5));
    assert!(rejected(|c| c.registry.shard_amount = 12));
    assert!(rejected(|c| c.period.granularity_secs = 0));
    assert!(rejected(|c| c.period.default_period_secs = 301));
    assert!(rejected(|c| c.memory.alignment = 48));
    assert!(rejected(|c| c.ewma.default_window = 0));

    assert!(!rejected(|c| c.registry.shard_amount = 16));
}

#[test]
fn test_resize_zero_allowed_for_fixed_window() {
    let config = ConfigBuilder::new().raw_window(64, 0, 64).build().unwrap();
    assert_eq!(config.raw_window.resize_slots, 0);
}

#[test]
fn test_engine_honors_config() {
    let config = ConfigBuilder::new()
        .period(7, 70)
        .default_period(20)
        .memory_tracking(true)
        .ewma_strategy(EwmaStrategy::Unsynchronized)
        .build()
        .unwrap();
    let engine = Engine::new(config).unwrap();

    assert_eq!(engine.default_period().unwrap().as_secs(), 21);
    assert!(engine.arena().is_tracking());
    assert_eq!(
        engine.default_ewma().unwrap().strategy(),
        EwmaStrategy::Unsynchronized
    );
}
