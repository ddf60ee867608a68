//! Configuration system tests.

use pretty_assertions::assert_eq;
use statbucket::core::{Config, ConfigBuilder, LogLevel, MetricConfigBuilder, MissingDimensionPolicy, StatError};
use statbucket::metrics::{Aggregation, ConditionState, ThresholdOp, ValueDirection};
use std::io::Write;
use std::time::Duration;

#[test]
fn test_default_config() {
    let config = Config::default();
    assert!(config.validate().is_ok());
    assert!(config.metrics.is_empty());
    assert_eq!(config.logging.level, LogLevel::Info);
}

#[test]
fn test_config_builder() {
    let config = ConfigBuilder::new()
        .log_level(LogLevel::Debug)
        .metric(MetricConfigBuilder::new(1).value_fields(vec![0]).build().unwrap())
        .metric(
            MetricConfigBuilder::new(2)
                .value_fields(vec![0, 1])
                .pulled(true)
                .diff(ValueDirection::Decreasing)
                .build()
                .unwrap(),
        )
        .build()
        .unwrap();

    assert_eq!(config.logging.level, LogLevel::Debug);
    assert_eq!(config.metrics.len(), 2);
    assert_eq!(config.metric(2).unwrap().direction, ValueDirection::Decreasing);
    assert!(config.metric(3).is_none());
}

#[test]
fn test_yaml_config_from_file() {
    let yaml = r#"
logging:
  level: warn
  structured: true
metrics:
  - id: 100
    bucket_size: 5m
    value_fields: [1]
    aggregation: max
    pulled: true
    use_diff: true
    direction: any
    has_condition: true
    initial_condition: "false"
    state_atoms: [27]
    state_value_map:
      1: 0
      2: 0
    max_pull_delay: 10s
    min_bucket_size: 30s
    upload_threshold:
      op: gte
      value: 2.5
    condition_correction_threshold: 2s
    dimension_soft_limit: 10
    dimension_hard_limit: 20
    missing_dimension_policy: stop_condition_timer
"#;
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(yaml.as_bytes()).unwrap();

    let config = ConfigBuilder::new().from_file(file.path()).unwrap().build().unwrap();
    assert_eq!(config.logging.level, LogLevel::Warn);
    assert!(config.logging.structured);

    let metric = config.metric(100).unwrap();
    assert_eq!(metric.bucket_size, Duration::from_secs(300));
    assert_eq!(metric.aggregation, Aggregation::Max);
    assert_eq!(metric.direction, ValueDirection::Any);
    assert_eq!(metric.initial_condition, ConditionState::False);
    assert_eq!(metric.state_value_map.get(&2), Some(&0));
    assert_eq!(metric.max_pull_delay_ns(), 10_000_000_000);
    assert_eq!(metric.min_bucket_size_ns(), 30_000_000_000);
    assert_eq!(metric.upload_threshold.unwrap().op, ThresholdOp::Gte);
    assert_eq!(metric.condition_correction_threshold_ns(), Some(2_000_000_000));
    assert_eq!(metric.dimension_hard_limit, 20);
    assert_eq!(metric.missing_dimension_policy, MissingDimensionPolicy::StopConditionTimer);
    assert_eq!(metric.max_drop_events_per_bucket, 10);
}

#[test]
fn test_duplicate_metric_ids_rejected() {
    let yaml = r"
metrics:
  - id: 1
    value_fields: [0]
  - id: 1
    value_fields: [0]
";
    let result = ConfigBuilder::new().from_yaml(yaml).unwrap().build();
    assert!(matches!(result, Err(StatError::Config(_))));
}

#[test]
fn test_invalid_metric_rejected() {
    let yaml = r"
metrics:
  - id: 4
    value_fields: [0, 0]
";
    let result = ConfigBuilder::new().from_yaml(yaml).unwrap().build();
    assert!(matches!(
        result,
        Err(StatError::DuplicateValueField { metric_id: 4, field: 0 })
    ));
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = ConfigBuilder::new().from_file(&dir.path().join("absent.yaml"));
    assert!(matches!(result, Err(StatError::Io(_))));
}
