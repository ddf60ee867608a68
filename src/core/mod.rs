//! Core domain types, configuration and errors for statbucket.
//!
//! This module contains the value and key types every aggregation
//! component is built from.

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use config::{
    Config, ConfigBuilder, LogLevel, LoggingConfig, MetricConfig, MetricConfigBuilder,
    MissingDimensionPolicy,
};
pub use error::{Result, StatError};
pub use types::{
    AtomValue, DimensionKey, FieldValue, MetricDimensionKey, Sample, StateKey, Value, STATE_UNKNOWN,
};
