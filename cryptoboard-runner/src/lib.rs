//! Cryptoboard Runner — orchestration, configuration, and warehouse publishing.
//!
//! This crate builds on `cryptoboard-core` to provide:
//! - TOML pipeline configuration with production defaults
//! - Warehouse sinks with full-replace semantics (BigQuery, in-memory)
//! - The stage-sequencing orchestrator with whole-stage retry
//! - An optional run-level lock file

pub mod config;
pub mod lock;
pub mod pipeline;
pub mod warehouse;

pub use config::{CheckpointConfig, ConfigError, PipelineConfig, RetryConfig, WarehouseConfig};
pub use lock::{LockError, RunLock};
pub use pipeline::{
    extract_snapshot, publish, Pipeline, RetryPolicy, RunError, RunResult, Stage,
};
pub use warehouse::{
    BigQuerySink, Credential, InMemorySink, PublishError, TableRef, WarehouseSink,
};
