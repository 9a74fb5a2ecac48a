//! Caller-facing API: the build/query pipeline, its configuration and metrics,
//! and the HTTP surface the `graphrag` binary serves.

pub mod config;
pub mod http;
pub mod metrics;
pub mod pipeline;

pub use config::{AppConfig, ConfigError, StoreConfig};
pub use metrics::{MetricsSnapshot, PipelineMetrics};
pub use pipeline::{Answer, BuildReport, ChunkFailure, Pipeline, PipelineError, PipelineSettings};
