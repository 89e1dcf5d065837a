//! Shared configuration, error types, ids, and observability primitives for rowship crates.
//!
//! Architecture role:
//! - defines engine configuration passed across layers
//! - provides common [`EngineError`] / [`Result`] contracts
//! - hosts the prometheus metrics registry
//!
//! Key modules:
//! - [`config`]
//! - [`error`]
//! - [`ids`]
//! - [`metrics`]

pub mod config;
pub mod error;
pub mod ids;
pub mod metrics;

pub use config::{EngineConfig, RetryPolicy, SkipPolicy, WriteMode};
pub use error::{EngineError, ReduceMismatch, RemoteError, RemoteErrorCode, Result};
pub use ids::*;
pub use metrics::{global_metrics, MetricsRegistry};
