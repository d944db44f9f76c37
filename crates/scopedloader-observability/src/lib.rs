//! # scopedloader-observability
//!
//! Logging for scopedloader applications.
//!
//! ## Structured logging
//! [`init_tracing`] installs a `tracing-subscriber` registry with an
//! `EnvFilter` built from [`LogConfig`]: a global level plus per-component
//! overrides (`scopedloader_scope=debug` shows every scope-instance
//! creation and dispatch). JSON output is compatible with ELK, Loki,
//! CloudWatch.
//!
//! ## Statistics
//! [`log_statistics`] emits one loader's counters as a structured event, for
//! end-of-request summaries.

pub mod report;
pub mod tracing_setup;

pub use report::{log_statistics, log_statistics_map};
pub use tracing_setup::{init_tracing, LogConfig};
