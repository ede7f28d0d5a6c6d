// THEORY:
// This file is the main entry point for the `brandscope` library crate.
// It defines the public API exposed to external consumers such as the
// `brandscope_report` tool or a web backend.
//
// The primary exports are `AnalyticsPipeline`, the synchronous facade over every
// analysis, and `ParallelPipeline`, which fans the per-brand heatmap passes out
// over a worker pool. The component modules under `core_modules` stay public so
// callers can drive a single stage directly.

pub mod config;
pub mod core_modules;
pub mod error;
pub mod parallel_pipeline;
pub mod pipeline;

pub use config::AnalyticsConfig;
pub use error::{AnalyticsError, Outcome};
pub use parallel_pipeline::ParallelPipeline;
pub use pipeline::{AnalysisReport, AnalyticsPipeline, Detection, VideoMeta};
