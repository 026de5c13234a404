//! Acquisition pipeline
//!
//! Drives a region's coverage set through an ordered chain of sources
//! with bounded per-source parallelism, retry/backoff on transient
//! failures, cross-source fallback, and exactly-once terminal states
//! per tile. See [`Pipeline::run`] for the driver and
//! [`PipelineSummary`] for what a run reports.

mod progress;
mod runner;
mod summary;

pub use progress::{Progress, ProgressSnapshot};
pub use runner::{Pipeline, PipelineConfig, DEFAULT_PROGRESS_INTERVAL};
pub use summary::{PipelineSummary, PipelineTotals, SourceCounters, SourceSummary};
