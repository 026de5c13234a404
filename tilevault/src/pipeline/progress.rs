//! Shared progress accounting
//!
//! A single set of monotonic counters updated by every worker and
//! reported at a fixed interval while the pipeline runs. Exact counts
//! at termination are part of the pipeline contract.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Monotonic run counters.
#[derive(Debug, Default)]
pub struct Progress {
    /// Tiles that entered their first fetch attempt.
    attempted: AtomicU64,
    /// Tiles stored this run.
    stored: AtomicU64,
    /// Tiles that exhausted every candidate source.
    failed: AtomicU64,
    /// Tiles skipped without a fetch (already present or uncoverable).
    skipped: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub attempted: u64,
    pub stored: u64,
    pub failed: u64,
    pub skipped: u64,
}

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tile_attempted(&self) {
        self.attempted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tile_stored(&self) {
        self.stored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tile_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tile_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            attempted: self.attempted.load(Ordering::Relaxed),
            stored: self.stored.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }
}

/// Spawns the periodic progress reporter.
///
/// Runs until the token is cancelled; the pipeline cancels it once all
/// tiles are terminal and logs the final exact counts itself.
pub fn spawn_reporter(
    region: String,
    progress: Arc<Progress>,
    interval: Duration,
    token: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it so the first report
        // carries real numbers.
        ticker.tick().await;
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    let snap = progress.snapshot();
                    info!(
                        region = %region,
                        attempted = snap.attempted,
                        stored = snap.stored,
                        failed = snap.failed,
                        skipped = snap.skipped,
                        "acquisition progress"
                    );
                }
            }
        }
    })
}
