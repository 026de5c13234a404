//! Pipeline driver and per-tile fetch chain
//!
//! The driver feeds coverage tiles through an ordered chain of sources.
//! Each source has a bounded worker pool realized as a semaphore of
//! `workers_per_source` permits; a tile task is only spawned once its
//! source's permit is acquired, so in-flight work per source is bounded
//! and the coverage producer is rate-limited by the sum of capacities.
//! A task holds its permit for the whole attempt chain on that source,
//! including backoff sleeps.
//!
//! Tiles a source cannot deliver advance to the next candidate by being
//! re-enqueued at the front of that source's queue, so fallback work is
//! dispatched ahead of fresh coverage. Every tile reaches exactly one
//! terminal state: stored, already present, failed, or uncoverable.

use super::progress::{spawn_reporter, Progress};
use super::summary::{PipelineSummary, PipelineTotals, SourceCounters};
use crate::coord::TileCoord;
use crate::retry::{RetryDecision, RetryPolicy};
use crate::source::{TileFetcher, TileKind, TileResult};
use crate::store::{extension_for, TileStore};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Default interval between progress reports.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

/// Pipeline tuning knobs.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Bounded worker-pool size per source.
    pub workers_per_source: usize,
    /// Retry schedule applied per (source, tile).
    pub retry: RetryPolicy,
    /// Try vector sources before raster sources during fallback.
    pub prefer_vector: bool,
    /// How often the progress reporter logs.
    pub progress_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers_per_source: crate::config::DEFAULT_WORKERS_PER_SOURCE,
            retry: RetryPolicy::new(crate::config::DEFAULT_RETRY_ATTEMPTS),
            prefer_vector: true,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

/// One tile moving through its candidate chain.
struct TileJob {
    coord: TileCoord,
    /// Indices into the source list, in fallback order.
    candidates: Vec<usize>,
    /// Position of the source currently responsible.
    next: usize,
    /// Whether the first fetch attempt has been counted.
    started: bool,
}

/// What a tile task concluded about its source.
enum TaskVerdict {
    /// Stored; the tile is terminal.
    Stored,
    /// This source cannot deliver the tile; try the next candidate.
    Advance,
    /// The run is being cancelled; the tile stays non-terminal.
    Cancelled,
}

/// The acquisition pipeline for one region.
pub struct Pipeline<S: TileFetcher> {
    sources: Vec<Arc<S>>,
    store: Arc<TileStore>,
    config: PipelineConfig,
}

impl<S: TileFetcher> Pipeline<S> {
    pub fn new(sources: Vec<Arc<S>>, store: Arc<TileStore>, config: PipelineConfig) -> Self {
        Self {
            sources,
            store,
            config,
        }
    }

    /// Source indices in fallback preference order: vector sources
    /// first (when enabled), config order within each kind.
    fn fallback_order(&self) -> Vec<usize> {
        if !self.config.prefer_vector {
            return (0..self.sources.len()).collect();
        }
        let (vector, raster): (Vec<usize>, Vec<usize>) = (0..self.sources.len())
            .partition(|&i| self.sources[i].descriptor().tile_kind == TileKind::Vector);
        vector.into_iter().chain(raster).collect()
    }

    /// Drives every coverage tile to a terminal state.
    ///
    /// Returns per-source summaries and exact tile totals. On
    /// cancellation, in-flight fetches are abandoned at their next I/O
    /// boundary and the summary is marked `cancelled`; tiles already
    /// written stay on disk, so a later run resumes where this one
    /// stopped.
    pub async fn run(
        &self,
        region: &str,
        coverage: impl Iterator<Item = TileCoord>,
        cancel: &CancellationToken,
    ) -> PipelineSummary {
        let source_count = self.sources.len();
        let order = self.fallback_order();
        let names: Vec<String> = self
            .sources
            .iter()
            .map(|s| s.descriptor().name.clone())
            .collect();
        let kinds: Vec<TileKind> = self
            .sources
            .iter()
            .map(|s| s.descriptor().tile_kind)
            .collect();

        let semaphores: Vec<Arc<Semaphore>> = (0..source_count)
            .map(|_| Arc::new(Semaphore::new(self.config.workers_per_source)))
            .collect();

        let counters = Arc::new(SourceCounters::new());
        let progress = Arc::new(Progress::new());
        let reporter_token = cancel.child_token();
        let reporter = spawn_reporter(
            region.to_string(),
            Arc::clone(&progress),
            self.config.progress_interval,
            reporter_token.clone(),
        );

        let mut totals = PipelineTotals::default();
        let mut failed_tiles: Vec<TileCoord> = Vec::new();
        let mut queues: Vec<VecDeque<TileJob>> = (0..source_count).map(|_| VecDeque::new()).collect();
        let mut queued = 0usize;
        let mut coverage = coverage.fuse();
        let mut coverage_done = false;
        let mut cancelled = false;

        // Keep at most two rounds of work queued beyond what the pools
        // can hold; the coverage iterator is consumed lazily.
        let backlog_limit = (source_count * self.config.workers_per_source * 2).max(64);

        let mut inflight: JoinSet<(TileJob, TaskVerdict)> = JoinSet::new();

        loop {
            // Refill from coverage, resolving trivially-terminal tiles
            // (uncoverable, already on disk) without dispatch.
            while !coverage_done && queued < backlog_limit {
                let Some(coord) = coverage.next() else {
                    coverage_done = true;
                    break;
                };
                let candidates: Vec<usize> = order
                    .iter()
                    .copied()
                    .filter(|&i| self.sources[i].descriptor().accepts(&coord))
                    .collect();
                if candidates.is_empty() {
                    trace!(tile = %coord, "uncoverable: no candidate source");
                    totals.total += 1;
                    totals.uncoverable += 1;
                    progress.tile_skipped();
                    continue;
                }
                if candidates
                    .iter()
                    .any(|&i| self.store.exists(region, kinds[i], &names[i], &coord))
                {
                    trace!(tile = %coord, "already stored; skipping");
                    totals.total += 1;
                    totals.already_present += 1;
                    progress.tile_skipped();
                    continue;
                }
                let first = candidates[0];
                queues[first].push_back(TileJob {
                    coord,
                    candidates,
                    next: 0,
                    started: false,
                });
                queued += 1;
            }

            // Dispatch every queue as far as its permits allow.
            for i in 0..source_count {
                while !queues[i].is_empty() {
                    let Ok(permit) = Arc::clone(&semaphores[i]).try_acquire_owned() else {
                        break;
                    };
                    let mut job = queues[i].pop_front().expect("queue checked non-empty");
                    queued -= 1;
                    if !job.started {
                        job.started = true;
                        progress.tile_attempted();
                    }

                    let source = Arc::clone(&self.sources[i]);
                    let store = Arc::clone(&self.store);
                    let retry = self.config.retry.clone();
                    let counters = Arc::clone(&counters);
                    let token = cancel.clone();
                    let region = region.to_string();
                    let name = names[i].clone();
                    let kind = kinds[i];

                    inflight.spawn(async move {
                        let verdict = fetch_and_store(
                            source.as_ref(),
                            &region,
                            kind,
                            &name,
                            job.coord,
                            &store,
                            &retry,
                            &counters,
                            &token,
                        )
                        .await;
                        drop(permit);
                        (job, verdict)
                    });
                }
            }

            if coverage_done && queued == 0 && inflight.is_empty() {
                break;
            }

            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }

                joined = inflight.join_next() => {
                    self.handle_joined(
                        joined,
                        &mut queues,
                        &mut queued,
                        &mut totals,
                        &mut failed_tiles,
                        &progress,
                    );
                }
            }
        }

        if cancelled {
            debug!(region = %region, pending = queued, active = inflight.len(),
                   "cancellation requested; draining workers");
            // Workers observe the token at their next await point; keep
            // accounting for tiles that still reach a terminal state.
            while let Some(joined) = inflight.join_next().await {
                self.handle_joined(
                    Some(joined),
                    &mut queues,
                    &mut queued,
                    &mut totals,
                    &mut failed_tiles,
                    &progress,
                );
            }
        }

        reporter_token.cancel();
        let _ = reporter.await;

        let snapshot = progress.snapshot();
        info!(
            region = %region,
            attempted = snapshot.attempted,
            stored = snapshot.stored,
            failed = snapshot.failed,
            skipped = snapshot.skipped,
            cancelled,
            "acquisition finished"
        );

        PipelineSummary {
            totals,
            per_source: counters.snapshot(),
            failed_tiles,
            cancelled,
        }
    }

    /// Folds one joined task back into the driver state.
    fn handle_joined(
        &self,
        joined: Option<Result<(TileJob, TaskVerdict), tokio::task::JoinError>>,
        queues: &mut [VecDeque<TileJob>],
        queued: &mut usize,
        totals: &mut PipelineTotals,
        failed_tiles: &mut Vec<TileCoord>,
        progress: &Progress,
    ) {
        match joined {
            Some(Ok((mut job, verdict))) => match verdict {
                TaskVerdict::Stored => {
                    totals.total += 1;
                    totals.stored += 1;
                    progress.tile_stored();
                }
                TaskVerdict::Advance => {
                    job.next += 1;
                    if job.next < job.candidates.len() {
                        let next_source = job.candidates[job.next];
                        // Front of the queue: fallback work is dispatched
                        // ahead of fresh coverage.
                        queues[next_source].push_front(job);
                        *queued += 1;
                    } else {
                        debug!(tile = %job.coord, "failed on every candidate source");
                        totals.total += 1;
                        totals.failed += 1;
                        progress.tile_failed();
                        failed_tiles.push(job.coord);
                    }
                }
                TaskVerdict::Cancelled => {
                    // Non-terminal; the tile will be retried by a
                    // resumed run.
                }
            },
            Some(Err(join_err)) => {
                if !join_err.is_cancelled() {
                    warn!(error = %join_err, "tile task panicked");
                }
            }
            None => {}
        }
    }
}

/// Runs the full attempt chain for one tile against one source: fetch
/// with retry/backoff, validate (inside the adapter), store. Holds the
/// caller's permit for its whole lifetime.
#[allow(clippy::too_many_arguments)]
async fn fetch_and_store<S: TileFetcher>(
    source: &S,
    region: &str,
    kind: TileKind,
    source_name: &str,
    coord: TileCoord,
    store: &TileStore,
    retry: &RetryPolicy,
    counters: &SourceCounters,
    cancel: &CancellationToken,
) -> TaskVerdict {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        if cancel.is_cancelled() {
            return TaskVerdict::Cancelled;
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return TaskVerdict::Cancelled,
            result = source.fetch(coord) => result,
        };

        let transient_reason = match result {
            TileResult::Got {
                bytes,
                content_type,
                ..
            } => {
                let ext = extension_for(kind, content_type.as_deref(), &bytes);
                match store.write(region, kind, source_name, &coord, ext, &bytes).await {
                    Ok(_) => {
                        counters.record_stored(source_name);
                        trace!(tile = %coord, source = %source_name, "stored");
                        return TaskVerdict::Stored;
                    }
                    // A failed write is transient for this tile: retry,
                    // and fail the tile only if it persists.
                    Err(e) => {
                        warn!(tile = %coord, source = %source_name, error = %e, "tile write failed");
                        format!("store write failed: {e}")
                    }
                }
            }
            TileResult::Empty => {
                counters.record_empty(source_name);
                trace!(tile = %coord, source = %source_name, "empty tile");
                return TaskVerdict::Advance;
            }
            TileResult::NotFound => {
                counters.record_not_found(source_name);
                return TaskVerdict::Advance;
            }
            TileResult::Invalid { reason } => {
                counters.record_invalid(source_name);
                debug!(tile = %coord, source = %source_name, reason = %reason, "invalid tile");
                return TaskVerdict::Advance;
            }
            TileResult::Transient { reason } => reason,
        };

        counters.record_transient(source_name);
        match retry.on_transient(attempt) {
            RetryDecision::RetryAfter(delay) => {
                debug!(
                    tile = %coord,
                    source = %source_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    reason = %transient_reason,
                    "transient failure; backing off"
                );
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return TaskVerdict::Cancelled,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            RetryDecision::GiveUp => {
                counters.record_failed(source_name);
                debug!(
                    tile = %coord,
                    source = %source_name,
                    attempts = attempt,
                    reason = %transient_reason,
                    "retries exhausted on source"
                );
                return TaskVerdict::Advance;
            }
        }
    }
}
