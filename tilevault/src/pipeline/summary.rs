//! Per-source and per-run accounting

use dashmap::DashMap;
use std::collections::BTreeMap;

use crate::coord::TileCoord;

/// Outcome counts for one source over a pipeline run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SourceSummary {
    /// Tiles fetched, validated and written from this source.
    pub stored: u64,
    /// Tiles this source gave up on after exhausting transient retries.
    pub failed: u64,
    /// Individual transient attempt failures (5xx, timeouts, resets).
    pub transient_errors: u64,
    /// Payloads rejected by validation.
    pub invalid: u64,
    /// Authoritative blank answers.
    pub empty: u64,
    /// Authoritative misses.
    pub not_found: u64,
}

/// Concurrent per-source counter map, updated by workers and snapshotted
/// into the final summary.
#[derive(Debug, Default)]
pub struct SourceCounters {
    map: DashMap<String, SourceSummary>,
}

impl SourceCounters {
    pub fn new() -> Self {
        Self::default()
    }

    fn update(&self, source: &str, apply: impl FnOnce(&mut SourceSummary)) {
        let mut entry = self.map.entry(source.to_string()).or_default();
        apply(&mut entry);
    }

    pub fn record_stored(&self, source: &str) {
        self.update(source, |s| s.stored += 1);
    }

    pub fn record_failed(&self, source: &str) {
        self.update(source, |s| s.failed += 1);
    }

    pub fn record_transient(&self, source: &str) {
        self.update(source, |s| s.transient_errors += 1);
    }

    pub fn record_invalid(&self, source: &str) {
        self.update(source, |s| s.invalid += 1);
    }

    pub fn record_empty(&self, source: &str) {
        self.update(source, |s| s.empty += 1);
    }

    pub fn record_not_found(&self, source: &str) {
        self.update(source, |s| s.not_found += 1);
    }

    /// Snapshot in stable name order.
    pub fn snapshot(&self) -> BTreeMap<String, SourceSummary> {
        self.map
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }
}

/// Tile-level totals for one region run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PipelineTotals {
    /// Coverage tiles that reached a terminal state.
    pub total: u64,
    /// Stored by some source this run.
    pub stored: u64,
    /// Skipped because a previous run already stored them.
    pub already_present: u64,
    /// No candidate source could deliver them.
    pub failed: u64,
    /// No configured source could possibly serve them.
    pub uncoverable: u64,
}

/// Result of one pipeline run.
#[derive(Debug, Default)]
pub struct PipelineSummary {
    pub totals: PipelineTotals,
    pub per_source: BTreeMap<String, SourceSummary>,
    /// Tiles that ended `Failed`, for the verbose dump.
    pub failed_tiles: Vec<TileCoord>,
    /// True when the run was interrupted before every tile terminated.
    pub cancelled: bool,
}

impl PipelineSummary {
    /// True when the region produced nothing usable: no tile was stored
    /// this run or found from a previous one.
    pub fn all_failed(&self) -> bool {
        self.totals.total > 0 && self.totals.stored == 0 && self.totals.already_present == 0
    }
}
