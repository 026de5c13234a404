//! End-to-end acquisition scenarios
//!
//! Exercises the pipeline against scripted sources that behave like
//! real adapters (payloads run through the validator), plus one full
//! orchestrator run backed by an MBTiles archive.

use rusqlite::Connection;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tilevault::config::ConfigFile;
use tilevault::coord::{self, Bbox, TileCoord};
use tilevault::orchestrator::{self, RunOptions};
use tilevault::pipeline::{Pipeline, PipelineConfig};
use tilevault::retry::RetryPolicy;
use tilevault::source::{SourceDescriptor, TileFetcher, TileKind, TileResult};
use tilevault::store::TileStore;
use tilevault::validate::{Validation, Validator};
use tokio_util::sync::CancellationToken;

fn png_payload() -> Vec<u8> {
    let mut data = vec![0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
    data.extend_from_slice(&[0x00, 0x00, 0x00, 0x0D, b'I', b'H', b'D', b'R', 1, 2, 3, 4]);
    data
}

/// A minimal vector tile with one layer, as a real server would send.
fn mvt_payload() -> Vec<u8> {
    let mut layer = Vec::new();
    layer.extend_from_slice(&[0x0A, 0x05]);
    layer.extend_from_slice(b"water");
    layer.extend_from_slice(&[0x78, 0x02]);
    let mut tile = vec![0x1A, layer.len() as u8];
    tile.extend_from_slice(&layer);
    tile
}

/// How a scripted source answers every tile it is asked for.
enum Behavior {
    /// Serve this payload (validated like a real adapter would).
    Serve {
        payload: Vec<u8>,
        content_type: Option<String>,
    },
    /// Authoritative miss.
    NotFound,
    /// Fail transiently `failures` times per tile, then serve.
    TransientThenServe { failures: u32, payload: Vec<u8> },
}

struct FakeSource {
    descriptor: SourceDescriptor,
    behavior: Behavior,
    validator: Validator,
    calls: AtomicU32,
    transient_seen: Mutex<HashMap<TileCoord, u32>>,
    delay: Duration,
}

impl FakeSource {
    fn new(name: &str, kind: TileKind, behavior: Behavior) -> Self {
        Self {
            descriptor: SourceDescriptor {
                name: name.to_string(),
                tile_kind: kind,
                min_zoom: None,
                max_zoom: None,
                bounds: None,
            },
            behavior,
            validator: Validator::default(),
            calls: AtomicU32::new(0),
            transient_seen: Mutex::new(HashMap::new()),
            delay: Duration::ZERO,
        }
    }

    fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = validator;
        self
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn classify(&self, payload: &[u8], content_type: Option<&str>) -> TileResult {
        match self.validator.validate(self.descriptor.tile_kind, payload) {
            Validation::Valid(bytes) => TileResult::Got {
                bytes,
                content_type: content_type.map(String::from),
                source_name: self.descriptor.name.clone(),
            },
            Validation::Empty => TileResult::Empty,
            Validation::Invalid(reason) => TileResult::Invalid { reason },
        }
    }
}

impl TileFetcher for FakeSource {
    async fn fetch(&self, coord: TileCoord) -> TileResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &self.behavior {
            Behavior::Serve {
                payload,
                content_type,
            } => self.classify(payload, content_type.as_deref()),
            Behavior::NotFound => TileResult::NotFound,
            Behavior::TransientThenServe { failures, payload } => {
                let mut seen = self.transient_seen.lock().unwrap();
                let count = seen.entry(coord).or_insert(0);
                if *count < *failures {
                    *count += 1;
                    TileResult::Transient {
                        reason: "HTTP 500".to_string(),
                    }
                } else {
                    drop(seen);
                    self.classify(payload, Some("image/png"))
                }
            }
        }
    }

    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }
}

fn quick_config(retries: u32) -> PipelineConfig {
    PipelineConfig {
        workers_per_source: 4,
        retry: RetryPolicy::new(retries).with_base_delay(Duration::from_millis(1)),
        prefer_vector: true,
        progress_interval: Duration::from_secs(60),
    }
}

fn istanbul_bbox() -> Bbox {
    Bbox::new(28.5, 40.8, 29.5, 41.2).unwrap()
}

/// Every regular file under a directory, relative paths, sorted.
fn tree_files(root: &Path) -> Vec<PathBuf> {
    fn walk(dir: &Path, root: &Path, acc: &mut Vec<PathBuf>) {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.is_dir() {
                walk(&path, root, acc);
            } else {
                acc.push(path.strip_prefix(root).unwrap().to_path_buf());
            }
        }
    }
    let mut files = Vec::new();
    walk(root, root, &mut files);
    files.sort();
    files
}

#[tokio::test]
async fn full_coverage_lands_on_disk_with_exact_counts() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(TileStore::new(dir.path()));
    let bbox = istanbul_bbox();
    let expected = coord::coverage_count(&bbox, 10, 11);
    assert!(expected > 0);

    let cdb = Arc::new(FakeSource::new(
        "cdb",
        TileKind::Raster,
        Behavior::Serve {
            payload: png_payload(),
            content_type: Some("image/png".to_string()),
        },
    ));

    let pipeline = Pipeline::new(vec![Arc::clone(&cdb)], Arc::clone(&store), quick_config(3));
    let summary = pipeline
        .run("istanbul", coord::coverage(&bbox, 10, 11), &CancellationToken::new())
        .await;

    assert_eq!(summary.totals.total, expected);
    assert_eq!(summary.totals.stored, expected);
    assert_eq!(summary.totals.failed, 0);

    let files = tree_files(dir.path());
    assert_eq!(files.len() as u64, expected);
    assert!(files
        .iter()
        .all(|p| p.starts_with("istanbul/raster/cdb") && p.extension().unwrap() == "png"));
}

#[tokio::test]
async fn all_404_vector_source_yields_no_files_and_raster_covers() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(TileStore::new(dir.path()));
    let bbox = istanbul_bbox();
    let expected = coord::coverage_count(&bbox, 10, 10);

    let vec_source = Arc::new(FakeSource::new("vec", TileKind::Vector, Behavior::NotFound));
    let ras_source = Arc::new(FakeSource::new(
        "ras",
        TileKind::Raster,
        Behavior::Serve {
            payload: png_payload(),
            content_type: Some("image/png".to_string()),
        },
    ));

    let pipeline = Pipeline::new(
        vec![Arc::clone(&vec_source), Arc::clone(&ras_source)],
        Arc::clone(&store),
        quick_config(3),
    );
    let summary = pipeline
        .run("r", coord::coverage(&bbox, 10, 10), &CancellationToken::new())
        .await;

    assert_eq!(summary.totals.stored, expected);
    assert_eq!(summary.per_source["vec"].not_found, expected);
    assert_eq!(summary.per_source["ras"].stored, expected);

    let files = tree_files(dir.path());
    assert!(files.iter().all(|p| p.starts_with("r/raster/ras")));
    assert!(!dir.path().join("r/vector/vec").exists());
}

#[tokio::test]
async fn tile_served_by_both_kinds_ends_under_the_vector_source() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(TileStore::new(dir.path()));

    // Raster first in config order; vector must still win.
    let raster = Arc::new(FakeSource::new(
        "ras",
        TileKind::Raster,
        Behavior::Serve {
            payload: png_payload(),
            content_type: Some("image/png".to_string()),
        },
    ));
    let vector = Arc::new(FakeSource::new(
        "vec",
        TileKind::Vector,
        Behavior::Serve {
            payload: mvt_payload(),
            content_type: Some("application/x-protobuf".to_string()),
        },
    ));

    let pipeline = Pipeline::new(
        vec![Arc::clone(&raster), Arc::clone(&vector)],
        Arc::clone(&store),
        quick_config(3),
    );
    let coord = TileCoord { zoom: 10, x: 5, y: 5 };
    let summary = pipeline
        .run("r", std::iter::once(coord), &CancellationToken::new())
        .await;

    assert_eq!(summary.totals.stored, 1);
    assert!(store.exists("r", TileKind::Vector, "vec", &coord));
    assert!(!store.exists("r", TileKind::Raster, "ras", &coord));
    assert_eq!(raster.calls(), 0, "raster never consulted");
}

#[tokio::test]
async fn retry_limit_decides_between_stored_and_fallback() {
    // Three 500s then a 200. With 3 retries the fourth attempt lands.
    let dir = TempDir::new().unwrap();
    let store = Arc::new(TileStore::new(dir.path()));
    let flaky = Arc::new(FakeSource::new(
        "flaky",
        TileKind::Raster,
        Behavior::TransientThenServe {
            failures: 3,
            payload: png_payload(),
        },
    ));
    let coord = TileCoord { zoom: 10, x: 1, y: 1 };

    let pipeline = Pipeline::new(vec![Arc::clone(&flaky)], Arc::clone(&store), quick_config(3));
    let summary = pipeline
        .run("r", std::iter::once(coord), &CancellationToken::new())
        .await;
    assert_eq!(summary.totals.stored, 1);
    assert_eq!(flaky.calls(), 4);

    // With only 2 retries the source is exhausted and fallback runs.
    let dir2 = TempDir::new().unwrap();
    let store2 = Arc::new(TileStore::new(dir2.path()));
    let flaky2 = Arc::new(FakeSource::new(
        "flaky",
        TileKind::Raster,
        Behavior::TransientThenServe {
            failures: 3,
            payload: png_payload(),
        },
    ));
    let backup = Arc::new(FakeSource::new(
        "backup",
        TileKind::Raster,
        Behavior::Serve {
            payload: png_payload(),
            content_type: Some("image/png".to_string()),
        },
    ));

    let pipeline2 = Pipeline::new(
        vec![Arc::clone(&flaky2), Arc::clone(&backup)],
        Arc::clone(&store2),
        quick_config(2),
    );
    let summary2 = pipeline2
        .run("r", std::iter::once(coord), &CancellationToken::new())
        .await;

    assert_eq!(flaky2.calls(), 3, "1 attempt + 2 retries");
    assert_eq!(summary2.per_source["flaky"].failed, 1);
    assert!(store2.exists("r", TileKind::Raster, "backup", &coord));
}

#[tokio::test]
async fn known_blank_fingerprint_is_rejected_and_fallback_advances() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(TileStore::new(dir.path()));

    // The primary source serves a known transparent-tile payload; the
    // validator is configured with its fingerprint.
    let blank = png_payload();
    let blanks = Arc::new(
        FakeSource::new(
            "blanks",
            TileKind::Raster,
            Behavior::Serve {
                payload: blank.clone(),
                content_type: Some("image/png".to_string()),
            },
        )
        .with_validator(Validator::new(vec![blank])),
    );
    let mut real = png_payload();
    real[12] ^= 0xFF; // different pixel data, same magic
    let backup = Arc::new(FakeSource::new(
        "backup",
        TileKind::Raster,
        Behavior::Serve {
            payload: real,
            content_type: Some("image/png".to_string()),
        },
    ));

    let pipeline = Pipeline::new(
        vec![Arc::clone(&blanks), Arc::clone(&backup)],
        Arc::clone(&store),
        quick_config(3),
    );
    let coord = TileCoord { zoom: 9, x: 3, y: 3 };
    let summary = pipeline
        .run("r", std::iter::once(coord), &CancellationToken::new())
        .await;

    assert_eq!(summary.per_source["blanks"].empty, 1);
    assert_eq!(blanks.calls(), 1, "empty answers are not retried");
    assert!(!store.exists("r", TileKind::Raster, "blanks", &coord));
    assert!(store.exists("r", TileKind::Raster, "backup", &coord));
}

#[tokio::test]
async fn resume_refetches_exactly_the_missing_tiles() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(TileStore::new(dir.path()));
    let source = Arc::new(FakeSource::new(
        "cdb",
        TileKind::Raster,
        Behavior::Serve {
            payload: png_payload(),
            content_type: Some("image/png".to_string()),
        },
    ));

    let coords: Vec<TileCoord> = (0..16).map(|i| TileCoord { zoom: 10, x: i, y: 0 }).collect();
    let pipeline = Pipeline::new(vec![Arc::clone(&source)], Arc::clone(&store), quick_config(3));
    let first = pipeline
        .run("r", coords.clone().into_iter(), &CancellationToken::new())
        .await;
    assert_eq!(first.totals.stored, 16);
    let calls_before = source.calls();

    // Delete half the files.
    for coord in coords.iter().step_by(2) {
        let path = store.tile_path("r", TileKind::Raster, "cdb", coord, "png");
        std::fs::remove_file(path).unwrap();
    }

    let second = pipeline
        .run("r", coords.clone().into_iter(), &CancellationToken::new())
        .await;
    assert_eq!(second.totals.stored, 8);
    assert_eq!(second.totals.already_present, 8);
    assert_eq!(source.calls() - calls_before, 8, "only deleted tiles refetched");

    for coord in &coords {
        assert!(store.exists("r", TileKind::Raster, "cdb", coord));
    }
}

#[tokio::test]
async fn two_runs_produce_identical_trees_and_metadata() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(TileStore::new(dir.path()));
    let bbox = istanbul_bbox();
    let source = Arc::new(FakeSource::new(
        "cdb",
        TileKind::Raster,
        Behavior::Serve {
            payload: png_payload(),
            content_type: Some("image/png".to_string()),
        },
    ));
    let pipeline = Pipeline::new(vec![Arc::clone(&source)], Arc::clone(&store), quick_config(3));
    let builder = tilevault::metadata::MetadataBuilder::new(dir.path());

    let first = pipeline
        .run("r", coord::coverage(&bbox, 10, 10), &CancellationToken::new())
        .await;
    let tree_a = tree_files(dir.path());
    let meta_a = builder.build("r", &bbox, 10, 10).unwrap();

    let second = pipeline
        .run("r", coord::coverage(&bbox, 10, 10), &CancellationToken::new())
        .await;
    let tree_b = tree_files(dir.path());
    let meta_b = builder.build("r", &bbox, 10, 10).unwrap();

    assert_eq!(first.totals.stored, second.totals.already_present);
    assert_eq!(second.totals.stored, 0);
    assert_eq!(tree_a, tree_b);
    assert_eq!(meta_a.raster, meta_b.raster);
    assert_eq!(meta_a.vector, meta_b.vector);
}

#[tokio::test]
async fn cancellation_leaves_a_consistent_resumable_tree() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(TileStore::new(dir.path()));
    let source = Arc::new(
        FakeSource::new(
            "slow",
            TileKind::Raster,
            Behavior::Serve {
                payload: png_payload(),
                content_type: Some("image/png".to_string()),
            },
        )
        .with_delay(Duration::from_millis(5)),
    );

    let coords: Vec<TileCoord> = (0..200).map(|i| TileCoord { zoom: 10, x: i, y: 0 }).collect();
    let config = PipelineConfig {
        workers_per_source: 2,
        ..quick_config(3)
    };

    let cancel = CancellationToken::new();
    let pipeline = Pipeline::new(vec![Arc::clone(&source)], Arc::clone(&store), config.clone());
    let run = {
        let cancel = cancel.clone();
        let coords = coords.clone();
        let store = Arc::clone(&store);
        let source = Arc::clone(&source);
        tokio::spawn(async move {
            Pipeline::new(vec![source], store, config)
                .run("r", coords.into_iter(), &cancel)
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();
    let summary = run.await.unwrap();

    assert!(summary.cancelled);
    assert!(summary.totals.stored < 200, "cancelled well before completion");

    // Every file present is a complete payload; no tmp leftovers.
    for path in tree_files(dir.path()) {
        let full = dir.path().join(&path);
        assert!(path.extension().unwrap() != "tmp");
        assert!(!std::fs::read(full).unwrap().is_empty());
    }

    // A resumed run completes without refetching what was stored.
    let stored_before = summary.totals.stored;
    let calls_before = source.calls();
    let resumed = pipeline
        .run("r", coords.into_iter(), &CancellationToken::new())
        .await;
    assert!(!resumed.cancelled);
    assert_eq!(resumed.totals.already_present, stored_before);
    assert_eq!(resumed.totals.stored, 200 - stored_before);
    assert!(u64::from(source.calls() - calls_before) >= resumed.totals.stored);

    for coord in (0..200).map(|i| TileCoord { zoom: 10, x: i, y: 0 }) {
        assert!(store.exists("r", TileKind::Raster, "slow", &coord));
    }
}

/// Full orchestrator run against a real MBTiles archive, no network.
#[tokio::test]
async fn orchestrator_run_from_local_archive_writes_tiles_and_metadata() {
    let dir = TempDir::new().unwrap();
    let archive_path = dir.path().join("city.mbtiles");
    let output_dir = dir.path().join("map_tiles");

    // A degenerate (point) bbox covers exactly one tile per zoom.
    let bbox = Bbox::new(28.98, 41.01, 28.98, 41.01).unwrap();
    let conn = Connection::open(&archive_path).unwrap();
    conn.execute_batch(
        "CREATE TABLE metadata (name TEXT, value TEXT);
         CREATE TABLE tiles (zoom_level INTEGER, tile_column INTEGER,
                             tile_row INTEGER, tile_data BLOB);",
    )
    .unwrap();
    for zoom in 10..=11 {
        let tile = coord::lat_lng_to_tile(41.01, 28.98, zoom).unwrap();
        // MBTiles rows are bottom-origin.
        let tms_row = (1u32 << tile.zoom) - 1 - tile.y;
        conn.execute(
            "INSERT INTO tiles VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![tile.zoom, tile.x, tms_row, png_payload()],
        )
        .unwrap();
    }
    drop(conn);

    let raw = format!(
        r#"{{
            "regions": {{
                "city": {{"bbox": [{}, {}, {}, {}], "min_zoom": 10, "max_zoom": 11}}
            }},
            "sources": [
                {{"name": "archive", "kind": "local", "tile_kind": "raster",
                  "path": {:?}, "min_zoom": 0, "max_zoom": 14}}
            ],
            "output_dir": {:?},
            "retry_attempts": 1,
            "timeout": 5
        }}"#,
        bbox.min_lng, bbox.min_lat, bbox.max_lng, bbox.max_lat, archive_path, output_dir
    );
    let config: ConfigFile = serde_json::from_str(&raw).unwrap();
    config.validate().unwrap();

    let options = RunOptions {
        region: Some("city".to_string()),
        ..Default::default()
    };
    let report = orchestrator::run(&config, options, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.summary.totals.total, 2);
    assert_eq!(report.summary.totals.stored, 2);
    assert!(!report.summary.all_failed());

    let metadata_path = report.metadata_path.unwrap();
    let raw_metadata = std::fs::read_to_string(&metadata_path).unwrap();
    let metadata: tilevault::metadata::RegionMetadata = serde_json::from_str(&raw_metadata).unwrap();
    assert_eq!(metadata.raster["archive"].tile_count, 2);
    assert_eq!(metadata.raster["archive"].available_zooms, vec![10, 11]);
    assert_eq!(metadata.region_info.center, [28.98, 41.01]);
}

/// A bbox entirely outside every source's declared bounds never issues
/// a request: all tiles are uncoverable and the run reports failure.
#[tokio::test]
async fn bbox_outside_all_source_bounds_is_uncoverable() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(TileStore::new(dir.path()));

    let mut narrow = FakeSource::new(
        "turkey_only",
        TileKind::Raster,
        Behavior::Serve {
            payload: png_payload(),
            content_type: Some("image/png".to_string()),
        },
    );
    narrow.descriptor.bounds = Some(Bbox::new(26.0, 36.0, 45.0, 42.0).unwrap());
    let narrow = Arc::new(narrow);

    // New York is nowhere near Turkey.
    let bbox = Bbox::new(-74.5, 40.4, -73.5, 41.0).unwrap();
    let pipeline = Pipeline::new(vec![Arc::clone(&narrow)], Arc::clone(&store), quick_config(3));
    let summary = pipeline
        .run("nyc", coord::coverage(&bbox, 10, 10), &CancellationToken::new())
        .await;

    assert!(summary.totals.uncoverable > 0);
    assert_eq!(summary.totals.uncoverable, summary.totals.total);
    assert_eq!(narrow.calls(), 0);
    assert!(summary.all_failed());
}
