//! Run orchestration
//!
//! Binds an immutable [`ConfigFile`] and a CLI selection into one
//! pipeline invocation: resolves the target region or ad-hoc bbox,
//! filters and constructs the source adapters, runs the acquisition
//! pipeline, then rebuilds the region metadata. All components are
//! created here per run; nothing lives in global state.

use crate::config::{ConfigError, ConfigFile, SourceKind, SourceSpec};
use crate::coord::{self, Bbox, CoordError, MAX_ZOOM};
use crate::metadata::{MetadataBuilder, MetadataError};
use crate::pipeline::{Pipeline, PipelineConfig, PipelineSummary, DEFAULT_PROGRESS_INTERVAL};
use crate::retry::RetryPolicy;
use crate::source::{HttpSource, MbtilesSource, Source, SourceDescriptor, SourceError};
use crate::store::TileStore;
use crate::validate::Validator;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// CLI-level selection of what to download.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Configured region name; mutually exclusive with `bbox`.
    pub region: Option<String>,
    /// Ad-hoc bounding box; mutually exclusive with `region`.
    pub bbox: Option<Bbox>,
    pub min_zoom: Option<u8>,
    pub max_zoom: Option<u8>,
    /// Remote HTTP source names to use.
    pub servers: Option<Vec<String>>,
    /// Local archive source names to use.
    pub sources: Option<Vec<String>>,
}

/// What one orchestrated run produced.
#[derive(Debug)]
pub struct RunReport {
    pub region: String,
    pub bbox: Bbox,
    pub min_zoom: u8,
    pub max_zoom: u8,
    pub summary: PipelineSummary,
    /// Written unless the run was cancelled.
    pub metadata_path: Option<PathBuf>,
}

/// Errors binding configuration and selection into a run. All are
/// fatal before or after the pipeline; partial-failure policy inside
/// the pipeline is expressed in the summary instead.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid selection: {0}")]
    Selection(String),

    #[error(transparent)]
    Coord(#[from] CoordError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Metadata(#[from] MetadataError),
}

/// Resolves the target: `(region name, bbox, min zoom, max zoom)`.
fn resolve_target(
    config: &ConfigFile,
    options: &RunOptions,
) -> Result<(String, Bbox, u8, u8), OrchestratorError> {
    let (name, bbox, region_min, region_max) = match (&options.region, &options.bbox) {
        (Some(_), Some(_)) => {
            return Err(OrchestratorError::Selection(
                "--region and --bbox are mutually exclusive".to_string(),
            ))
        }
        (None, None) => {
            return Err(OrchestratorError::Selection(
                "either --region or --bbox is required".to_string(),
            ))
        }
        (Some(region), None) => {
            let spec = config.region(region)?;
            let bbox = spec.bounds()?;
            (region.clone(), bbox, spec.min_zoom, spec.max_zoom)
        }
        (None, Some(bbox)) => {
            let name = format!(
                "bbox_{:.3}_{:.3}_{:.3}_{:.3}",
                bbox.min_lng, bbox.min_lat, bbox.max_lng, bbox.max_lat
            );
            (
                name,
                *bbox,
                crate::config::DEFAULT_MIN_ZOOM,
                crate::config::DEFAULT_MAX_ZOOM,
            )
        }
    };

    let min_zoom = options.min_zoom.unwrap_or(region_min);
    let max_zoom = options.max_zoom.unwrap_or(region_max);
    if min_zoom > max_zoom || max_zoom > MAX_ZOOM {
        return Err(OrchestratorError::Selection(format!(
            "zoom range {min_zoom}-{max_zoom} is invalid (max {MAX_ZOOM})"
        )));
    }

    Ok((name, bbox, min_zoom, max_zoom))
}

/// Applies the `--servers` / `--sources` filters to the configured
/// source list, preserving config order. The union of both filters is
/// the candidate list; with no filters, every configured source is in.
fn select_specs<'a>(
    config: &'a ConfigFile,
    options: &RunOptions,
) -> Result<Vec<&'a SourceSpec>, OrchestratorError> {
    let selected: Vec<&SourceSpec> = config
        .sources
        .iter()
        .filter(|spec| match spec.kind {
            SourceKind::Http => match &options.servers {
                Some(names) => names.iter().any(|n| n == &spec.name),
                None => options.sources.is_none(),
            },
            SourceKind::Local => match &options.sources {
                Some(names) => names.iter().any(|n| n == &spec.name),
                None => options.servers.is_none(),
            },
        })
        .collect();

    // A filter name that matches nothing is almost certainly a typo.
    for (filter, kind) in [(&options.servers, "server"), (&options.sources, "source")] {
        if let Some(names) = filter {
            for name in names {
                if !selected.iter().any(|s| &s.name == name) {
                    return Err(OrchestratorError::Selection(format!(
                        "unknown {kind} name '{name}'"
                    )));
                }
            }
        }
    }

    Ok(selected)
}

/// Constructs adapters for the selected specs.
///
/// Local archives that fail to open are skipped with a warning, as a
/// missing archive should not abort a mixed run; HTTP construction
/// errors are configuration mistakes and abort.
fn build_sources(
    config: &ConfigFile,
    specs: &[&SourceSpec],
    validator: &Arc<Validator>,
) -> Result<Vec<Arc<Source>>, OrchestratorError> {
    let mut sources = Vec::with_capacity(specs.len());
    for spec in specs {
        let descriptor = SourceDescriptor {
            name: spec.name.clone(),
            tile_kind: spec.tile_kind,
            min_zoom: spec.min_zoom,
            max_zoom: spec.max_zoom,
            bounds: spec.declared_bounds()?,
        };
        match spec.kind {
            SourceKind::Http => {
                let Some(url) = spec.url.clone() else {
                    return Err(ConfigError::MissingField {
                        source_id: spec.name.clone(),
                        field: "url",
                    }
                    .into());
                };
                let headers: Vec<(String, String)> = spec
                    .headers
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                let source = HttpSource::new(
                    descriptor,
                    url,
                    &headers,
                    &config.user_agent,
                    config.timeout(),
                    config.workers_per_source,
                    Arc::clone(validator),
                )?;
                sources.push(Arc::new(Source::Http(source)));
            }
            SourceKind::Local => {
                let Some(path) = spec.path.clone() else {
                    return Err(ConfigError::MissingField {
                        source_id: spec.name.clone(),
                        field: "path",
                    }
                    .into());
                };
                match MbtilesSource::open(descriptor, &path, Arc::clone(validator)) {
                    Ok(source) => sources.push(Arc::new(Source::Local(source))),
                    Err(e) => {
                        warn!(source = %spec.name, error = %e, "skipping unavailable local source");
                    }
                }
            }
        }
    }
    Ok(sources)
}

/// Runs one full acquisition: coverage, pipeline, metadata.
pub async fn run(
    config: &ConfigFile,
    options: RunOptions,
    cancel: &CancellationToken,
) -> Result<RunReport, OrchestratorError> {
    let (region, bbox, min_zoom, max_zoom) = resolve_target(config, &options)?;
    let specs = select_specs(config, &options)?;
    let validator = Arc::new(Validator::new(config.fingerprints()));
    let sources = build_sources(config, &specs, &validator)?;

    info!(
        region = %region,
        bbox = ?bbox.to_array(),
        min_zoom,
        max_zoom,
        sources = sources.len(),
        tiles = coord::coverage_count(&bbox, min_zoom, max_zoom),
        "starting acquisition"
    );

    let store = Arc::new(TileStore::new(&config.output_dir));
    let pipeline = Pipeline::new(
        sources,
        Arc::clone(&store),
        PipelineConfig {
            workers_per_source: config.workers_per_source,
            retry: RetryPolicy::new(config.retry_attempts),
            prefer_vector: config.prefer_vector,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        },
    );

    let coverage = coord::coverage(&bbox, min_zoom, max_zoom);
    let summary = pipeline.run(&region, coverage, cancel).await;

    let metadata_path = if summary.cancelled {
        None
    } else {
        let builder = MetadataBuilder::new(&config.output_dir);
        Some(builder.build_and_write(&region, &bbox, min_zoom, max_zoom)?)
    };

    Ok(RunReport {
        region,
        bbox,
        min_zoom,
        max_zoom,
        summary,
        metadata_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(raw: &str) -> ConfigFile {
        let config: ConfigFile = serde_json::from_str(raw).unwrap();
        config.validate().unwrap();
        config
    }

    fn sample_config() -> ConfigFile {
        config(
            r#"{
                "regions": {
                    "istanbul": {"bbox": [28.5, 40.8, 29.5, 41.2], "min_zoom": 10, "max_zoom": 15}
                },
                "sources": [
                    {"name": "cdb", "kind": "http", "tile_kind": "raster",
                     "url": "https://a.example.com/{z}/{x}/{y}.png"},
                    {"name": "omt", "kind": "http", "tile_kind": "vector",
                     "url": "https://b.example.com/{z}/{x}/{y}.pbf"},
                    {"name": "local_tr", "kind": "local", "tile_kind": "raster",
                     "path": "/nonexistent/turkey.mbtiles"}
                ]
            }"#,
        )
    }

    #[test]
    fn resolve_region_target() {
        let config = sample_config();
        let options = RunOptions {
            region: Some("istanbul".to_string()),
            ..Default::default()
        };
        let (name, bbox, min_zoom, max_zoom) = resolve_target(&config, &options).unwrap();
        assert_eq!(name, "istanbul");
        assert_eq!(bbox.to_array(), [28.5, 40.8, 29.5, 41.2]);
        assert_eq!((min_zoom, max_zoom), (10, 15));
    }

    #[test]
    fn zoom_overrides_apply() {
        let config = sample_config();
        let options = RunOptions {
            region: Some("istanbul".to_string()),
            min_zoom: Some(11),
            max_zoom: Some(12),
            ..Default::default()
        };
        let (_, _, min_zoom, max_zoom) = resolve_target(&config, &options).unwrap();
        assert_eq!((min_zoom, max_zoom), (11, 12));
    }

    #[test]
    fn bbox_target_synthesizes_region_name() {
        let config = sample_config();
        let options = RunOptions {
            bbox: Some(Bbox::new(28.5, 40.8, 29.5, 41.2).unwrap()),
            min_zoom: Some(10),
            max_zoom: Some(11),
            ..Default::default()
        };
        let (name, _, _, _) = resolve_target(&config, &options).unwrap();
        assert_eq!(name, "bbox_28.500_40.800_29.500_41.200");
    }

    #[test]
    fn region_and_bbox_are_exclusive() {
        let config = sample_config();
        let options = RunOptions {
            region: Some("istanbul".to_string()),
            bbox: Some(Bbox::new(0.0, 0.0, 1.0, 1.0).unwrap()),
            ..Default::default()
        };
        assert!(matches!(
            resolve_target(&config, &options),
            Err(OrchestratorError::Selection(_))
        ));
    }

    #[test]
    fn unknown_region_is_config_error() {
        let config = sample_config();
        let options = RunOptions {
            region: Some("qatar".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            resolve_target(&config, &options),
            Err(OrchestratorError::Config(ConfigError::UnknownRegion(_)))
        ));
    }

    #[test]
    fn inverted_zoom_override_rejected() {
        let config = sample_config();
        let options = RunOptions {
            region: Some("istanbul".to_string()),
            min_zoom: Some(14),
            max_zoom: Some(11),
            ..Default::default()
        };
        assert!(matches!(
            resolve_target(&config, &options),
            Err(OrchestratorError::Selection(_))
        ));
    }

    #[test]
    fn no_filters_selects_everything() {
        let config = sample_config();
        let specs = select_specs(&config, &RunOptions::default()).unwrap();
        let names: Vec<_> = specs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["cdb", "omt", "local_tr"]);
    }

    #[test]
    fn servers_filter_selects_http_only() {
        let config = sample_config();
        let options = RunOptions {
            servers: Some(vec!["cdb".to_string()]),
            ..Default::default()
        };
        let specs = select_specs(&config, &options).unwrap();
        let names: Vec<_> = specs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["cdb"]);
    }

    #[test]
    fn both_filters_take_the_union() {
        let config = sample_config();
        let options = RunOptions {
            servers: Some(vec!["omt".to_string()]),
            sources: Some(vec!["local_tr".to_string()]),
            ..Default::default()
        };
        let specs = select_specs(&config, &options).unwrap();
        let names: Vec<_> = specs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["omt", "local_tr"]);
    }

    #[test]
    fn unknown_filter_name_rejected() {
        let config = sample_config();
        let options = RunOptions {
            servers: Some(vec!["nope".to_string()]),
            ..Default::default()
        };
        assert!(matches!(
            select_specs(&config, &options),
            Err(OrchestratorError::Selection(_))
        ));
    }

    #[test]
    fn unavailable_local_source_is_skipped() {
        let config = sample_config();
        let specs = select_specs(&config, &RunOptions::default()).unwrap();
        let validator = Arc::new(Validator::default());
        let sources = build_sources(&config, &specs, &validator).unwrap();
        // The missing archive is dropped; both HTTP sources survive.
        assert_eq!(sources.len(), 2);
        assert!(sources.iter().all(|s| !s.is_local()));
    }
}
