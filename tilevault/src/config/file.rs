//! JSON configuration file loading and validation

use crate::coord::{Bbox, CoordError, MAX_ZOOM};
use crate::source::TileKind;
use crate::validate::decode_hex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file path.
pub const DEFAULT_CONFIG_PATH: &str = "config.json";
/// Default tile tree root.
pub const DEFAULT_OUTPUT_DIR: &str = "map_tiles";
/// Default bounded worker-pool size per source.
pub const DEFAULT_WORKERS_PER_SOURCE: usize = 8;
/// Default fetch attempts per (source, tile).
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
/// Default per-request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
/// Default zoom range applied to regions that omit one.
pub const DEFAULT_MIN_ZOOM: u8 = 10;
pub const DEFAULT_MAX_ZOOM: u8 = 12;

fn default_output_dir() -> PathBuf {
    PathBuf::from(DEFAULT_OUTPUT_DIR)
}
fn default_workers_per_source() -> usize {
    DEFAULT_WORKERS_PER_SOURCE
}
fn default_retry_attempts() -> u32 {
    DEFAULT_RETRY_ATTEMPTS
}
fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}
fn default_user_agent() -> String {
    crate::source::DEFAULT_USER_AGENT.to_string()
}
fn default_prefer_vector() -> bool {
    true
}
fn default_min_zoom() -> u8 {
    DEFAULT_MIN_ZOOM
}
fn default_max_zoom() -> u8 {
    DEFAULT_MAX_ZOOM
}

/// Which adapter a source entry becomes. Authoritative over any other
/// hint in the entry (URL templates are only meaningful for `http`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Http,
    Local,
}

/// A named geographic region with its zoom range.
#[derive(Debug, Clone, Deserialize)]
pub struct RegionSpec {
    /// `[min_lng, min_lat, max_lng, max_lat]`
    pub bbox: Vec<f64>,
    #[serde(default = "default_min_zoom")]
    pub min_zoom: u8,
    #[serde(default = "default_max_zoom")]
    pub max_zoom: u8,
    #[serde(default)]
    pub description: String,
}

impl RegionSpec {
    /// The validated bounding box.
    pub fn bounds(&self) -> Result<Bbox, CoordError> {
        Bbox::from_slice(&self.bbox)
    }
}

/// One entry in the ordered source list.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceSpec {
    pub name: String,
    #[serde(rename = "kind", alias = "type")]
    pub kind: SourceKind,
    #[serde(rename = "tile_kind", alias = "tile_type")]
    pub tile_kind: TileKind,
    /// URL template with `{z}`, `{x}`, `{y}` placeholders (http only).
    #[serde(default)]
    pub url: Option<String>,
    /// Archive path (local only).
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Declared coverage, `[min_lng, min_lat, max_lng, max_lat]`.
    #[serde(default)]
    pub bounds: Option<Vec<f64>>,
    #[serde(default)]
    pub min_zoom: Option<u8>,
    #[serde(default)]
    pub max_zoom: Option<u8>,
    #[serde(default)]
    pub description: String,
}

impl SourceSpec {
    /// Declared bounds as a validated box, if any.
    pub fn declared_bounds(&self) -> Result<Option<Bbox>, CoordError> {
        self.bounds.as_deref().map(Bbox::from_slice).transpose()
    }
}

/// The immutable run configuration.
///
/// Unknown fields are ignored so config files can carry annotations for
/// other tools.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub regions: BTreeMap<String, RegionSpec>,
    #[serde(rename = "sources", alias = "servers", default)]
    pub sources: Vec<SourceSpec>,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(
        rename = "workers_per_source",
        alias = "max_workers_per_server",
        default = "default_workers_per_source"
    )]
    pub workers_per_source: usize,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(rename = "timeout", default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Try vector sources before raster sources during fallback.
    #[serde(default = "default_prefer_vector")]
    pub prefer_vector: bool,
    /// Hex-encoded payloads to classify as empty (e.g. a provider's
    /// transparent 1x1 PNG).
    #[serde(default)]
    pub empty_tile_fingerprints: Vec<String>,
}

impl ConfigFile {
    /// Loads and validates a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        let config: ConfigFile = serde_json::from_str(&raw).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Structural validation beyond what serde enforces.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, region) in &self.regions {
            region.bounds().map_err(|e| ConfigError::InvalidRegion {
                name: name.clone(),
                reason: e.to_string(),
            })?;
            if region.min_zoom > region.max_zoom || region.max_zoom > MAX_ZOOM {
                return Err(ConfigError::InvalidRegion {
                    name: name.clone(),
                    reason: format!(
                        "zoom range {}-{} is invalid (max {MAX_ZOOM})",
                        region.min_zoom, region.max_zoom
                    ),
                });
            }
        }

        let mut seen = std::collections::BTreeSet::new();
        for source in &self.sources {
            if !seen.insert(&source.name) {
                return Err(ConfigError::DuplicateSource(source.name.clone()));
            }
            match source.kind {
                SourceKind::Http if source.url.is_none() => {
                    return Err(ConfigError::MissingField {
                        source_id: source.name.clone(),
                        field: "url",
                    });
                }
                SourceKind::Local if source.path.is_none() => {
                    return Err(ConfigError::MissingField {
                        source_id: source.name.clone(),
                        field: "path",
                    });
                }
                _ => {}
            }
            source
                .declared_bounds()
                .map_err(|e| ConfigError::InvalidSourceBounds {
                    source_id: source.name.clone(),
                    reason: e.to_string(),
                })?;
        }

        for fingerprint in &self.empty_tile_fingerprints {
            if decode_hex(fingerprint).is_none() {
                return Err(ConfigError::InvalidFingerprint(fingerprint.clone()));
            }
        }

        if self.workers_per_source == 0 {
            return Err(ConfigError::InvalidValue {
                field: "workers_per_source",
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(())
    }

    /// Looks up a configured region by name.
    pub fn region(&self, name: &str) -> Result<&RegionSpec, ConfigError> {
        self.regions
            .get(name)
            .ok_or_else(|| ConfigError::UnknownRegion(name.to_string()))
    }

    /// The per-request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Decoded empty-tile fingerprints.
    ///
    /// Validation has already checked the hex, so this cannot fail
    /// after [`ConfigFile::load`].
    pub fn fingerprints(&self) -> Vec<Vec<u8>> {
        self.empty_tile_fingerprints
            .iter()
            .filter_map(|s| decode_hex(s))
            .collect()
    }
}

/// Errors loading or validating configuration. All of these are fatal
/// at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("region '{name}' is invalid: {reason}")]
    InvalidRegion { name: String, reason: String },

    #[error("region '{0}' is not configured")]
    UnknownRegion(String),

    #[error("source '{0}' is configured more than once")]
    DuplicateSource(String),

    #[error("source '{source_id}' is missing required field '{field}'")]
    MissingField { source_id: String, field: &'static str },

    #[error("source '{source_id}' has invalid bounds: {reason}")]
    InvalidSourceBounds { source_id: String, reason: String },

    #[error("empty-tile fingerprint is not valid hex: '{0}'")]
    InvalidFingerprint(String),

    #[error("config field '{field}' is invalid: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}
