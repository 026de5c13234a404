//! Source types and traits

use crate::coord::{tile_bounds, Bbox, TileCoord};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;

/// Kind of payload a source serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TileKind {
    Raster,
    Vector,
}

impl TileKind {
    /// Directory name under the region root.
    pub fn dir_name(&self) -> &'static str {
        match self {
            TileKind::Raster => "raster",
            TileKind::Vector => "vector",
        }
    }
}

impl fmt::Display for TileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Outcome of a single fetch attempt against one source.
#[derive(Debug, Clone, PartialEq)]
pub enum TileResult {
    /// A validated payload ready to store.
    Got {
        bytes: Vec<u8>,
        content_type: Option<String>,
        source_name: String,
    },
    /// The source answered authoritatively with a blank tile.
    Empty,
    /// The source authoritatively does not have this tile.
    NotFound,
    /// A failure the retry policy may retry on the same source.
    Transient { reason: String },
    /// A payload or response that can never become valid by retrying.
    Invalid { reason: String },
}

/// Declared properties of a source, used by the pipeline to prefilter
/// work items instead of issuing doomed requests.
#[derive(Debug, Clone)]
pub struct SourceDescriptor {
    pub name: String,
    pub tile_kind: TileKind,
    pub min_zoom: Option<u8>,
    pub max_zoom: Option<u8>,
    pub bounds: Option<Bbox>,
}

impl SourceDescriptor {
    /// True when the declared zoom range and bounds admit this tile.
    pub fn accepts(&self, coord: &TileCoord) -> bool {
        if let Some(min) = self.min_zoom {
            if coord.zoom < min {
                return false;
            }
        }
        if let Some(max) = self.max_zoom {
            if coord.zoom > max {
                return false;
            }
        }
        if let Some(bounds) = &self.bounds {
            if !tile_bounds(coord).intersects(bounds) {
                return false;
            }
        }
        true
    }
}

/// Uniform fetch capability over HTTP tile servers and local archives.
pub trait TileFetcher: Send + Sync + 'static {
    /// Fetches one tile. Never fails at the Rust level; every outcome,
    /// including transport errors, is expressed as a [`TileResult`].
    fn fetch(&self, coord: TileCoord) -> impl Future<Output = TileResult> + Send;

    /// Declared properties for prefiltering and path construction.
    fn descriptor(&self) -> &SourceDescriptor;
}

/// Errors constructing or reading a source.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("invalid URL template '{template}': {reason}")]
    InvalidUrlTemplate { template: String, reason: String },

    #[error("invalid header '{name}': {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("failed to build HTTP client: {0}")]
    ClientBuild(String),

    #[error("failed to open tile archive '{path}': {reason}")]
    ArchiveOpen { path: String, reason: String },

    #[error("unsupported tile archive layout in '{path}'")]
    UnsupportedArchive { path: String },

    #[error("archive query failed: {0}")]
    ArchiveQuery(#[from] rusqlite::Error),
}
