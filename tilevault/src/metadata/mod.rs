//! Region metadata
//!
//! After acquisition, the tile tree under
//! `<output_dir>/<region>/{raster,vector}/<source>/` is scanned and
//! summarized into `<output_dir>/metadata/regions/<region>.json`. The
//! summary is a pure function of the tree: deleting and rebuilding the
//! metadata directory always reproduces the same layer figures.

use crate::coord::Bbox;
use crate::store::decode_component;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Per-source layer figures derived from the tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerInfo {
    pub tile_count: u64,
    pub total_size: u64,
    /// Sorted unique zoom levels present on disk.
    pub available_zooms: Vec<u8>,
    pub min_zoom: u8,
    pub max_zoom: u8,
}

/// Region header: where it is and what was requested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionInfo {
    /// `[min_lng, min_lat, max_lng, max_lat]`
    pub bbox: [f64; 4],
    /// `[lng, lat]` midpoint of the bbox.
    pub center: [f64; 2],
    pub min_zoom: u8,
    pub max_zoom: u8,
    /// RFC 3339 timestamp of the last rebuild.
    pub last_updated: String,
}

/// The per-region metadata document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionMetadata {
    pub region_info: RegionInfo,
    pub raster: BTreeMap<String, LayerInfo>,
    pub vector: BTreeMap<String, LayerInfo>,
}

/// Errors building or writing metadata.
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("failed to scan '{path}': {source}")]
    Scan {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write metadata '{path}': {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize metadata: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Builds region metadata documents from the tile tree.
#[derive(Debug, Clone)]
pub struct MetadataBuilder {
    output_dir: PathBuf,
}

impl MetadataBuilder {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Path of a region's metadata document.
    pub fn region_path(&self, region: &str) -> PathBuf {
        self.output_dir
            .join("metadata")
            .join("regions")
            .join(format!("{}.json", crate::store::encode_component(region)))
    }

    /// Scans the region's tree and assembles the document.
    pub fn build(
        &self,
        region: &str,
        bbox: &Bbox,
        min_zoom: u8,
        max_zoom: u8,
    ) -> Result<RegionMetadata, MetadataError> {
        let region_dir = self
            .output_dir
            .join(crate::store::encode_component(region));
        let (center_lng, center_lat) = bbox.center();

        let mut metadata = RegionMetadata {
            region_info: RegionInfo {
                bbox: bbox.to_array(),
                center: [center_lng, center_lat],
                min_zoom,
                max_zoom,
                last_updated: chrono::Utc::now().to_rfc3339(),
            },
            raster: BTreeMap::new(),
            vector: BTreeMap::new(),
        };

        for (kind_dir, layers) in [
            ("raster", &mut metadata.raster),
            ("vector", &mut metadata.vector),
        ] {
            let kind_path = region_dir.join(kind_dir);
            if !kind_path.is_dir() {
                continue;
            }
            for entry in read_dir(&kind_path)? {
                let source_dir = entry.path();
                if !source_dir.is_dir() {
                    continue;
                }
                let source_name = decode_component(&entry.file_name().to_string_lossy());
                match scan_layer(&source_dir)? {
                    Some(info) => {
                        debug!(
                            region = %region,
                            source = %source_name,
                            kind = kind_dir,
                            tiles = info.tile_count,
                            zooms = ?info.available_zooms,
                            "scanned layer"
                        );
                        layers.insert(source_name, info);
                    }
                    None => {
                        warn!(region = %region, source = %source_name, "layer directory holds no tiles");
                    }
                }
            }
        }

        Ok(metadata)
    }

    /// Writes the document atomically: tmp sibling, then rename.
    pub fn write(&self, region: &str, metadata: &RegionMetadata) -> Result<PathBuf, MetadataError> {
        let path = self.region_path(region);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| MetadataError::Write {
                path: parent.display().to_string(),
                source: e,
            })?;
        }

        let body = serde_json::to_vec_pretty(metadata)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, &body).map_err(|e| MetadataError::Write {
            path: tmp.display().to_string(),
            source: e,
        })?;
        fs::rename(&tmp, &path).map_err(|e| MetadataError::Write {
            path: path.display().to_string(),
            source: e,
        })?;
        Ok(path)
    }

    /// Builds and writes in one step, returning the document path.
    pub fn build_and_write(
        &self,
        region: &str,
        bbox: &Bbox,
        min_zoom: u8,
        max_zoom: u8,
    ) -> Result<PathBuf, MetadataError> {
        let metadata = self.build(region, bbox, min_zoom, max_zoom)?;
        self.write(region, &metadata)
    }
}

fn read_dir(path: &Path) -> Result<impl Iterator<Item = fs::DirEntry>, MetadataError> {
    let entries = fs::read_dir(path).map_err(|e| MetadataError::Scan {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(entries.filter_map(|e| e.ok()))
}

/// Walks one `<source>/<z>/<x>/<y>.<ext>` subtree.
///
/// Returns `None` when no tiles are present at all.
fn scan_layer(source_dir: &Path) -> Result<Option<LayerInfo>, MetadataError> {
    let mut available_zooms: Vec<u8> = Vec::new();
    let mut tile_count = 0u64;
    let mut total_size = 0u64;

    for zoom_entry in read_dir(source_dir)? {
        let zoom_dir = zoom_entry.path();
        let Some(zoom) = zoom_dir
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.parse::<u8>().ok())
        else {
            continue;
        };
        if !zoom_dir.is_dir() {
            continue;
        }

        let mut zoom_tiles = 0u64;
        for x_entry in read_dir(&zoom_dir)? {
            let x_dir = x_entry.path();
            if !x_dir.is_dir() {
                continue;
            }
            for tile_entry in read_dir(&x_dir)? {
                let tile_path = tile_entry.path();
                // Half-written leftovers are not tiles.
                if tile_path.extension().is_some_and(|e| e == "tmp") {
                    continue;
                }
                if let Ok(meta) = tile_entry.metadata() {
                    if meta.is_file() {
                        zoom_tiles += 1;
                        total_size += meta.len();
                    }
                }
            }
        }

        if zoom_tiles > 0 {
            available_zooms.push(zoom);
            tile_count += zoom_tiles;
        }
    }

    if available_zooms.is_empty() {
        return Ok(None);
    }
    available_zooms.sort_unstable();
    available_zooms.dedup();

    Ok(Some(LayerInfo {
        tile_count,
        total_size,
        min_zoom: available_zooms[0],
        max_zoom: *available_zooms.last().expect("non-empty"),
        available_zooms,
    }))
}
