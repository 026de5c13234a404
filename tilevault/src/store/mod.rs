//! Tile store
//!
//! Writes validated tiles into the content-addressed tree
//! `<output_dir>/<region>/<raster|vector>/<source>/<z>/<x>/<y>.<ext>`.
//! Writes go to a `.tmp` sibling and are renamed into place, so a file
//! that exists is always a complete payload; `exists` lets resumed runs
//! skip tiles that are already on disk. Region and source path
//! components are percent-encoded so spaces and non-ASCII names are
//! filesystem-safe.

use crate::coord::TileCoord;
use crate::source::TileKind;
use crate::validate::{raster_format, RasterFormat};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::path::{Path, PathBuf};
use tracing::trace;

/// Characters kept verbatim in region/source path components.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.');

/// Extensions a raster tile may have on disk.
const RASTER_EXTENSIONS: [&str; 3] = ["png", "jpg", "webp"];
/// Extension for vector tiles on disk.
const VECTOR_EXTENSION: &str = "pbf";

/// Encodes a region or source name for use as a path component.
pub fn encode_component(name: &str) -> String {
    utf8_percent_encode(name, PATH_SEGMENT).to_string()
}

/// Decodes a path component back to the original name.
pub fn decode_component(component: &str) -> String {
    percent_decode_str(component)
        .decode_utf8()
        .map(|s| s.to_string())
        .unwrap_or_else(|_| component.to_string())
}

/// Picks the on-disk extension for a tile payload.
///
/// Vector tiles are always `pbf`. Raster extensions follow the declared
/// content type, then the payload magic, and default to `png`.
pub fn extension_for(kind: TileKind, content_type: Option<&str>, data: &[u8]) -> &'static str {
    if kind == TileKind::Vector {
        return VECTOR_EXTENSION;
    }
    if let Some(ct) = content_type {
        let ct = ct.to_ascii_lowercase();
        if ct.contains("jpeg") || ct.contains("jpg") {
            return "jpg";
        }
        if ct.contains("webp") {
            return "webp";
        }
        if ct.contains("png") {
            return "png";
        }
    }
    match raster_format(data) {
        Some(RasterFormat::Jpeg) => "jpg",
        Some(RasterFormat::Webp) => "webp",
        _ => "png",
    }
}

/// Errors writing to the tile tree.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to create directory '{path}': {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write '{path}': {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to rename '{path}' into place: {source}")]
    Rename {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Handle on the tile tree, shared by all workers.
///
/// The only mutable state is the filesystem itself; the atomic-rename
/// discipline plus single-worker tile ownership keeps writes safe.
#[derive(Debug, Clone)]
pub struct TileStore {
    root: PathBuf,
}

impl TileStore {
    /// Creates a store rooted at the output directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The output directory this store writes under.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding one source's tiles for a region.
    pub fn source_dir(&self, region: &str, kind: TileKind, source: &str) -> PathBuf {
        self.root
            .join(encode_component(region))
            .join(kind.dir_name())
            .join(encode_component(source))
    }

    /// Full path for one tile file.
    pub fn tile_path(
        &self,
        region: &str,
        kind: TileKind,
        source: &str,
        coord: &TileCoord,
        ext: &str,
    ) -> PathBuf {
        self.source_dir(region, kind, source)
            .join(coord.zoom.to_string())
            .join(coord.x.to_string())
            .join(format!("{}.{}", coord.y, ext))
    }

    /// True when this tile already exists under the source, with any of
    /// the extensions its kind allows.
    pub fn exists(&self, region: &str, kind: TileKind, source: &str, coord: &TileCoord) -> bool {
        let exts: &[&str] = match kind {
            TileKind::Raster => &RASTER_EXTENSIONS,
            TileKind::Vector => &[VECTOR_EXTENSION],
        };
        exts.iter()
            .any(|ext| self.tile_path(region, kind, source, coord, ext).is_file())
    }

    /// Writes a tile crash-safely: payload to `<final>.tmp`, then an
    /// atomic rename onto the final path. Parent directories are
    /// created on demand.
    pub async fn write(
        &self,
        region: &str,
        kind: TileKind,
        source: &str,
        coord: &TileCoord,
        ext: &str,
        data: &[u8],
    ) -> Result<PathBuf, StoreError> {
        let final_path = self.tile_path(region, kind, source, coord, ext);
        let tmp_path = final_path.with_extension(format!("{ext}.tmp"));

        if let Some(parent) = final_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::CreateDir {
                    path: parent.display().to_string(),
                    source: e,
                })?;
        }

        tokio::fs::write(&tmp_path, data)
            .await
            .map_err(|e| StoreError::Write {
                path: tmp_path.display().to_string(),
                source: e,
            })?;

        tokio::fs::rename(&tmp_path, &final_path)
            .await
            .map_err(|e| StoreError::Rename {
                path: final_path.display().to_string(),
                source: e,
            })?;

        trace!(path = %final_path.display(), bytes = data.len(), "tile stored");
        Ok(final_path)
    }
}
