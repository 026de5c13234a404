//! Local MBTiles archive adapter
//!
//! Serves tiles from a read-only SQLite archive keyed by `(z, x, y)`.
//! The archive is opened once per run and shared by all workers;
//! queries are serialized behind a mutex, which is cheap next to the
//! network latency the rest of the pipeline absorbs.
//!
//! Bounds and zoom range come from the configuration entry when given,
//! falling back to the archive's `metadata` table. MBTiles stores rows
//! bottom-origin (TMS), so every XYZ lookup flips the row.

use super::types::{SourceDescriptor, SourceError, TileFetcher, TileResult};
use crate::coord::{Bbox, TileCoord};
use crate::validate::{Validation, Validator};
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Physical table layout of the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArchiveLayout {
    /// Standard MBTiles `tiles` table.
    Tiles,
    /// Deduplicated layout with an `images`/`map` join.
    ImagesMap,
}

/// A read-only local tile archive.
pub struct MbtilesSource {
    descriptor: SourceDescriptor,
    conn: Mutex<Connection>,
    layout: ArchiveLayout,
    layer_names: Vec<String>,
    validator: Arc<Validator>,
}

impl MbtilesSource {
    /// Opens an archive read-only and probes its layout and metadata.
    ///
    /// Configured `bounds`, `min_zoom` and `max_zoom` override what the
    /// archive's metadata table declares.
    pub fn open(
        descriptor: SourceDescriptor,
        path: &Path,
        validator: Arc<Validator>,
    ) -> Result<Self, SourceError> {
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY).map_err(
            |e| SourceError::ArchiveOpen {
                path: path.display().to_string(),
                reason: e.to_string(),
            },
        )?;

        let layout = Self::detect_layout(&conn).ok_or_else(|| SourceError::UnsupportedArchive {
            path: path.display().to_string(),
        })?;

        let mut descriptor = descriptor;
        if descriptor.bounds.is_none() {
            descriptor.bounds = Self::metadata_bounds(&conn)?;
        }
        if descriptor.min_zoom.is_none() {
            descriptor.min_zoom = Self::metadata_zoom(&conn, "minzoom")?;
        }
        if descriptor.max_zoom.is_none() {
            descriptor.max_zoom = Self::metadata_zoom(&conn, "maxzoom")?;
        }

        let layer_names = Self::metadata_layer_names(&conn)?;

        debug!(
            source = %descriptor.name,
            path = %path.display(),
            ?layout,
            layers = layer_names.len(),
            "opened tile archive"
        );

        Ok(Self {
            descriptor,
            conn: Mutex::new(conn),
            layout,
            layer_names,
            validator,
        })
    }

    fn detect_layout(conn: &Connection) -> Option<ArchiveLayout> {
        let has_table = |name: &str| -> bool {
            conn.query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [name],
                |_| Ok(()),
            )
            .optional()
            .ok()
            .flatten()
            .is_some()
        };

        if has_table("tiles") {
            Some(ArchiveLayout::Tiles)
        } else if has_table("images") && has_table("map") {
            Some(ArchiveLayout::ImagesMap)
        } else {
            None
        }
    }

    fn metadata_value(conn: &Connection, name: &str) -> Result<Option<String>, SourceError> {
        let value = conn
            .query_row(
                "SELECT value FROM metadata WHERE name = ?1",
                [name],
                |row| row.get::<_, String>(0),
            )
            .optional();
        match value {
            Ok(v) => Ok(v),
            // Archives without a metadata table are still readable.
            Err(rusqlite::Error::SqliteFailure(_, _)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Parses the metadata `bounds` value, "w,s,e,n".
    fn metadata_bounds(conn: &Connection) -> Result<Option<Bbox>, SourceError> {
        let Some(raw) = Self::metadata_value(conn, "bounds")? else {
            return Ok(None);
        };
        let parts: Vec<f64> = raw
            .split(',')
            .filter_map(|p| p.trim().parse().ok())
            .collect();
        match Bbox::from_slice(&parts) {
            Ok(bounds) => Ok(Some(bounds)),
            Err(_) => {
                warn!(bounds = %raw, "ignoring unparseable archive bounds");
                Ok(None)
            }
        }
    }

    fn metadata_zoom(conn: &Connection, name: &str) -> Result<Option<u8>, SourceError> {
        Ok(Self::metadata_value(conn, name)?.and_then(|v| v.trim().parse().ok()))
    }

    /// Layer names from the metadata `json` field's `vector_layers`.
    fn metadata_layer_names(conn: &Connection) -> Result<Vec<String>, SourceError> {
        let Some(raw) = Self::metadata_value(conn, "json")? else {
            return Ok(Vec::new());
        };
        let parsed: serde_json::Value = match serde_json::from_str(&raw) {
            Ok(v) => v,
            Err(_) => return Ok(Vec::new()),
        };
        let names = parsed["vector_layers"]
            .as_array()
            .map(|layers| {
                layers
                    .iter()
                    .filter_map(|l| l["id"].as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();
        Ok(names)
    }

    /// Row index as stored in the archive for an XYZ coordinate.
    ///
    /// MBTiles rows are bottom-origin (TMS), inverted relative to XYZ.
    fn stored_row(&self, coord: &TileCoord) -> u32 {
        (1u32 << coord.zoom) - 1 - coord.y
    }

    /// Raw tile lookup. `None` means the archive has no such tile.
    pub fn get_tile(&self, coord: &TileCoord) -> Result<Option<Vec<u8>>, SourceError> {
        let row = self.stored_row(coord);
        let conn = self.conn.lock().expect("archive mutex poisoned");
        let sql = match self.layout {
            ArchiveLayout::Tiles => {
                "SELECT tile_data FROM tiles \
                 WHERE zoom_level = ?1 AND tile_column = ?2 AND tile_row = ?3"
            }
            ArchiveLayout::ImagesMap => {
                "SELECT i.tile_data FROM images i \
                 JOIN map m ON i.tile_id = m.tile_id \
                 WHERE m.zoom_level = ?1 AND m.tile_column = ?2 AND m.tile_row = ?3"
            }
        };
        let data = conn
            .query_row(sql, (coord.zoom, coord.x, row), |r| r.get::<_, Vec<u8>>(0))
            .optional()?;
        Ok(data)
    }

    /// Declared bounds, after metadata fallback.
    pub fn bounds(&self) -> Option<Bbox> {
        self.descriptor.bounds
    }

    /// Declared zoom range, after metadata fallback.
    pub fn zoom_range(&self) -> (Option<u8>, Option<u8>) {
        (self.descriptor.min_zoom, self.descriptor.max_zoom)
    }

    /// Vector layer names declared by the archive, empty for raster.
    pub fn layer_names(&self) -> &[String] {
        &self.layer_names
    }
}

impl TileFetcher for MbtilesSource {
    async fn fetch(&self, coord: TileCoord) -> TileResult {
        if !self.descriptor.accepts(&coord) {
            return TileResult::NotFound;
        }

        let blob = match self.get_tile(&coord) {
            Ok(Some(blob)) => blob,
            Ok(None) => return TileResult::NotFound,
            Err(e) => {
                return TileResult::Transient {
                    reason: format!("archive read failed: {e}"),
                }
            }
        };

        if blob.is_empty() {
            return TileResult::Empty;
        }

        match self.validator.validate(self.descriptor.tile_kind, &blob) {
            Validation::Valid(bytes) => TileResult::Got {
                bytes,
                content_type: None,
                source_name: self.descriptor.name.clone(),
            },
            Validation::Empty => TileResult::Empty,
            Validation::Invalid(reason) => TileResult::Invalid { reason },
        }
    }

    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }
}
