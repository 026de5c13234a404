//! Tile source adapters
//!
//! A source is anything that can answer `fetch(z, x, y)`: a remote XYZ
//! HTTP server or a local MBTiles archive. Both expose the same
//! [`TileFetcher`] capability plus a declared descriptor (kind, zoom
//! range, bounds) so the pipeline can prefilter work items.

mod http;
mod mbtiles;
mod types;

pub use http::{HttpSource, DEFAULT_USER_AGENT};
pub use mbtiles::MbtilesSource;
pub use types::{SourceDescriptor, SourceError, TileFetcher, TileKind, TileResult};

use crate::coord::TileCoord;

/// A configured source: remote HTTP server or local archive.
///
/// The config's `kind` field is authoritative for which variant a
/// source entry becomes.
pub enum Source {
    Http(HttpSource),
    Local(MbtilesSource),
}

impl TileFetcher for Source {
    async fn fetch(&self, coord: TileCoord) -> TileResult {
        match self {
            Source::Http(s) => s.fetch(coord).await,
            Source::Local(s) => s.fetch(coord).await,
        }
    }

    fn descriptor(&self) -> &SourceDescriptor {
        match self {
            Source::Http(s) => s.descriptor(),
            Source::Local(s) => s.descriptor(),
        }
    }
}

impl Source {
    /// True for local archive sources.
    pub fn is_local(&self) -> bool {
        matches!(self, Source::Local(_))
    }
}
