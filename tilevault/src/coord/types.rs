//! Coordinate type definitions

use std::fmt;

/// Web Mercator valid latitude range
pub const MIN_LAT: f64 = -85.05112878;
pub const MAX_LAT: f64 = 85.05112878;

/// Valid longitude range
pub const MIN_LNG: f64 = -180.0;
pub const MAX_LNG: f64 = 180.0;

/// Supported XYZ zoom levels
pub const MIN_ZOOM: u8 = 0;
pub const MAX_ZOOM: u8 = 22;

/// Tile coordinates in the Web Mercator / Slippy Map system.
///
/// `x` runs west to east, `y` runs north to south, both in
/// `0..2^zoom`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileCoord {
    /// Zoom level (0-22)
    pub zoom: u8,
    /// X coordinate (east-west), 0 at west
    pub x: u32,
    /// Y coordinate (north-south), 0 at north
    pub y: u32,
}

impl TileCoord {
    /// Creates a tile coordinate, checking the per-zoom index bounds.
    pub fn new(zoom: u8, x: u32, y: u32) -> Result<Self, CoordError> {
        if zoom > MAX_ZOOM {
            return Err(CoordError::InvalidZoom(zoom));
        }
        let n = 1u32 << zoom;
        if x >= n || y >= n {
            return Err(CoordError::InvalidTileIndex { zoom, x, y });
        }
        Ok(Self { zoom, x, y })
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.x, self.y)
    }
}

/// Geographic bounding box `[min_lng, min_lat, max_lng, max_lat]`.
///
/// `min_lng > max_lng` encodes a box crossing the antimeridian; such
/// boxes are split into two ordinary boxes before tile enumeration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bbox {
    pub min_lng: f64,
    pub min_lat: f64,
    pub max_lng: f64,
    pub max_lat: f64,
}

impl Bbox {
    /// Creates a bounding box, validating coordinate ranges.
    ///
    /// Latitudes outside the Web Mercator range are accepted here and
    /// clamped during projection; latitudes must merely be ordered and
    /// within [-90, 90].
    pub fn new(min_lng: f64, min_lat: f64, max_lng: f64, max_lat: f64) -> Result<Self, CoordError> {
        for lng in [min_lng, max_lng] {
            if !(MIN_LNG..=MAX_LNG).contains(&lng) || !lng.is_finite() {
                return Err(CoordError::InvalidLongitude(lng));
            }
        }
        for lat in [min_lat, max_lat] {
            if !(-90.0..=90.0).contains(&lat) || !lat.is_finite() {
                return Err(CoordError::InvalidLatitude(lat));
            }
        }
        if min_lat > max_lat {
            return Err(CoordError::InvalidLatitude(min_lat));
        }
        Ok(Self {
            min_lng,
            min_lat,
            max_lng,
            max_lat,
        })
    }

    /// Parses the config/CLI array form `[min_lng, min_lat, max_lng, max_lat]`.
    pub fn from_slice(values: &[f64]) -> Result<Self, CoordError> {
        if values.len() != 4 {
            return Err(CoordError::InvalidBbox(values.len()));
        }
        Self::new(values[0], values[1], values[2], values[3])
    }

    /// Returns the `[lng, lat]` midpoint of the box.
    pub fn center(&self) -> (f64, f64) {
        ((self.min_lng + self.max_lng) / 2.0, (self.min_lat + self.max_lat) / 2.0)
    }

    /// True when the box wraps across the antimeridian.
    pub fn crosses_antimeridian(&self) -> bool {
        self.min_lng > self.max_lng
    }

    /// Splits an antimeridian-crossing box into its western and eastern
    /// halves. A non-crossing box is returned unchanged as the first
    /// element.
    pub fn split_antimeridian(&self) -> (Bbox, Option<Bbox>) {
        if !self.crosses_antimeridian() {
            return (*self, None);
        }
        let west = Bbox {
            min_lng: self.min_lng,
            min_lat: self.min_lat,
            max_lng: MAX_LNG,
            max_lat: self.max_lat,
        };
        let east = Bbox {
            min_lng: MIN_LNG,
            min_lat: self.min_lat,
            max_lng: self.max_lng,
            max_lat: self.max_lat,
        };
        (west, Some(east))
    }

    /// True when the two boxes overlap (inclusive edges).
    ///
    /// Antimeridian-crossing boxes are handled by testing each half.
    pub fn intersects(&self, other: &Bbox) -> bool {
        let (a1, a2) = self.split_antimeridian();
        let (b1, b2) = other.split_antimeridian();
        let halves_a = [Some(a1), a2];
        let halves_b = [Some(b1), b2];
        for a in halves_a.iter().flatten() {
            for b in halves_b.iter().flatten() {
                if a.max_lng >= b.min_lng
                    && a.min_lng <= b.max_lng
                    && a.max_lat >= b.min_lat
                    && a.min_lat <= b.max_lat
                {
                    return true;
                }
            }
        }
        false
    }

    /// Array form, the order used by config files and metadata output.
    pub fn to_array(&self) -> [f64; 4] {
        [self.min_lng, self.min_lat, self.max_lng, self.max_lat]
    }
}

/// Errors that can occur during coordinate conversion.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoordError {
    /// Latitude is outside [-90, 90] or not finite
    #[error("invalid latitude: {0}")]
    InvalidLatitude(f64),
    /// Longitude is outside [-180, 180] or not finite
    #[error("invalid longitude: {0}")]
    InvalidLongitude(f64),
    /// Zoom level is outside the supported range
    #[error("invalid zoom level: {0} (must be between {MIN_ZOOM} and {MAX_ZOOM})")]
    InvalidZoom(u8),
    /// Tile index out of range for its zoom level
    #[error("tile index ({x}, {y}) out of range for zoom {zoom}")]
    InvalidTileIndex { zoom: u8, x: u32, y: u32 },
    /// Bounding box array had the wrong number of elements
    #[error("bounding box requires 4 values, got {0}")]
    InvalidBbox(usize),
}
