//! Tile geometry module
//!
//! Conversions between geographic coordinates (latitude/longitude) and
//! Web Mercator XYZ tile coordinates, and enumeration of the tiles
//! covering a bounding box over a zoom range.

mod types;

pub use types::{Bbox, CoordError, TileCoord, MAX_LAT, MAX_LNG, MAX_ZOOM, MIN_LAT, MIN_LNG, MIN_ZOOM};

use std::f64::consts::PI;

/// Projects a point to tile indices at the given zoom.
///
/// Latitude is clamped to the Web Mercator range and the resulting
/// indices are clamped into `[0, 2^zoom - 1]`, so the function is total
/// over finite inputs. Use [`lat_lng_to_tile`] when out-of-range input
/// should be an error instead.
#[inline]
pub fn project(lat: f64, lng: f64, zoom: u8) -> (u32, u32) {
    let lat = lat.clamp(MIN_LAT, MAX_LAT);
    let n = 2.0_f64.powi(zoom as i32);
    let max_index = (1u32 << zoom) - 1;

    let x = ((lng + 180.0) / 360.0 * n) as u32;

    let lat_rad = lat * PI / 180.0;
    let y = ((1.0 - lat_rad.tan().asinh() / PI) / 2.0 * n) as u32;

    (x.min(max_index), y.min(max_index))
}

/// Converts geographic coordinates to a tile coordinate.
///
/// # Errors
///
/// Returns an error when the latitude, longitude, or zoom is outside
/// the supported range.
#[inline]
pub fn lat_lng_to_tile(lat: f64, lng: f64, zoom: u8) -> Result<TileCoord, CoordError> {
    if !(MIN_LAT..=MAX_LAT).contains(&lat) {
        return Err(CoordError::InvalidLatitude(lat));
    }
    if !(MIN_LNG..=MAX_LNG).contains(&lng) {
        return Err(CoordError::InvalidLongitude(lng));
    }
    if zoom > MAX_ZOOM {
        return Err(CoordError::InvalidZoom(zoom));
    }

    let (x, y) = project(lat, lng, zoom);
    Ok(TileCoord { zoom, x, y })
}

/// Converts a tile coordinate back to geographic coordinates.
///
/// Returns the latitude/longitude of the tile's northwest corner.
#[inline]
pub fn tile_to_lat_lng(tile: &TileCoord) -> (f64, f64) {
    let n = 2.0_f64.powi(tile.zoom as i32);

    let lng = tile.x as f64 / n * 360.0 - 180.0;

    let y = tile.y as f64 / n;
    let lat_rad = (PI * (1.0 - 2.0 * y)).sinh().atan();
    let lat = lat_rad * 180.0 / PI;

    (lat, lng)
}

/// Returns the geographic bounds of a tile's square.
pub fn tile_bounds(tile: &TileCoord) -> Bbox {
    let (max_lat, min_lng) = tile_to_lat_lng(tile);
    let south_east = TileCoord {
        zoom: tile.zoom,
        x: tile.x + 1,
        y: tile.y + 1,
    };
    let (min_lat, max_lng) = tile_to_lat_lng(&south_east);
    Bbox {
        min_lng,
        min_lat,
        max_lng,
        max_lat,
    }
}

/// An inclusive rectangle of tile indices at one zoom level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRange {
    pub zoom: u8,
    pub x0: u32,
    pub x1: u32,
    pub y0: u32,
    pub y1: u32,
}

impl TileRange {
    /// Number of tiles in the rectangle.
    pub fn count(&self) -> u64 {
        (self.x1 - self.x0 + 1) as u64 * (self.y1 - self.y0 + 1) as u64
    }

    /// Iterates the rectangle in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = TileCoord> + '_ {
        let zoom = self.zoom;
        (self.y0..=self.y1)
            .flat_map(move |y| (self.x0..=self.x1).map(move |x| TileCoord { zoom, x, y }))
    }
}

/// Computes the tile rectangle covering a non-crossing bbox at one zoom.
///
/// The northwest corner of the rectangle comes from `(max_lat, min_lng)`
/// and the southeast corner from `(min_lat, max_lng)`; a degenerate bbox
/// (zero width or height) still yields at least one tile.
pub fn tile_range(bbox: &Bbox, zoom: u8) -> TileRange {
    let (x0, y1) = project(bbox.min_lat, bbox.min_lng, zoom);
    let (x1, y0) = project(bbox.max_lat, bbox.max_lng, zoom);
    TileRange {
        zoom,
        x0: x0.min(x1),
        x1: x0.max(x1),
        y0: y0.min(y1),
        y1: y0.max(y1),
    }
}

/// Returns the tile rectangles covering a bbox at one zoom level.
///
/// An antimeridian-crossing bbox produces two rectangles, one per side.
pub fn tile_ranges(bbox: &Bbox, zoom: u8) -> Vec<TileRange> {
    let (west, east) = bbox.split_antimeridian();
    let mut ranges = vec![tile_range(&west, zoom)];
    if let Some(east) = east {
        ranges.push(tile_range(&east, zoom));
    }
    ranges
}

/// Enumerates every tile covering `bbox` for each zoom in the range.
pub fn coverage(bbox: &Bbox, min_zoom: u8, max_zoom: u8) -> impl Iterator<Item = TileCoord> + '_ {
    (min_zoom..=max_zoom).flat_map(move |zoom| {
        tile_ranges(bbox, zoom)
            .into_iter()
            .flat_map(|range| range.iter().collect::<Vec<_>>())
    })
}

/// Total number of tiles covering `bbox` over the zoom range.
pub fn coverage_count(bbox: &Bbox, min_zoom: u8, max_zoom: u8) -> u64 {
    (min_zoom..=max_zoom)
        .map(|zoom| tile_ranges(bbox, zoom).iter().map(TileRange::count).sum::<u64>())
        .sum()
}
