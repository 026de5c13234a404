//! Tile payload validation
//!
//! Classifies fetched payloads as valid, empty, or invalid before they
//! are allowed onto disk. Raster tiles are checked by magic bytes;
//! vector tiles are structurally parsed as Mapbox Vector Tiles, with
//! gzip-wrapped payloads transparently decompressed first. The
//! classification is pure and deterministic.

use crate::source::TileKind;
use flate2::read::GzDecoder;
use std::io::Read;

/// Minimum plausible raster payload size in bytes.
const MIN_RASTER_LEN: usize = 16;
/// Minimum plausible vector payload size in bytes.
const MIN_VECTOR_LEN: usize = 8;
/// Gzip stream magic.
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Outcome of validating a tile payload.
///
/// `Valid` carries the bytes that should be stored, which differ from
/// the input when a gzip wrapper was removed.
#[derive(Debug, Clone, PartialEq)]
pub enum Validation {
    Valid(Vec<u8>),
    Empty,
    Invalid(String),
}

/// Pure tile payload classifier.
///
/// The set of known "blank tile" payloads (e.g. a provider's transparent
/// 1x1 PNG) is supplied by configuration as raw byte strings; an
/// all-zero body is always treated as empty.
#[derive(Debug, Clone, Default)]
pub struct Validator {
    empty_fingerprints: Vec<Vec<u8>>,
}

impl Validator {
    /// Creates a validator with the given empty-tile fingerprints.
    pub fn new(empty_fingerprints: Vec<Vec<u8>>) -> Self {
        Self { empty_fingerprints }
    }

    /// Classifies a payload of the given tile kind.
    pub fn validate(&self, kind: TileKind, data: &[u8]) -> Validation {
        match kind {
            TileKind::Raster => self.validate_raster(data),
            TileKind::Vector => self.validate_vector(data),
        }
    }

    fn validate_raster(&self, data: &[u8]) -> Validation {
        if data.is_empty() || data.iter().all(|&b| b == 0) {
            return Validation::Empty;
        }
        if self.empty_fingerprints.iter().any(|f| f.as_slice() == data) {
            return Validation::Empty;
        }
        if data.len() < MIN_RASTER_LEN {
            return Validation::Invalid(format!("raster payload too small: {} bytes", data.len()));
        }
        if raster_format(data).is_none() {
            return Validation::Invalid("unrecognized image format".to_string());
        }
        Validation::Valid(data.to_vec())
    }

    fn validate_vector(&self, data: &[u8]) -> Validation {
        if data.is_empty() {
            return Validation::Empty;
        }

        // Unwrap a gzip transfer/storage wrapper; the stored tile is
        // always the decompressed protobuf.
        let payload = if data.starts_with(&GZIP_MAGIC) {
            let mut decoder = GzDecoder::new(data);
            let mut decompressed = Vec::new();
            match decoder.read_to_end(&mut decompressed) {
                Ok(_) => decompressed,
                Err(e) => return Validation::Invalid(format!("gzip decompression failed: {e}")),
            }
        } else {
            data.to_vec()
        };

        if payload.is_empty() {
            return Validation::Empty;
        }
        if payload.len() < MIN_VECTOR_LEN {
            return Validation::Invalid(format!("vector payload too small: {} bytes", payload.len()));
        }

        let reader = match mvt_reader::Reader::new(payload.clone()) {
            Ok(reader) => reader,
            Err(e) => return Validation::Invalid(format!("not a vector tile: {e:?}")),
        };
        match reader.get_layer_names() {
            Ok(names) if names.is_empty() => Validation::Empty,
            Ok(_) => Validation::Valid(payload),
            Err(e) => Validation::Invalid(format!("vector tile has no readable layers: {e:?}")),
        }
    }
}

/// Recognized raster container formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RasterFormat {
    Png,
    Jpeg,
    Webp,
    Gif,
}

/// Identifies a raster payload by its magic bytes.
pub fn raster_format(data: &[u8]) -> Option<RasterFormat> {
    if data.starts_with(&[0x89, 0x50, 0x4E, 0x47]) {
        Some(RasterFormat::Png)
    } else if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some(RasterFormat::Jpeg)
    } else if data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WEBP" {
        Some(RasterFormat::Webp)
    } else if data.starts_with(b"GIF8") {
        Some(RasterFormat::Gif)
    } else {
        None
    }
}

/// Decodes a hex string into bytes, for fingerprint configuration.
pub fn decode_hex(s: &str) -> Option<Vec<u8>> {
    let s = s.trim();
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}
