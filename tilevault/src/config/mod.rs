//! Run configuration
//!
//! The configuration file is JSON (see `config.example.json` at the
//! repository root): named regions, an ordered source list, and the
//! download knobs. The loaded [`ConfigFile`] is immutable for the run
//! and shared read-only across all components.

mod file;

pub use file::{
    ConfigError, ConfigFile, RegionSpec, SourceKind, SourceSpec, DEFAULT_CONFIG_PATH,
    DEFAULT_MAX_ZOOM, DEFAULT_MIN_ZOOM, DEFAULT_OUTPUT_DIR, DEFAULT_RETRY_ATTEMPTS,
    DEFAULT_TIMEOUT_SECS, DEFAULT_WORKERS_PER_SOURCE,
};
