//! Tilevault - bulk map-tile acquisition engine
//!
//! Given a geographic bounding box and a zoom range, tilevault
//! materializes every XYZ tile covering that region into a
//! content-addressed filesystem tree, drawing tiles from an ordered
//! list of sources (remote HTTP tile servers and local MBTiles
//! archives) with bounded per-source concurrency, retry/backoff, and
//! cross-source fallback. After acquisition it derives a per-region
//! metadata document from the resulting tree.
//!
//! # High-Level API
//!
//! The [`orchestrator`] module binds a loaded [`config::ConfigFile`]
//! and a selection into one run:
//!
//! ```ignore
//! use tilevault::{config::ConfigFile, orchestrator};
//! use tokio_util::sync::CancellationToken;
//!
//! let config = ConfigFile::load("config.json".as_ref())?;
//! let options = orchestrator::RunOptions {
//!     region: Some("istanbul".to_string()),
//!     ..Default::default()
//! };
//! let report = orchestrator::run(&config, options, &CancellationToken::new()).await?;
//! ```

pub mod config;
pub mod coord;
pub mod logging;
pub mod metadata;
pub mod orchestrator;
pub mod pipeline;
pub mod retry;
pub mod source;
pub mod store;
pub mod validate;

/// Version of the tilevault library and CLI.
///
/// Synchronized across all workspace members; injected at compile time
/// from `Cargo.toml`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
