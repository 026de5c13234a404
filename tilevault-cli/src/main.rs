//! Tilevault CLI - bulk map-tile downloader
//!
//! Downloads raster and vector tiles for a configured region or a
//! custom bounding box from online tile servers and local MBTiles
//! archives, with cross-source fallback.
//!
//! # Examples
//!
//! ```bash
//! # Download a configured region from two online servers
//! tilevault --region istanbul --servers "CartoDB_Light,OpenMapTiles_Vector"
//!
//! # Custom bbox (lng/lat order) from a local archive only
//! tilevault --bbox 28.5 40.8 29.5 41.2 --min-zoom 10 --max-zoom 12 \
//!     --sources "Local_OSM_Turkey"
//!
//! # Inspect the configuration
//! tilevault --list-regions
//! tilevault --list-sources
//! ```
//!
//! Exit codes: `0` success, `1` configuration error, `2` no tile could
//! be delivered, `3` cancelled.

mod error;

use clap::Parser;
use error::CliError;
use std::path::PathBuf;
use tilevault::config::{ConfigFile, SourceKind};
use tilevault::coord::Bbox;
use tilevault::logging;
use tilevault::orchestrator::{self, RunOptions, RunReport};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "tilevault")]
#[command(version = tilevault::VERSION)]
#[command(about = "Bulk map-tile acquisition into a content-addressed tile tree", long_about = None)]
struct Cli {
    /// Region name to download; must exist in the config file
    #[arg(long, conflicts_with = "bbox")]
    region: Option<String>,

    /// Custom bounding box (lng/lat order)
    #[arg(
        long,
        num_args = 4,
        value_names = ["MIN_LNG", "MIN_LAT", "MAX_LNG", "MAX_LAT"],
        allow_negative_numbers = true
    )]
    bbox: Option<Vec<f64>>,

    /// Minimum zoom level (default: from region, or 10)
    #[arg(long)]
    min_zoom: Option<u8>,

    /// Maximum zoom level (default: from region, or 12)
    #[arg(long)]
    max_zoom: Option<u8>,

    /// Comma-separated online server names (config kind=http)
    #[arg(long, value_delimiter = ',')]
    servers: Option<Vec<String>>,

    /// Comma-separated local archive names (config kind=local)
    #[arg(long, value_delimiter = ',')]
    sources: Option<Vec<String>>,

    /// Configuration file path
    #[arg(long, default_value = tilevault::config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// List configured regions and exit
    #[arg(long)]
    list_regions: bool,

    /// List configured sources with bounds and zoom ranges, then exit
    #[arg(long)]
    list_sources: bool,

    /// Also dump every failed tile to stderr
    #[arg(long, short)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => {}
        Err(e) => e.exit(),
    }
}

#[tokio::main]
async fn run(cli: Cli) -> Result<(), CliError> {
    let _logging_guard = logging::init_logging(logging::default_log_dir(), logging::default_log_file())
        .map_err(|e| CliError::LoggingInit(e.to_string()))?;

    let config = ConfigFile::load(&cli.config)?;

    if cli.list_regions {
        list_regions(&config);
        return Ok(());
    }
    if cli.list_sources {
        list_sources(&config);
        return Ok(());
    }

    if cli.region.is_none() && cli.bbox.is_none() {
        // Mirror the help the flags would give, then bail as a usage error.
        eprintln!("Provide --region or --bbox (see --list-regions for configured regions).");
        return Err(CliError::Run(orchestrator::OrchestratorError::Selection(
            "either --region or --bbox is required".to_string(),
        )));
    }

    let bbox = cli
        .bbox
        .as_deref()
        .map(Bbox::from_slice)
        .transpose()
        .map_err(|e| {
            CliError::Run(orchestrator::OrchestratorError::Selection(format!(
                "invalid --bbox: {e}"
            )))
        })?;

    let options = RunOptions {
        region: cli.region,
        bbox,
        min_zoom: cli.min_zoom,
        max_zoom: cli.max_zoom,
        servers: cli.servers,
        sources: cli.sources,
    };

    // First Ctrl-C cancels cooperatively; stored tiles stay on disk and
    // a rerun resumes from them.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!();
                eprintln!("Cancelling; in-flight fetches stop at their next I/O boundary...");
                cancel.cancel();
            }
        });
    }

    let report = orchestrator::run(&config, options, &cancel).await?;
    print_report(&report, cli.verbose);

    if report.summary.cancelled {
        return Err(CliError::Cancelled);
    }
    if report.summary.all_failed() {
        return Err(CliError::AllTilesFailed {
            region: report.region,
        });
    }
    Ok(())
}

fn list_regions(config: &ConfigFile) {
    println!("Available regions:");
    for (name, region) in &config.regions {
        let description = if region.description.is_empty() {
            "No description"
        } else {
            &region.description
        };
        println!(
            "  {name}: {description} (bbox {:?}, zoom {}-{})",
            region.bbox, region.min_zoom, region.max_zoom
        );
    }
}

fn list_sources(config: &ConfigFile) {
    println!("Available sources:");
    for source in &config.sources {
        match source.kind {
            SourceKind::Http => {
                println!("  {} ({}, http)", source.name, source.tile_kind);
                if let Some(url) = &source.url {
                    println!("      URL: {url}");
                }
            }
            SourceKind::Local => {
                let available = source
                    .path
                    .as_deref()
                    .is_some_and(|p| p.is_file());
                let status = if available { "OK" } else { "X " };
                println!("  {status} {} ({}, local)", source.name, source.tile_kind);
                if let Some(path) = &source.path {
                    println!("      Path: {}", path.display());
                }
                if let Some(bounds) = &source.bounds {
                    println!("      Bounds: {bounds:?} (lng_min, lat_min, lng_max, lat_max)");
                }
            }
        }
        if let (Some(min), Some(max)) = (source.min_zoom, source.max_zoom) {
            println!("      Zoom: {min}-{max}");
        }
        if !source.description.is_empty() {
            println!("      Description: {}", source.description);
        }
    }
}

/// Prints the per-source summary table and totals to stderr.
fn print_report(report: &RunReport, verbose: bool) {
    let summary = &report.summary;
    let totals = &summary.totals;

    eprintln!();
    eprintln!(
        "Region {} (zoom {}-{}): {} tiles: {} stored, {} already present, {} failed, {} uncoverable",
        report.region,
        report.min_zoom,
        report.max_zoom,
        totals.total,
        totals.stored,
        totals.already_present,
        totals.failed,
        totals.uncoverable,
    );

    if !summary.per_source.is_empty() {
        eprintln!();
        eprintln!(
            "{:<24} {:>8} {:>8} {:>10} {:>8} {:>8} {:>9}",
            "Source", "Stored", "Failed", "Transient", "Invalid", "Empty", "NotFound"
        );
        for (name, s) in &summary.per_source {
            eprintln!(
                "{:<24} {:>8} {:>8} {:>10} {:>8} {:>8} {:>9}",
                name, s.stored, s.failed, s.transient_errors, s.invalid, s.empty, s.not_found
            );
        }
    }

    if verbose && !summary.failed_tiles.is_empty() {
        eprintln!();
        eprintln!("Failed tiles:");
        for coord in &summary.failed_tiles {
            eprintln!("  {coord}");
        }
    }

    if let Some(path) = &report.metadata_path {
        eprintln!();
        eprintln!("Metadata written: {}", path.display());
    }
}
