//! CLI error handling with user-friendly messages and exit codes.
//!
//! Exit codes are part of the CLI contract:
//! `0` success, `1` configuration error, `2` no tile could be
//! delivered, `3` cancelled.

use std::fmt;
use std::process;
use tilevault::config::ConfigError;
use tilevault::orchestrator::OrchestratorError;

/// CLI-specific errors with their exit codes.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(String),
    /// Configuration could not be loaded or is invalid
    Config(ConfigError),
    /// Run setup failed (selection, source construction, metadata)
    Run(OrchestratorError),
    /// Every tile in the region failed or was uncoverable
    AllTilesFailed { region: String },
    /// The run was cancelled before completion
    Cancelled,
}

impl CliError {
    /// The process exit code this error maps to.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::LoggingInit(_) | CliError::Config(_) | CliError::Run(_) => 1,
            CliError::AllTilesFailed { .. } => 2,
            CliError::Cancelled => 3,
        }
    }

    /// Exit the process with an appropriate message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        if let CliError::AllTilesFailed { .. } = self {
            eprintln!();
            eprintln!("Check that:");
            eprintln!("  1. The bbox intersects the selected sources (see --list-sources)");
            eprintln!("  2. The zoom range is within the sources' declared ranges");
            eprintln!("  3. The tile servers are reachable from this machine");
        }

        process::exit(self.exit_code())
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(msg) => write!(f, "failed to initialize logging: {}", msg),
            CliError::Config(e) => write!(f, "configuration error: {}", e),
            CliError::Run(e) => write!(f, "{}", e),
            CliError::AllTilesFailed { region } => {
                write!(f, "no tile could be delivered for region '{}'", region)
            }
            CliError::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Config(e) => Some(e),
            CliError::Run(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::Config(e)
    }
}

impl From<OrchestratorError> for CliError {
    fn from(e: OrchestratorError) -> Self {
        CliError::Run(e)
    }
}
