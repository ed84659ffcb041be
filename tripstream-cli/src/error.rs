//! CLI error handling with user-friendly messages.
//!
//! Centralizes error handling for the CLI, providing consistent formatting
//! and appropriate exit codes.

use std::fmt;
use std::path::PathBuf;
use std::process;
use tripstream::cache::CacheError;
use tripstream::config::ConfigFileError;
use tripstream::store::StoreError;

/// CLI-specific errors with user-friendly messages.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(String),
    /// Configuration error
    Config(String),
    /// No trip file given on the command line or in the config
    MissingStore,
    /// Failed to open the trip file
    Store(StoreError),
    /// The cache failed to start or to serve a chunk
    Cache(CacheError),
    /// Failed to write the config file
    FileWrite { path: PathBuf, error: String },
}

impl CliError {
    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        match self {
            CliError::MissingStore => {
                eprintln!();
                eprintln!("Pass a trip file with --store, or set it in the config:");
                eprintln!("  [store]");
                eprintln!("  path = ~/data/trips.jsonl");
            }
            CliError::Cache(CacheError::Fetch { .. }) => {
                eprintln!();
                eprintln!("The store kept failing. Check that the trip file is readable");
                eprintln!("and raise [fetch] max_retries if failures are transient.");
            }
            CliError::Cache(CacheError::UnitNotReady(_)) => {
                eprintln!();
                eprintln!("The processing unit did not start in time.");
                eprintln!("Raise [unit] ready_timeout_secs on a heavily loaded machine.");
            }
            _ => {}
        }

        process::exit(1)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(msg) => write!(f, "Failed to initialize logging: {}", msg),
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::MissingStore => write!(f, "No trip file configured"),
            CliError::Store(e) => write!(f, "Failed to open trip store: {}", e),
            CliError::Cache(e) => write!(f, "Trip cache error: {}", e),
            CliError::FileWrite { path, error } => {
                write!(f, "Failed to write file '{}': {}", path.display(), error)
            }
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Store(e) => Some(e),
            CliError::Cache(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigFileError> for CliError {
    fn from(e: ConfigFileError) -> Self {
        CliError::Config(e.to_string())
    }
}

impl From<StoreError> for CliError {
    fn from(e: StoreError) -> Self {
        CliError::Store(e)
    }
}

impl From<CacheError> for CliError {
    fn from(e: CacheError) -> Self {
        CliError::Cache(e)
    }
}
