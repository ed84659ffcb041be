//! Configuration management CLI commands.
//!
//! Provides `config init`, `config show` and `config path`.

use clap::Subcommand;
use std::path::Path;
use tripstream::config::ConfigFile;

use crate::error::CliError;

/// Config subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Write a config file with default values
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the effective configuration
    Show,

    /// Show the configuration file path
    Path,
}

/// Run a config subcommand against the file at `path`.
pub fn run(command: ConfigCommands, path: &Path) -> Result<(), CliError> {
    match command {
        ConfigCommands::Init { force } => run_init(path, force),
        ConfigCommands::Show => run_show(path),
        ConfigCommands::Path => {
            println!("{}", path.display());
            Ok(())
        }
    }
}

fn run_init(path: &Path, force: bool) -> Result<(), CliError> {
    if force {
        ConfigFile::default()
            .save_to(path)
            .map_err(|e| CliError::FileWrite {
                path: path.to_path_buf(),
                error: e.to_string(),
            })?;
        println!("Wrote default configuration to {}", path.display());
        return Ok(());
    }

    if ConfigFile::ensure_exists_at(path)? {
        println!("Wrote default configuration to {}", path.display());
    } else {
        println!(
            "Configuration already exists at {} (use --force to overwrite)",
            path.display()
        );
    }
    Ok(())
}

fn run_show(path: &Path) -> Result<(), CliError> {
    let config = ConfigFile::load_from(path)?;
    let source = if path.exists() { "file" } else { "defaults" };

    println!("Configuration ({}: {})", source, path.display());
    println!("======================");
    println!();
    println!("[timeline]");
    println!(
        "  window_start     = {}",
        config
            .timeline
            .window_start
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "(earliest trip)".to_string())
    );
    println!("  chunk_size_secs  = {}", config.timeline.chunk_size_secs);
    println!("  batch_size_secs  = {}", config.timeline.batch_size_secs);
    println!("  fade_secs        = {}", config.timeline.fade_secs);
    println!();
    println!("[fetch]");
    println!("  max_retries      = {}", config.fetch.max_retries);
    println!("  retry_delay_ms   = {}", config.fetch.retry_delay_ms);
    println!();
    println!("[prefetch]");
    println!("  threshold        = {}", config.prefetch.threshold);
    println!("  initial_chunks   = {}", config.prefetch.initial_chunks);
    println!(
        "  retain_behind    = {}",
        config
            .prefetch
            .retain_behind
            .map(|n| n.to_string())
            .unwrap_or_else(|| "(keep all)".to_string())
    );
    println!();
    println!("[unit]");
    println!("  ready_timeout_secs = {}", config.unit.ready_timeout_secs);
    println!("  channel_capacity   = {}", config.unit.channel_capacity);
    println!();
    println!("[store]");
    println!(
        "  path             = {}",
        config
            .store
            .path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(not set)".to_string())
    );
    println!();
    println!("[logging]");
    println!("  directory        = {}", config.logging.directory.display());
    println!("  file             = {}", config.logging.file);

    Ok(())
}
