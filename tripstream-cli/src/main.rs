//! Tripstream CLI - Command-line interface
//!
//! Plays a historical trip file through the windowed trip cache and manages
//! the user configuration.

mod commands;
mod error;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tripstream::config::config_file_path;

use commands::config::ConfigCommands;
use commands::play::PlayArgs;
use error::CliError;

#[derive(Parser)]
#[command(name = "tripstream")]
#[command(version = tripstream::VERSION)]
#[command(about = "Stream historical trips through a windowed cache", long_about = None)]
struct Cli {
    /// Config file (default: ~/.tripstream/config.ini)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Play chunks from a JSON-lines trip file
    Play(PlayArgs),

    /// Manage the configuration file
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(config_file_path);

    let result = match cli.command {
        Commands::Play(args) => commands::play::run(args, &config_path).await,
        Commands::Config(command) => commands::config::run(command, &config_path),
    };

    if let Err(e) = result {
        e.exit();
    }
}
