//! Play command: streams chunks from a trip file through the cache.
//!
//! Acts as a stand-in for the animation loop. Chunks are requested in order,
//! one per tick, and their trip counts printed. Ctrl+C stops playback early.

use clap::Args;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tripstream::cache::{BatchCache, TracingErrorSink};
use tripstream::config::ConfigFile;
use tripstream::logging::init_logging;
use tripstream::store::MemoryTripStore;

use crate::error::CliError;

/// Arguments for `play`.
#[derive(Debug, Args)]
pub struct PlayArgs {
    /// JSON-lines trip file (overrides [store] path)
    #[arg(long)]
    pub store: Option<PathBuf>,

    /// Number of chunks to play (default: one batch)
    #[arg(long)]
    pub chunks: Option<u64>,

    /// Playback speed as a multiple of real time
    #[arg(long, default_value = "60")]
    pub speed: f64,
}

/// Run the play command.
pub async fn run(args: PlayArgs, config_path: &Path) -> Result<(), CliError> {
    if !(args.speed.is_finite() && args.speed > 0.0) {
        return Err(CliError::Config(format!(
            "--speed must be a positive number, got {}",
            args.speed
        )));
    }

    let config = ConfigFile::load_from(config_path)?;
    let _logging_guard = init_logging(&config.logging.directory, &config.logging.file)
        .map_err(|e| CliError::LoggingInit(e.to_string()))?;

    let store_path = args
        .store
        .or_else(|| config.store.path.clone())
        .ok_or(CliError::MissingStore)?;
    let store = MemoryTripStore::from_json_lines(&store_path)?;
    info!(path = %store_path.display(), trips = store.len(), "Trip store loaded");

    let cache_config = config.to_cache_config(store.earliest_start())?;
    let timeline = cache_config.timeline;
    let initial_chunks = cache_config.initial_chunks;
    let total_chunks = args.chunks.unwrap_or(timeline.chunks_per_batch());

    println!("Trip file:   {} ({} trips)", store_path.display(), store.len());
    println!("Window:      opens {}", timeline.window_start().to_rfc3339());
    println!(
        "Layout:      {:?} chunks, {} per batch",
        timeline.chunk_size(),
        timeline.chunks_per_batch()
    );
    println!();

    let (cache, first_trips) =
        BatchCache::start(cache_config, Arc::new(store), Arc::new(TracingErrorSink)).await?;
    println!(
        "Preloaded {} trips in the first {} chunks",
        first_trips.len(),
        initial_chunks
    );

    let result = play(&cache, initial_chunks, total_chunks, args.speed).await;

    if let Ok(stats) = cache.stats().await {
        println!();
        println!("Cache statistics");
        println!("================");
        println!("{}", stats);
    }
    cache.terminate().await;

    result
}

async fn play(
    cache: &BatchCache,
    first_chunk: u64,
    total_chunks: u64,
    speed: f64,
) -> Result<(), CliError> {
    let timeline = *cache.timeline();
    let period = timeline
        .chunk_size()
        .div_f64(speed)
        .max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval(period);

    for chunk in first_chunk..total_chunks {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!();
                println!("Interrupted at chunk {}", chunk);
                return Ok(());
            }
            _ = ticker.tick() => {}
        }

        let trips = cache.request_chunk(chunk).await?;
        let starts = timeline
            .chunk_range(chunk)
            .map(|range| range.start.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        println!(
            "chunk {:>6}  batch {:>4}  {}  {:>6} trips",
            chunk,
            timeline.batch_of(chunk),
            starts,
            trips.len()
        );
    }

    Ok(())
}
