//! INI serialization logic for converting `ConfigFile` → INI string.
//!
//! Produces the commented INI representation written to `config.ini`.

use std::path::Path;

use super::settings::ConfigFile;

/// Convert a `ConfigFile` to a commented INI string for saving.
pub(super) fn to_config_string(config: &ConfigFile) -> String {
    let window_start = config
        .timeline
        .window_start
        .map(|t| t.to_rfc3339())
        .unwrap_or_default();
    let retain_behind = config
        .prefetch
        .retain_behind
        .map(|n| n.to_string())
        .unwrap_or_default();
    let store_path = config
        .store
        .path
        .as_ref()
        .map(|p| path_to_string(p))
        .unwrap_or_default();

    format!(
        r#"[timeline]
; Instant the animation window opens (RFC 3339, e.g. 2024-06-01T00:00:00Z)
; If empty, playback starts at the earliest trip in the store
window_start = {}
; Chunk duration in seconds; the unit handed to the animation loop (default: 30)
chunk_size_secs = {}
; Batch duration in seconds; the unit fetched from the store (default: 3600)
; Must be a multiple of chunk_size_secs
batch_size_secs = {}
; Seconds a finished trip's trail stays visible (default: 60)
fade_secs = {}

[fetch]
; Attempts per batch fetch before giving up (default: 3)
max_retries = {}
; Delay between attempts in milliseconds (default: 3000)
retry_delay_ms = {}

[prefetch]
; Fraction of a batch after which the next batch is prefetched (default: 0.5)
; 1.0 disables threshold prefetch
threshold = {}
; Chunks resolved before playback starts (default: 3)
initial_chunks = {}
; Loaded batches kept behind the playing batch
; If empty, batches are only cleared explicitly
retain_behind = {}

[unit]
; Seconds to wait for the processing unit to start (default: 10)
ready_timeout_secs = {}
; Request queue capacity of the processing unit (default: 64)
channel_capacity = {}

[store]
; JSON-lines file with one trip per line
path = {}

[logging]
; Directory for log files (default: ~/.tripstream/logs)
directory = {}
; Log file name, truncated at each start (default: tripstream.log)
file = {}
"#,
        window_start,
        config.timeline.chunk_size_secs,
        config.timeline.batch_size_secs,
        config.timeline.fade_secs,
        config.fetch.max_retries,
        config.fetch.retry_delay_ms,
        config.prefetch.threshold,
        config.prefetch.initial_chunks,
        retain_behind,
        config.unit.ready_timeout_secs,
        config.unit.channel_capacity,
        store_path,
        path_to_string(&config.logging.directory),
        config.logging.file,
    )
}

/// Formats a path for the config file, abbreviating the home directory.
fn path_to_string(path: &Path) -> String {
    if let Some(home) = dirs::home_dir() {
        if let Ok(stripped) = path.strip_prefix(&home) {
            return format!("~/{}", stripped.display());
        }
    }
    path.display().to_string()
}
