//! User configuration.
//!
//! The INI file at `~/.tripstream/config.ini` is read into a [`ConfigFile`]
//! and converted into a [`CacheConfig`](crate::cache::CacheConfig) with
//! [`ConfigFile::to_cache_config`].
//!
//! # Example
//!
//! ```
//! use chrono::{TimeZone, Utc};
//! use tripstream::config::ConfigFile;
//!
//! let config = ConfigFile::default();
//! let start = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
//! let cache_config = config.to_cache_config(Some(start))?;
//!
//! assert_eq!(cache_config.timeline.chunks_per_batch(), 120);
//! # Ok::<(), tripstream::config::ConfigFileError>(())
//! ```

mod defaults;
mod file;
mod parser;
mod settings;
mod writer;

pub use defaults::*;
pub use file::{config_directory, config_file_path, ConfigFileError};
pub use settings::{
    ConfigFile, FetchSettings, LoggingSettings, PrefetchSettings, StoreSettings,
    TimelineSettings, UnitSettings,
};
