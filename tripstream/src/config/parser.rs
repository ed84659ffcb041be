//! INI parsing logic for converting `Ini` → `ConfigFile`.
//!
//! This is the single place where INI key names are mapped to struct fields.

use chrono::{DateTime, Utc};
use ini::Ini;
use std::path::PathBuf;
use std::str::FromStr;

use super::file::ConfigFileError;
use super::settings::ConfigFile;

/// Parse an `Ini` object into a `ConfigFile`.
///
/// Starts from `ConfigFile::default()` and overlays any values found in the INI.
pub(super) fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigFileError> {
    let mut config = ConfigFile::default();

    // [timeline] section
    if let Some(section) = ini.section(Some("timeline")) {
        if let Some(v) = section.get("window_start") {
            let v = v.trim();
            config.timeline.window_start = if v.is_empty() {
                None
            } else {
                Some(
                    DateTime::parse_from_rfc3339(v)
                        .map(|t| t.with_timezone(&Utc))
                        .map_err(|_| {
                            invalid(
                                "timeline",
                                "window_start",
                                v,
                                "expected an RFC 3339 timestamp like 2024-06-01T00:00:00Z",
                            )
                        })?,
                )
            };
        }
        if let Some(v) = section.get("chunk_size_secs") {
            config.timeline.chunk_size_secs =
                parse_positive("timeline", "chunk_size_secs", v, "must be a positive integer (seconds)")?;
        }
        if let Some(v) = section.get("batch_size_secs") {
            config.timeline.batch_size_secs =
                parse_positive("timeline", "batch_size_secs", v, "must be a positive integer (seconds)")?;
        }
        if let Some(v) = section.get("fade_secs") {
            config.timeline.fade_secs =
                parse_number("timeline", "fade_secs", v, "must be a non-negative integer (seconds)")?;
        }
    }
    if config.timeline.batch_size_secs % config.timeline.chunk_size_secs != 0 {
        return Err(invalid(
            "timeline",
            "batch_size_secs",
            &config.timeline.batch_size_secs.to_string(),
            &format!(
                "must be a multiple of chunk_size_secs ({})",
                config.timeline.chunk_size_secs
            ),
        ));
    }

    // [fetch] section
    if let Some(section) = ini.section(Some("fetch")) {
        if let Some(v) = section.get("max_retries") {
            config.fetch.max_retries =
                parse_positive("fetch", "max_retries", v, "must be a positive integer")?;
        }
        if let Some(v) = section.get("retry_delay_ms") {
            config.fetch.retry_delay_ms = parse_number(
                "fetch",
                "retry_delay_ms",
                v,
                "must be a non-negative integer (milliseconds)",
            )?;
        }
    }

    // [prefetch] section
    if let Some(section) = ini.section(Some("prefetch")) {
        if let Some(v) = section.get("threshold") {
            let threshold: f64 =
                parse_number("prefetch", "threshold", v, "must be a number in (0, 1]")?;
            if !(threshold > 0.0 && threshold <= 1.0) {
                return Err(invalid("prefetch", "threshold", v, "must be a number in (0, 1]"));
            }
            config.prefetch.threshold = threshold;
        }
        if let Some(v) = section.get("initial_chunks") {
            config.prefetch.initial_chunks = parse_number(
                "prefetch",
                "initial_chunks",
                v,
                "must be a non-negative integer",
            )?;
        }
        if let Some(v) = section.get("retain_behind") {
            let v = v.trim();
            config.prefetch.retain_behind = if v.is_empty() {
                None
            } else {
                Some(parse_number(
                    "prefetch",
                    "retain_behind",
                    v,
                    "must be a non-negative integer, or empty to keep every batch",
                )?)
            };
        }
    }

    // [unit] section
    if let Some(section) = ini.section(Some("unit")) {
        if let Some(v) = section.get("ready_timeout_secs") {
            config.unit.ready_timeout_secs = parse_positive(
                "unit",
                "ready_timeout_secs",
                v,
                "must be a positive integer (seconds)",
            )?;
        }
        if let Some(v) = section.get("channel_capacity") {
            config.unit.channel_capacity =
                parse_positive("unit", "channel_capacity", v, "must be a positive integer")?;
        }
    }

    // [store] section
    if let Some(section) = ini.section(Some("store")) {
        if let Some(v) = section.get("path") {
            let v = v.trim();
            if !v.is_empty() {
                config.store.path = Some(expand_tilde(v));
            }
        }
    }

    // [logging] section
    if let Some(section) = ini.section(Some("logging")) {
        if let Some(v) = section.get("directory") {
            let v = v.trim();
            if !v.is_empty() {
                config.logging.directory = expand_tilde(v);
            }
        }
        if let Some(v) = section.get("file") {
            let v = v.trim();
            if !v.is_empty() {
                config.logging.file = v.to_string();
            }
        }
    }

    Ok(config)
}

fn invalid(section: &str, key: &str, value: &str, reason: &str) -> ConfigFileError {
    ConfigFileError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_number<T: FromStr>(
    section: &str,
    key: &str,
    value: &str,
    reason: &str,
) -> Result<T, ConfigFileError> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(section, key, value, reason))
}

fn parse_positive<T: FromStr + Default + PartialEq>(
    section: &str,
    key: &str,
    value: &str,
    reason: &str,
) -> Result<T, ConfigFileError> {
    let parsed: T = parse_number(section, key, value, reason)?;
    if parsed == T::default() {
        return Err(invalid(section, key, value, reason));
    }
    Ok(parsed)
}

/// Expands a leading `~/` to the home directory.
pub(super) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}
