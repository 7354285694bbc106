//! Worker-wide tunables.
//!
//! There is no on-disk configuration file for the worker process itself --
//! the only on-disk configuration in this system is the per-model
//! `MANIFEST.json` (see [`crate::loader`]), which is a distinct concept tied
//! to a loaded service, not to the worker as a whole. Process-wide knobs are
//! read from environment variables with hardcoded defaults, the same way the
//! reference crate treats its own logging level (`RUST_LOG`) as an
//! environment-supplied override with a code-level default.

use std::env;

/// Consecutive send failures the worker tolerates before exiting with
/// `SEND_FAILS_EXCEEDS_LIMITS`.
const DEFAULT_SEND_FAILURE_THRESHOLD: u32 = 10;
/// Listen backlog passed to `listen(2)`.
const DEFAULT_BACKLOG: i32 = 1;
/// Largest frame this worker will assemble off the wire before giving up and
/// reporting `INVALID_MESSAGE`. Guards against a misbehaving or malicious
/// dispatcher streaming an unbounded length-prefixed field.
const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Diagnostic log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable, for interactive use.
    Text,
    /// One JSON object per line, for ingestion by a log pipeline.
    Json,
}

/// Process-wide tunables for the worker loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerConfig {
    /// See [`DEFAULT_SEND_FAILURE_THRESHOLD`].
    pub send_failure_threshold: u32,
    /// See [`DEFAULT_BACKLOG`].
    pub backlog: i32,
    /// See [`DEFAULT_MAX_FRAME_SIZE`].
    pub max_frame_size: usize,
    /// Diagnostic log format.
    pub log_format: LogFormat,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            send_failure_threshold: DEFAULT_SEND_FAILURE_THRESHOLD,
            backlog: DEFAULT_BACKLOG,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            log_format: LogFormat::Text,
        }
    }
}

impl WorkerConfig {
    /// Build a config from environment variables, falling back to the
    /// hardcoded defaults for anything unset or unparsable.
    ///
    /// * `MODEL_WORKER_SEND_FAILURE_THRESHOLD`
    /// * `MODEL_WORKER_BACKLOG`
    /// * `MODEL_WORKER_MAX_FRAME_SIZE`
    /// * `MODEL_WORKER_LOG_FORMAT` (`text` | `json`)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            send_failure_threshold: env_parsed(
                "MODEL_WORKER_SEND_FAILURE_THRESHOLD",
                defaults.send_failure_threshold,
            ),
            backlog: env_parsed("MODEL_WORKER_BACKLOG", defaults.backlog),
            max_frame_size: env_parsed("MODEL_WORKER_MAX_FRAME_SIZE", defaults.max_frame_size),
            log_format: match env::var("MODEL_WORKER_LOG_FORMAT") {
                Ok(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
                _ => defaults.log_format,
            },
        }
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_suggested_values() {
        let cfg = WorkerConfig::default();
        assert_eq!(cfg.send_failure_threshold, 10);
        assert_eq!(cfg.backlog, 1);
        assert_eq!(cfg.log_format, LogFormat::Text);
    }

    #[test]
    fn env_parsed_falls_back_on_missing_key() {
        let v: u32 = env_parsed("MODEL_WORKER_DEFINITELY_UNSET_KEY", 42);
        assert_eq!(v, 42);
    }

    #[test]
    fn env_parsed_falls_back_on_unparsable_value() {
        env::set_var("MODEL_WORKER_TEST_UNPARSABLE", "not-a-number");
        let v: u32 = env_parsed("MODEL_WORKER_TEST_UNPARSABLE", 7);
        assert_eq!(v, 7);
        env::remove_var("MODEL_WORKER_TEST_UNPARSABLE");
    }
}
