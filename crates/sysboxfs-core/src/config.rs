//! Daemon-wide configuration, constructed once at startup and handed to
//! every component by value or reference. There is no global config
//! singleton; see the "explicit dependencies over ambient globals" note.

use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Where the upper-filesystem is mounted.
    pub mount_point: PathBuf,
    /// `None` logs to stderr.
    pub log_file: Option<PathBuf>,
    pub log_level: tracing::Level,
    pub log_format: LogFormat,
    pub dentry_cache_ttl: Duration,
    pub nsenter_timeout: Duration,
    /// Downgrades a handler's internal I/O error to a warning plus a
    /// zero-length read or no-op write. Test-only; must never be the
    /// default in a real deployment.
    pub ignore_handler_errors: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mount_point: PathBuf::from("/var/lib/sysboxfs"),
            log_file: None,
            log_level: tracing::Level::INFO,
            log_format: LogFormat::Text,
            dentry_cache_ttl: Duration::from_secs(60),
            nsenter_timeout: Duration::from_secs(30),
            ignore_handler_errors: false,
        }
    }
}

impl Config {
    /// A config tuned for tests: a short nsenter timeout and errors
    /// downgraded to warnings so a missing fixture file doesn't panic a
    /// handler test.
    #[cfg(test)]
    pub fn for_test() -> Self {
        Self {
            nsenter_timeout: Duration::from_secs(2),
            ignore_handler_errors: true,
            ..Self::default()
        }
    }
}
