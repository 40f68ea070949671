//! Command-line surface: one long-running foreground daemon, configured
//! entirely by flags since there is no persisted state to load.

use std::path::PathBuf;
use std::time::Duration;

use clap::{crate_version, Parser};
use sysboxfs_core::config::LogFormat;
use sysboxfs_core::Config;

/// Output format for the daemon's own log messages, independent of the
/// format any emulated `/proc` file might expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormatArg {
    Text,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Text => LogFormat::Text,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

#[derive(Parser, Debug)]
#[clap(name = "sysboxfs", version = crate_version!(), author = env!("CARGO_PKG_AUTHORS"))]
pub struct Opts {
    /// Where to mount the emulated `/proc`/`/sys` view.
    #[clap(long, default_value = "/var/lib/sysboxfs")]
    pub mount_point: PathBuf,

    /// Path to the container lifecycle RPC socket.
    #[clap(long, default_value = "/run/sysboxfs/rpc.sock")]
    pub rpc_socket: PathBuf,

    /// Path to write logs to; stderr when unset.
    #[clap(long)]
    pub log_file: Option<PathBuf>,

    /// `RUST_LOG`-style filter directive, e.g. `info` or `sysboxfs=debug`.
    #[clap(long, default_value = "info")]
    pub log_level: String,

    #[clap(long, value_enum, default_value = "text")]
    pub log_format: LogFormatArg,

    /// Also emit logs to the systemd journal, in addition to the
    /// file/stderr target above.
    #[clap(long)]
    pub journald: bool,

    /// How long a cached inode assignment stays valid, in minutes.
    #[clap(long, default_value = "1")]
    pub dentry_cache_ttl_minutes: u64,

    /// Deadline for one nsenter round-trip, in seconds.
    #[clap(long, default_value = "30")]
    pub nsenter_timeout_secs: u64,

    /// Downgrades handler I/O errors to warnings plus empty reads/no-op
    /// writes instead of propagating them. Test-only, never for production
    /// use.
    #[clap(long, hide = true)]
    pub ignore_handler_errors: bool,
}

impl Opts {
    pub fn to_config(&self) -> Config {
        Config {
            mount_point: self.mount_point.clone(),
            log_file: self.log_file.clone(),
            log_level: parse_level(&self.log_level),
            log_format: self.log_format.into(),
            dentry_cache_ttl: Duration::from_secs(self.dentry_cache_ttl_minutes * 60),
            nsenter_timeout: Duration::from_secs(self.nsenter_timeout_secs),
            ignore_handler_errors: self.ignore_handler_errors,
        }
    }
}

fn parse_level(s: &str) -> tracing::Level {
    s.parse().unwrap_or(tracing::Level::INFO)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse_to_info_text_format() {
        let opts = Opts::parse_from(["sysboxfs"]);
        assert_eq!(opts.mount_point, PathBuf::from("/var/lib/sysboxfs"));
        assert_eq!(opts.log_format, LogFormatArg::Text);
        let config = opts.to_config();
        assert_eq!(config.log_level, tracing::Level::INFO);
        assert!(!config.ignore_handler_errors);
    }

    #[test]
    fn unparseable_log_level_falls_back_to_info() {
        assert_eq!(parse_level("not-a-level"), tracing::Level::INFO);
        assert_eq!(parse_level("debug"), tracing::Level::DEBUG);
    }

    #[test]
    fn dentry_cache_ttl_minutes_converts_to_seconds() {
        let opts = Opts::parse_from(["sysboxfs", "--dentry-cache-ttl-minutes", "5"]);
        assert_eq!(opts.to_config().dentry_cache_ttl, Duration::from_secs(300));
    }
}
