//! Structured logging setup: a text or JSON formatter over a file-or-stderr
//! target, with an optional journald layer layered on top, selected by
//! [`sysboxfs_core::Config`] rather than hardcoded.

use std::fs::OpenOptions;
use std::sync::Mutex;

use anyhow::{Context, Result};
use sysboxfs_core::config::LogFormat;
use sysboxfs_core::Config;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Initializes the global tracing subscriber from `config`. `journald`
/// augments the file-or-stderr sink with a journald layer rather than
/// replacing it, since a file target is still useful when running under
/// systemd's `StandardError=journal` default. Safe to call once per
/// process; a second call is a logic error in the caller, not something
/// this function guards against, since the daemon has exactly one
/// entrypoint.
pub fn init(config: &Config, journald: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string()));

    let writer = match &config.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .context("failed opening log file")?;
            BoxMakeWriter::new(Mutex::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    let fmt_layer = tracing_subscriber::fmt::layer().with_writer(writer);
    let fmt_layer: Box<
        dyn Layer<tracing_subscriber::layer::Layered<EnvFilter, tracing_subscriber::Registry>>
            + Send
            + Sync,
    > = match config.log_format {
        LogFormat::Json => Box::new(fmt_layer.json()),
        LogFormat::Text => Box::new(fmt_layer),
    };

    let registry = tracing_subscriber::registry().with(filter).with(fmt_layer);

    if journald {
        let journald_layer =
            tracing_journald::layer().context("failed connecting to the systemd journal")?;
        registry.with(journald_layer).try_init()
    } else {
        registry.try_init()
    }
    .context("failed installing the global tracing subscriber")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_to_a_log_file_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.log_file = Some(dir.path().join("sysboxfs.log"));
        // try_init tolerates a subscriber already installed by an earlier
        // test in this binary; either outcome proves the writer/filter
        // construction above did not panic.
        let _ = init(&config, false);
        assert!(config.log_file.unwrap().exists());
    }
}
