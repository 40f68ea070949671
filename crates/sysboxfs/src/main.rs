//! sysboxfs
//!
//! A userspace filesystem daemon that emulates portions of `/proc` and
//! `/sys` for unprivileged containers, brokers mount-family syscalls
//! intercepted via seccomp-notify, and executes privileged operations
//! inside a container's own namespaces through a short-lived helper
//! process.

mod cli;
mod commands;
mod daemon;
mod logger;

use anyhow::{Context, Result};
use clap::Parser;

use crate::cli::Opts;

fn main() -> Result<()> {
    // A malicious container can gain access to the host machine by
    // modifying this binary's own on-disk image and infecting it with
    // malicious code (CVE-2019-5736). The fix is to copy /proc/self/exe
    // into a sealed anonymous file descriptor and re-execute it; this has
    // to happen before anything else runs.
    pentacle::ensure_sealed().context("failed to seal /proc/self/exe")?;

    let opts = Opts::parse();
    let config = opts.to_config();
    logger::init(&config, opts.journald).context("failed to initialize logging")?;

    tracing::debug!(
        uid = %nix::unistd::geteuid(),
        args = ?std::env::args_os().collect::<Vec<_>>(),
        "starting"
    );

    commands::run::run(opts)
}
