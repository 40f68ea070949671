//! The foreground daemon command: the only long-running operation this
//! binary performs. Builds the daemon, starts the seccomp acceptor on a
//! background thread, and blocks the main thread on the RPC server.

use anyhow::{Context, Result};

use crate::cli::Opts;
use crate::daemon::Daemon;

pub fn run(opts: Opts) -> Result<()> {
    let config = opts.to_config();
    let daemon = Daemon::new(config).context("failed to initialize daemon")?;

    // The upper-filesystem adapter is handed to the external FUSE-style
    // driver that actually owns the mount; constructing it here just
    // proves every dependency it needs is ready before the daemon
    // declares itself up.
    let _adapter = daemon.adapter();

    let daemon = std::sync::Arc::new(daemon);
    let acceptor = daemon.clone();
    std::thread::spawn(move || {
        if let Err(e) = acceptor.run_seccomp_acceptor() {
            tracing::error!(?e, "seccomp acceptor exited");
        }
    });

    tracing::info!(mount_point = %opts.mount_point.display(), "sysboxfs daemon starting");
    daemon.run_rpc_server(&opts.rpc_socket)
}
