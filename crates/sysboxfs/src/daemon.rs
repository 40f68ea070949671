//! Wires the core components (directory, registry, broker, adapter, RPC
//! server) and the seccomp-notify engine together into one running daemon.
//! Owns the three process-wide singletons named in the concurrency design:
//! the handler registry, the container directory, and the broker's reaper.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use sysboxfs_core::ionode::RealIoBackend;
use sysboxfs_core::process::ProcessInspector;
use sysboxfs_core::{handler, Adapter, Config, Directory, IoBackend, Registry, RpcServer};
use sysboxfs_nsenter::Broker;
use sysboxfs_seccomp::{Engine, KernelNotifySource, ProcMemReader};

/// Well-known path the companion runtime connects to when handing off a
/// container's seccomp listener fd. One rendezvous socket serves every
/// container sequentially: the container id travels in the handoff
/// payload itself, so the daemon does not need to know it in advance.
const SECCOMP_RENDEZVOUS_PATH: &str = "/run/sysboxfs/seccomp.sock";

pub struct Daemon {
    config: Config,
    directory: Arc<Directory>,
    registry: Arc<Registry>,
    broker: Arc<Broker>,
    host: Arc<dyn IoBackend>,
    host_pid_ns_inode: u64,
}

impl Daemon {
    pub fn new(config: Config) -> Result<Self> {
        let host: Arc<dyn IoBackend> = Arc::new(RealIoBackend::default());
        let broker = Arc::new(Broker::new(config.nsenter_timeout).context("failed to start nsenter broker")?);
        let registry = Arc::new(Registry::new());
        handler::roster::register_all(&registry, host.clone(), broker.clone());

        let host_pid_ns_inode = *ProcessInspector::new(host.as_ref())
            .namespace_inodes(1)
            .context("failed to inspect the host's own pid namespace")?
            .get("pid")
            .context("host pid namespace inode missing from /proc/1/ns")?;

        Ok(Self {
            config,
            directory: Arc::new(Directory::new()),
            registry,
            broker,
            host,
            host_pid_ns_inode,
        })
    }

    /// Returns the upper-filesystem adapter the external FUSE-style driver
    /// mounts the daemon through; constructing it here keeps its
    /// dependencies (registry, directory, dentry-cache TTL) explicit rather
    /// than reached for through a global.
    pub fn adapter(&self) -> Adapter {
        Adapter::new(
            self.registry.clone(),
            self.directory.clone(),
            self.host_pid_ns_inode,
            self.config.dentry_cache_ttl,
        )
    }

    /// Runs the container lifecycle RPC server on the calling thread until
    /// its listener is closed.
    pub fn run_rpc_server(&self, socket_path: &std::path::Path) -> Result<()> {
        let server = RpcServer::bind(socket_path, self.directory.clone(), self.host.clone())
            .context("failed to bind the container lifecycle rpc socket")?;
        server.serve_forever().context("rpc server loop failed")
    }

    /// Spawns one background worker per listener fd handed off by the
    /// runtime: blocks accepting rendezvous connections on
    /// `SECCOMP_RENDEZVOUS_PATH`, and for each one spawns a thread that
    /// services that listener's notifications until the container
    /// disconnects it.
    pub fn run_seccomp_acceptor(&self) -> Result<()> {
        let rendezvous_path = PathBuf::from(SECCOMP_RENDEZVOUS_PATH);
        if let Some(parent) = rendezvous_path.parent() {
            std::fs::create_dir_all(parent)
                .context("failed to create the seccomp rendezvous directory")?;
        }

        loop {
            let (handoff, fd) = match sysboxfs_seccomp::receive_listener_fd(&rendezvous_path) {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::warn!(?e, "seccomp handoff failed, retrying");
                    continue;
                }
            };

            let directory = self.directory.clone();
            let broker = self.broker.clone();
            let host_pid_ns_inode = self.host_pid_ns_inode;
            let host = self.host.clone();
            std::thread::spawn(move || {
                run_seccomp_worker(handoff.container_id, fd, directory, broker, host_pid_ns_inode, host);
            });
        }
    }
}

fn run_seccomp_worker(
    container_id: String,
    fd: std::os::fd::OwnedFd,
    directory: Arc<Directory>,
    broker: Arc<Broker>,
    host_pid_ns_inode: u64,
    host: Arc<dyn IoBackend>,
) {
    use std::os::fd::AsRawFd;

    let engine = Engine::new(directory, broker, host_pid_ns_inode, Arc::new(ProcMemReader));
    let source = KernelNotifySource::new(fd.as_raw_fd());
    tracing::info!(%container_id, "seccomp worker started");
    loop {
        if let Err(e) = engine.handle_one(&source, host.as_ref()) {
            tracing::warn!(%container_id, ?e, "seccomp worker exiting");
            break;
        }
    }
}
