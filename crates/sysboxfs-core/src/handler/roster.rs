//! Builds the curated set of concrete handlers named in the component
//! design and registers them, plus the three generic catch-alls, against a
//! [`Registry`]. Called once at daemon startup.

use std::path::PathBuf;
use std::sync::Arc;

use sysboxfs_nsenter::Broker;

use crate::ionode::IoBackend;

use super::substrate::{EnumHandler, PassthroughHandler, PortRangeHandler, ScalarBoundHandler, SyntheticHandler};
use super::{DirEntry, Registry};

const NF_CONNTRACK_MAX_BOUND: u64 = 2u64.pow(31) - 1;

/// Registers every handler in the curated roster. `host` backs the
/// scalar/enum substrates' host-seeding reads; `broker` backs passthrough
/// reads that execute inside a container's namespaces.
pub fn register_all(registry: &Registry, host: Arc<dyn IoBackend>, broker: Arc<Broker>) {
    register_scalar_bound(registry, &host);
    register_enum(registry, &host);
    register_synthetic(registry);
    register_passthrough(registry, &broker);
    register_generic(registry, broker);
}

fn scalar(path: &str, bound: u64, host: &Arc<dyn IoBackend>) -> ScalarBoundHandler {
    ScalarBoundHandler::new(PathBuf::from(path), bound, host.clone())
}

fn register_scalar_bound(registry: &Registry, host: &Arc<dyn IoBackend>) {
    let entries: &[(&str, u64, bool, bool)] = &[
        ("/proc/sys/kernel/panic", 3600, false, false),
        ("/proc/sys/kernel/panic_on_oops", 1, false, false),
        ("/proc/sys/kernel/printk", 15, false, false),
        ("/proc/sys/kernel/cap_last_cap", u64::MAX, true, false),
        (
            "/proc/sys/net/netfilter/nf_conntrack_max",
            NF_CONNTRACK_MAX_BOUND,
            false,
            false,
        ),
        (
            "/proc/sys/net/netfilter/nf_conntrack_count",
            NF_CONNTRACK_MAX_BOUND,
            true,
            false,
        ),
        ("/proc/sys/net/ipv4/ip_forward", 1, false, true),
        ("/proc/sys/vm/overcommit_memory", 2, false, false),
        ("/proc/sys/fs/file-max", u64::MAX, false, false),
    ];
    for &(path, bound, readonly, propagate) in entries {
        let mut handler = scalar(path, bound, host);
        if readonly {
            handler = handler.read_only();
        }
        if propagate {
            handler = handler.propagating();
        }
        let _ = registry.register(Arc::new(handler));
    }

    let _ = registry.register(Arc::new(PortRangeHandler::new(
        PathBuf::from("/proc/sys/net/ipv4/ip_local_port_range"),
        host.clone(),
    )));

    for path in [
        "/proc/sys/net/ipv4/vs/conntrack",
        "/proc/sys/net/ipv4/vs/conn_reuse_mode",
        "/proc/sys/net/ipv4/vs/expire_nodest_conn",
    ] {
        let _ = registry.register(Arc::new(scalar(path, u32::MAX as u64, host)));
    }
}

fn register_enum(registry: &Registry, host: &Arc<dyn IoBackend>) {
    let _ = registry.register(Arc::new(EnumHandler::new(
        PathBuf::from("/proc/sys/kernel/yama/ptrace_scope"),
        &["0", "1", "2", "3"],
        host.clone(),
    )));
    for path in [
        "/proc/sys/net/ipv4/conf/all/rp_filter",
        "/proc/sys/net/ipv4/conf/default/rp_filter",
    ] {
        let _ = registry.register(Arc::new(EnumHandler::new(
            PathBuf::from(path),
            &["0", "1", "2"],
            host.clone(),
        )));
    }
}

fn register_synthetic(registry: &Registry) {
    let _ = registry.register(Arc::new(SyntheticHandler::directory(
        PathBuf::from("/proc/sys/fs/binfmt_misc"),
        vec![
            DirEntry {
                name: "status".into(),
                is_dir: false,
            },
            DirEntry {
                name: "register".into(),
                is_dir: false,
            },
        ],
    )));
    let _ = registry.register(Arc::new(SyntheticHandler::file(
        PathBuf::from("/proc/sys/fs/binfmt_misc/status"),
        b"enabled\n".to_vec(),
    )));
    let _ = registry.register(Arc::new(SyntheticHandler::file(
        PathBuf::from("/proc/sys/fs/binfmt_misc/register"),
        Vec::new(),
    )));
    let _ = registry.register(Arc::new(SyntheticHandler::file(
        PathBuf::from("/proc/swaps"),
        b"Filename\t\t\t\tType\t\tSize\tUsed\tPriority\n".to_vec(),
    )));
}

fn register_passthrough(registry: &Registry, broker: &Arc<Broker>) {
    for path in [
        "/proc/uptime",
        "/proc/loadavg",
        "/proc/meminfo",
        "/proc/stat",
        "/proc/cpuinfo",
        "/proc/diskstats",
        "/proc/self",
    ] {
        let _ = registry.register(Arc::new(PassthroughHandler::new(
            PathBuf::from(path),
            broker.clone(),
        )));
    }
}

fn register_generic(registry: &Registry, broker: Arc<Broker>) {
    registry.register_generic_proc_sys(Arc::new(PassthroughHandler::new(
        PathBuf::from("/proc/sys"),
        broker.clone(),
    )));
    registry.register_generic_proc(Arc::new(PassthroughHandler::new(
        PathBuf::from("/proc"),
        broker.clone(),
    )));
    registry.register_generic_sys(Arc::new(PassthroughHandler::new(
        PathBuf::from("/sys"),
        broker,
    )));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ionode::RealIoBackend;
    use std::time::Duration;

    #[test]
    fn register_all_populates_curated_scalar_and_synthetic_handlers() {
        let dir = tempfile::tempdir().unwrap();
        let host: Arc<dyn IoBackend> = Arc::new(RealIoBackend::new(dir.path().to_path_buf()));
        let broker = Arc::new(Broker::new(Duration::from_secs(1)).unwrap());
        let registry = Registry::new();
        register_all(&registry, host, broker);

        assert!(registry
            .lookup(std::path::Path::new("/proc/sys/kernel/panic"))
            .is_ok());
        assert!(registry
            .lookup(std::path::Path::new("/proc/sys/fs/binfmt_misc/status"))
            .is_ok());
        assert!(registry
            .lookup(std::path::Path::new("/proc/sys/net/ipv4/conf/all/rp_filter"))
            .is_ok());
        // Unregistered /proc/sys path still resolves via the generic catch-all.
        assert!(registry
            .lookup(std::path::Path::new("/proc/sys/kernel/unregistered_knob"))
            .is_ok());
        assert!(registry
            .lookup(std::path::Path::new("/proc/sys/net/ipv4/ip_local_port_range"))
            .is_ok());
    }
}
