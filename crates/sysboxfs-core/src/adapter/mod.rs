//! The kernel-facing callback surface, expressed as a trait so the real
//! FUSE-style driver (external collaborator, out of scope) can be swapped
//! for an in-process fake in tests that exercise the full dispatch path
//! without a real mount.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::container::Directory;
use crate::error::{HandlerErrorKind, Result};
use crate::handler::{DirEntry, Registry, Request};
use crate::ionode::IoNode;

/// Caller identity as the upper layer hands it to us per-call.
#[derive(Debug, Clone, Copy)]
pub struct CallerContext {
    pub pid: i32,
    pub uid: u32,
    pub gid: u32,
}

#[derive(Debug, Clone)]
pub struct Attr {
    pub inode: u64,
    pub mode: libc::mode_t,
    pub size: u64,
}

pub trait FilesystemOps: Send + Sync {
    fn lookup(&self, caller: CallerContext, path: &Path) -> Result<Attr>;
    fn getattr(&self, caller: CallerContext, path: &Path) -> Result<Attr>;
    fn open(&self, caller: CallerContext, path: &Path) -> Result<()>;
    fn read(&self, caller: CallerContext, path: &Path, offset: u64, size: usize) -> Result<Vec<u8>>;
    fn write(&self, caller: CallerContext, path: &Path, offset: u64, buf: &[u8]) -> Result<usize>;
    fn readdir(&self, caller: CallerContext, path: &Path) -> Result<Vec<DirEntry>>;
    fn setattr(&self, caller: CallerContext, path: &Path) -> Result<Attr>;
    fn forget(&self, _path: &Path) {}
    fn statfs(&self) -> Result<()> {
        Ok(())
    }
}

/// Assigns inode numbers deterministically from the canonical path (stable
/// across restarts, since the daemon persists no state) and caches the
/// assignment for the configured dentry-cache TTL.
struct InodeTable {
    ttl: Duration,
    entries: std::sync::RwLock<std::collections::HashMap<PathBuf, (u64, Instant)>>,
    next: AtomicU64,
}

impl InodeTable {
    fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: std::sync::RwLock::new(std::collections::HashMap::new()),
            next: AtomicU64::new(2),
        }
    }

    fn assign(&self, path: &Path) -> u64 {
        {
            let entries = self.entries.read().unwrap();
            if let Some((ino, stamp)) = entries.get(path) {
                if stamp.elapsed() < self.ttl {
                    return *ino;
                }
            }
        }
        let mut entries = self.entries.write().unwrap();
        let ino = self.next.fetch_add(1, Ordering::Relaxed);
        entries.insert(path.to_path_buf(), (ino, Instant::now()));
        ino
    }
}

/// Default [`FilesystemOps`] implementation: resolves a handler via the
/// registry, derives a [`Request`] from the container directory, and maps
/// handler results/errors to the upper layer's `Attr`/errno shape.
pub struct Adapter {
    registry: Arc<Registry>,
    directory: Arc<Directory>,
    host_pid_ns_inode: u64,
    inodes: InodeTable,
}

impl Adapter {
    pub fn new(
        registry: Arc<Registry>,
        directory: Arc<Directory>,
        host_pid_ns_inode: u64,
        dentry_cache_ttl: Duration,
    ) -> Self {
        Self {
            registry,
            directory,
            host_pid_ns_inode,
            inodes: InodeTable::new(dentry_cache_ttl),
        }
    }

    fn request_for(&self, caller: CallerContext, backend: &dyn crate::ionode::IoBackend) -> Request {
        let container = self
            .directory
            .lookup_by_pid(backend, caller.pid, self.host_pid_ns_inode)
            .ok()
            .flatten();
        Request {
            pid: caller.pid,
            uid: caller.uid,
            gid: caller.gid,
            container,
        }
    }

    fn attr_of(&self, node: &IoNode) -> Attr {
        Attr {
            inode: self.inodes.assign(&node.path),
            mode: node.mode,
            size: 0,
        }
    }
}

impl FilesystemOps for Adapter {
    fn lookup(&self, caller: CallerContext, path: &Path) -> Result<Attr> {
        self.getattr(caller, path)
    }

    fn getattr(&self, caller: CallerContext, path: &Path) -> Result<Attr> {
        let backend = crate::ionode::RealIoBackend::default();
        let req = self.request_for(caller, &backend);
        let handler = self.registry.lookup(path).map_err(HandlerErrorKind::from)?;
        let node = handler.getattr(&req)?;
        Ok(self.attr_of(&node))
    }

    fn open(&self, caller: CallerContext, path: &Path) -> Result<()> {
        let backend = crate::ionode::RealIoBackend::default();
        let req = self.request_for(caller, &backend);
        let handler = self.registry.lookup(path).map_err(HandlerErrorKind::from)?;
        handler.open(&req)
    }

    fn read(&self, caller: CallerContext, path: &Path, offset: u64, size: usize) -> Result<Vec<u8>> {
        let backend = crate::ionode::RealIoBackend::default();
        let req = self.request_for(caller, &backend);
        let handler = self.registry.lookup(path).map_err(HandlerErrorKind::from)?;
        handler.read(&req, offset, size)
    }

    fn write(&self, caller: CallerContext, path: &Path, offset: u64, buf: &[u8]) -> Result<usize> {
        let backend = crate::ionode::RealIoBackend::default();
        let req = self.request_for(caller, &backend);
        let handler = self.registry.lookup(path).map_err(HandlerErrorKind::from)?;
        handler.write(&req, offset, buf)
    }

    fn readdir(&self, caller: CallerContext, path: &Path) -> Result<Vec<DirEntry>> {
        let backend = crate::ionode::RealIoBackend::default();
        let req = self.request_for(caller, &backend);
        let handler = self.registry.lookup(path).map_err(HandlerErrorKind::from)?;
        let mut entries = handler.readdir(&req)?;

        let mut seen: std::collections::HashSet<String> =
            entries.iter().map(|e| e.name.clone()).collect();
        for name in self.registry.children_of(path) {
            if seen.insert(name.clone()) {
                entries.push(DirEntry {
                    name,
                    is_dir: false,
                });
            }
        }
        Ok(entries)
    }

    fn setattr(&self, caller: CallerContext, path: &Path) -> Result<Attr> {
        let backend = crate::ionode::RealIoBackend::default();
        let req = self.request_for(caller, &backend);
        let handler = self.registry.lookup(path).map_err(HandlerErrorKind::from)?;
        let node = handler.setattr(&req)?;
        Ok(self.attr_of(&node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::substrate::SyntheticHandler;
    use crate::handler::DirEntry as HandlerDirEntry;

    #[test]
    fn readdir_merges_real_and_emulated_entries_without_duplicates() {
        let registry = Arc::new(Registry::new());
        registry
            .register(Arc::new(SyntheticHandler::directory(
                PathBuf::from("/proc/sys/fs/binfmt_misc"),
                vec![HandlerDirEntry {
                    name: "kernel-listed".into(),
                    is_dir: false,
                }],
            )))
            .unwrap();
        registry
            .register(Arc::new(SyntheticHandler::file(
                PathBuf::from("/proc/sys/fs/binfmt_misc/status"),
                vec![],
            )))
            .unwrap();
        registry
            .register(Arc::new(SyntheticHandler::file(
                PathBuf::from("/proc/sys/fs/binfmt_misc/kernel-listed"),
                vec![],
            )))
            .unwrap();

        let directory = Arc::new(Directory::new());
        let adapter = Adapter::new(registry, directory, 1, Duration::from_secs(60));
        let caller = CallerContext {
            pid: 1,
            uid: 0,
            gid: 0,
        };
        let entries = adapter
            .readdir(caller, Path::new("/proc/sys/fs/binfmt_misc"))
            .unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.clone()).collect();
        assert!(names.contains(&"status".to_string()));
        assert!(names.contains(&"kernel-listed".to_string()));
        assert_eq!(
            names.iter().filter(|n| *n == "kernel-listed").count(),
            1,
            "emulated entry must shadow the real one, not duplicate it"
        );
    }
}
