//! The handler trait, the three canonical substrates concrete handlers are
//! built from, and the path-indexed registry that dispatches to them.

pub mod registry;
pub mod roster;
pub mod substrate;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::container::ContainerRecord;
use crate::error::Result;
use crate::ionode::IoNode;

pub use registry::Registry;
pub use substrate::{EnumHandler, PassthroughHandler, PortRangeHandler, ScalarBoundHandler, SyntheticHandler};

/// Context carried with every handler call: the caller's identity and,
/// when resolvable, the container it belongs to.
#[derive(Clone)]
pub struct Request {
    pub pid: i32,
    pub uid: u32,
    pub gid: u32,
    pub container: Option<Arc<ContainerRecord>>,
}

#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
}

/// One emulated resource's behavior. Implemented by the three substrates
/// in [`substrate`]; never implemented per-file directly (see the
/// "interface polymorphism over handlers" design note).
pub trait Handler: Send + Sync {
    fn canonical_path(&self) -> &Path;

    fn lookup(&self, req: &Request) -> Result<IoNode>;

    fn getattr(&self, req: &Request) -> Result<IoNode> {
        self.lookup(req)
    }

    /// Called once per open before any read/write; the default accepts
    /// every open. Handlers that must reject an access mode up front
    /// (e.g. a read-only scalar rejecting a write-only open) override this
    /// rather than failing the first `write` call.
    fn open(&self, _req: &Request) -> Result<()> {
        Ok(())
    }

    fn setattr(&self, req: &Request) -> Result<IoNode> {
        self.getattr(req)
    }

    fn read(&self, req: &Request, offset: u64, len: usize) -> Result<Vec<u8>>;

    /// Returns the number of bytes accepted. Emulated-knob handlers never
    /// mutate the host; only `propagate`-flagged ones additionally write
    /// through when the container is privileged enough.
    fn write(&self, req: &Request, offset: u64, buf: &[u8]) -> Result<usize>;

    fn readdir(&self, _req: &Request) -> Result<Vec<DirEntry>> {
        Ok(Vec::new())
    }

    fn flags(&self) -> HandlerFlags {
        HandlerFlags::default()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HandlerFlags {
    pub enabled: bool,
    pub cacheable: bool,
    pub substitution: bool,
    pub bindmount_target: bool,
    pub propagate: bool,
}

pub(crate) fn synthetic_node(path: &Path) -> IoNode {
    IoNode::new(PathBuf::from(path), libc::S_IFREG | 0o644)
}
