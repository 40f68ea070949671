//! Uniform read/write/stat/readlink access to real host files, with an
//! injectable backend so handler and process-inspector tests can run
//! against a temporary directory instead of the real `/proc`, mirroring the
//! `RootlessIDMapper` base-path injection pattern.

use std::fs::{self, File, Metadata};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub file_type_is_dir: bool,
}

pub trait IoBackend: Send + Sync {
    fn metadata(&self, path: &Path) -> std::io::Result<Metadata>;
    fn symlink_metadata(&self, path: &Path) -> std::io::Result<Metadata>;
    fn read_link(&self, path: &Path) -> std::io::Result<PathBuf>;
    fn open_read(&self, path: &Path) -> std::io::Result<Box<dyn Read>>;
    fn open_write(&self, path: &Path, append: bool) -> std::io::Result<Box<dyn Write>>;
    fn read_dir(&self, path: &Path) -> std::io::Result<Vec<DirEntry>>;
    /// Resolves `path` against this backend's root, so callers that were
    /// handed a backend rooted at a temp directory can still reason about
    /// the "real" path they end up touching.
    fn resolve(&self, path: &Path) -> PathBuf;
}

/// Delegates straight to `std::fs`, optionally rooted under a directory
/// other than `/` — tests redirect this at a temp dir standing in for
/// `/proc` so they never need root or a real container.
pub struct RealIoBackend {
    pub root_path: PathBuf,
}

impl Default for RealIoBackend {
    fn default() -> Self {
        Self {
            root_path: PathBuf::from("/"),
        }
    }
}

impl RealIoBackend {
    pub fn new(root_path: PathBuf) -> Self {
        Self { root_path }
    }

    fn full_path(&self, path: &Path) -> PathBuf {
        if self.root_path == Path::new("/") {
            return path.to_path_buf();
        }
        let relative = path.strip_prefix("/").unwrap_or(path);
        self.root_path.join(relative)
    }
}

impl IoBackend for RealIoBackend {
    fn metadata(&self, path: &Path) -> std::io::Result<Metadata> {
        fs::metadata(self.full_path(path))
    }

    fn symlink_metadata(&self, path: &Path) -> std::io::Result<Metadata> {
        fs::symlink_metadata(self.full_path(path))
    }

    fn read_link(&self, path: &Path) -> std::io::Result<PathBuf> {
        fs::read_link(self.full_path(path))
    }

    fn open_read(&self, path: &Path) -> std::io::Result<Box<dyn Read>> {
        Ok(Box::new(File::open(self.full_path(path))?))
    }

    fn open_write(&self, path: &Path, append: bool) -> std::io::Result<Box<dyn Write>> {
        let file = fs::OpenOptions::new()
            .write(true)
            .append(append)
            .open(self.full_path(path))?;
        Ok(Box::new(file))
    }

    fn read_dir(&self, path: &Path) -> std::io::Result<Vec<DirEntry>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(self.full_path(path))? {
            let entry = entry?;
            out.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                file_type_is_dir: entry.file_type()?.is_dir(),
            });
        }
        Ok(out)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        self.full_path(path)
    }
}

/// A virtual file identity: a canonical path, an optional display name
/// distinct from the path's final component (used for synthetic directory
/// entries such as `status`/`register` under `binfmt_misc`), and a mode.
#[derive(Debug, Clone)]
pub struct IoNode {
    pub path: PathBuf,
    pub display_name: Option<String>,
    pub mode: libc::mode_t,
}

impl IoNode {
    pub fn new(path: PathBuf, mode: libc::mode_t) -> Self {
        Self {
            path,
            display_name: None,
            mode,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn name(&self) -> String {
        self.display_name.clone().unwrap_or_else(|| {
            self.path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        })
    }

    pub fn is_dir(&self) -> bool {
        self.mode & libc::S_IFMT == libc::S_IFDIR
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn real_backend_reads_rooted_at_temp_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::File::create(dir.path().join("status"))
            .unwrap()
            .write_all(b"enabled")
            .unwrap();

        let backend = RealIoBackend::new(dir.path().to_path_buf());
        let mut buf = String::new();
        backend
            .open_read(Path::new("/status"))
            .unwrap()
            .read_to_string(&mut buf)
            .unwrap();
        assert_eq!(buf, "enabled");
    }

    #[test]
    fn read_dir_lists_entries_with_dir_flag() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::File::create(dir.path().join("a")).unwrap();
        std::fs::create_dir(dir.path().join("b")).unwrap();

        let backend = RealIoBackend::new(dir.path().to_path_buf());
        let mut entries = backend.read_dir(Path::new("/")).unwrap();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        assert_eq!(entries.len(), 2);
        assert!(!entries[0].file_type_is_dir);
        assert!(entries[1].file_type_is_dir);
    }

    #[test]
    fn io_node_name_falls_back_to_final_path_component() {
        let node = IoNode::new(PathBuf::from("/proc/sys/kernel/panic"), libc::S_IFREG);
        assert_eq!(node.name(), "panic");
        assert!(!node.is_dir());
    }

    #[test]
    fn io_node_display_name_overrides_path_component() {
        let node = IoNode::new(PathBuf::from("/proc/sys/fs/binfmt_misc"), libc::S_IFDIR)
            .with_display_name("status");
        assert_eq!(node.name(), "status");
        assert!(node.is_dir());
    }
}
