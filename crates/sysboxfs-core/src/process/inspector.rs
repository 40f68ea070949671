//! Kernel-faithful path resolution, DAC checks, and namespace-inode
//! collection for a target pid.

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

use crate::error::ProcessError;
use crate::ionode::IoBackend;

const SYMLINK_LIMIT: u32 = 40;

/// Owned counterpart of [`Component`], so a symlink target's components can
/// be pushed onto the pending queue after the [`PathBuf`] that produced them
/// has gone out of scope.
#[derive(Debug, Clone)]
enum PendingComponent {
    Skip,
    ParentDir,
    Normal(OsString),
}

impl From<Component<'_>> for PendingComponent {
    fn from(c: Component<'_>) -> Self {
        match c {
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {
                PendingComponent::Skip
            }
            Component::ParentDir => PendingComponent::ParentDir,
            Component::Normal(part) => PendingComponent::Normal(part.to_os_string()),
        }
    }
}
const NS_NAMES: &[&str] = &["pid", "net", "user", "uts", "ipc", "mnt", "cgroup"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Exists,
    Read,
    Write,
    Execute,
}

impl AccessMode {
    fn bit(self) -> u32 {
        match self {
            AccessMode::Exists => 0,
            AccessMode::Read => 0o4,
            AccessMode::Write => 0o2,
            AccessMode::Execute => 0o1,
        }
    }
}

/// A point-in-time view of a caller's identity, bounded by the lifetime of
/// the request that triggered it.
#[derive(Debug, Clone)]
pub struct ProcessSnapshot {
    pub pid: i32,
    pub uid: u32,
    pub gid: u32,
    pub groups: Vec<u32>,
    pub cap_effective: u64,
    pub root: PathBuf,
    pub cwd: PathBuf,
    pub ns_inodes: HashMap<&'static str, u64>,
}

impl ProcessSnapshot {
    fn has_cap(&self, bit: u32) -> bool {
        self.cap_effective & (1u64 << bit) != 0
    }

    fn has_dac_override(&self) -> bool {
        self.has_cap(caps::Capability::CAP_DAC_OVERRIDE as u32)
    }

    fn has_dac_read_search(&self) -> bool {
        self.has_cap(caps::Capability::CAP_DAC_READ_SEARCH as u32)
    }
}

pub struct ProcessInspector<'a> {
    backend: &'a dyn IoBackend,
}

impl<'a> ProcessInspector<'a> {
    pub fn new(backend: &'a dyn IoBackend) -> Self {
        Self { backend }
    }

    /// Captures uid/gid/caps/root/cwd/namespace-inodes for `pid`, reading
    /// only through the injected backend so tests can substitute a fixture
    /// tree for `/proc`.
    pub fn snapshot(&self, pid: i32) -> Result<ProcessSnapshot, ProcessError> {
        let status_path = PathBuf::from(format!("/proc/{pid}/status"));
        let mut status_text = String::new();
        self.backend
            .open_read(&status_path)
            .map_err(|_| ProcessError::NoSuchProcess(pid))?
            .read_to_string(&mut status_text)
            .map_err(ProcessError::Io)?;
        let (uid, gid, groups, cap_effective) = parse_status(&status_text);

        let root = self
            .backend
            .read_link(&PathBuf::from(format!("/proc/{pid}/root")))
            .unwrap_or_else(|_| PathBuf::from("/"));
        let cwd = self
            .backend
            .read_link(&PathBuf::from(format!("/proc/{pid}/cwd")))
            .unwrap_or_else(|_| PathBuf::from("/"));

        let ns_inodes = self.namespace_inodes(pid)?;

        Ok(ProcessSnapshot {
            pid,
            uid,
            gid,
            groups,
            cap_effective,
            root,
            cwd,
            ns_inodes,
        })
    }

    /// Stats every entry under `/proc/<pid>/ns/` in the fixed namespace
    /// list; a missing entry is an error rather than a partial map.
    pub fn namespace_inodes(&self, pid: i32) -> Result<HashMap<&'static str, u64>, ProcessError> {
        use std::os::unix::fs::MetadataExt;
        let mut out = HashMap::new();
        for &ns in NS_NAMES {
            let path = PathBuf::from(format!("/proc/{pid}/ns/{ns}"));
            let meta = self
                .backend
                .metadata(&path)
                .map_err(|_| ProcessError::MissingNamespace { pid, ns })?;
            out.insert(ns, meta.ino());
        }
        Ok(out)
    }

    /// Rewrites `/proc/self/` and `/proc/self/task/<tid>/` prefixes to
    /// `/proc/<pid>/`, recursively, since each rewritten prefix may itself
    /// be a symlink. Bounded by the same limit as general symlink
    /// resolution.
    fn rewrite_self(&self, path: &Path, pid: i32) -> Result<PathBuf, ProcessError> {
        let mut current = path.to_path_buf();
        let mut hops = 0;
        loop {
            let as_str = current.to_string_lossy();
            let rewritten = if let Some(rest) = as_str.strip_prefix("/proc/self/task/") {
                rest.split_once('/')
                    .map(|(_tid, tail)| PathBuf::from(format!("/proc/{pid}/{tail}")))
            } else {
                as_str
                    .strip_prefix("/proc/self/")
                    .map(|rest| PathBuf::from(format!("/proc/{pid}/{rest}")))
            };
            match rewritten {
                Some(next) => {
                    current = next;
                    hops += 1;
                    if hops > SYMLINK_LIMIT {
                        return Err(ProcessError::TooManyLinks);
                    }
                }
                None => return Ok(current),
            }
        }
    }

    /// Walks `path` one component at a time starting from `root` (absolute
    /// paths) or `cwd` (relative paths), checking `mode` against the final
    /// component and execute permission against every intermediate
    /// component, exactly as the kernel's path walk does.
    pub fn path_access(
        &self,
        snapshot: &ProcessSnapshot,
        path: &Path,
        mode: AccessMode,
        follow_symlink: bool,
    ) -> Result<PathBuf, ProcessError> {
        if path.as_os_str().len() > libc::PATH_MAX as usize {
            return Err(ProcessError::NameTooLong(path.to_path_buf()));
        }
        let rewritten = self.rewrite_self(path, snapshot.pid)?;

        let mut resolved = if rewritten.is_absolute() {
            snapshot.root.clone()
        } else {
            snapshot.cwd.clone()
        };
        // A work queue rather than a fixed component list, so a symlink
        // target can splice its own components in ahead of whatever
        // followed the link, without re-entering resolution from scratch.
        let mut pending: std::collections::VecDeque<PendingComponent> = rewritten
            .components()
            .map(PendingComponent::from)
            .collect();
        let mut links_followed = 0;

        while let Some(component) = pending.pop_front() {
            let is_final = pending.is_empty();
            match component {
                PendingComponent::Skip => continue,
                PendingComponent::ParentDir => {
                    if resolved.starts_with(&snapshot.root) && resolved != snapshot.root {
                        resolved.pop();
                    }
                    continue;
                }
                PendingComponent::Normal(part) => {
                    if !is_final {
                        self.check_access(snapshot, &resolved, AccessMode::Execute)?;
                    }
                    let candidate = resolved.join(&part);
                    let meta = self
                        .backend
                        .symlink_metadata(&candidate)
                        .map_err(|_| ProcessError::NotFound(candidate.clone()))?;

                    let follow_this = !is_final || follow_symlink;
                    if meta.file_type().is_symlink() && follow_this {
                        let target = self
                            .backend
                            .read_link(&candidate)
                            .map_err(|_| ProcessError::NotFound(candidate.clone()))?;
                        links_followed += 1;
                        if links_followed > SYMLINK_LIMIT {
                            return Err(ProcessError::TooManyLinks);
                        }
                        if target.is_absolute() {
                            resolved = snapshot.root.clone();
                        }
                        for target_component in target.components().rev() {
                            pending.push_front(PendingComponent::from(target_component));
                        }
                        continue;
                    }

                    if !meta.is_dir() && !is_final {
                        return Err(ProcessError::NotADirectory(candidate));
                    }
                    resolved = candidate;
                    if is_final {
                        self.check_access(snapshot, &resolved, mode)?;
                    }
                }
            }
        }
        Ok(resolved)
    }

    /// DAC check mirroring kernel order: owner, group, other, then
    /// `CAP_DAC_OVERRIDE`/`CAP_DAC_READ_SEARCH` as described in the design.
    fn check_access(
        &self,
        snapshot: &ProcessSnapshot,
        path: &Path,
        mode: AccessMode,
    ) -> Result<(), ProcessError> {
        if mode.bit() == 0 {
            return Ok(());
        }
        use std::os::unix::fs::MetadataExt;
        let meta = self
            .backend
            .metadata(path)
            .map_err(|_| ProcessError::NotFound(path.to_path_buf()))?;
        let file_mode = meta.mode();
        let want = mode.bit();

        let owner_bits = (file_mode >> 6) & 0o7;
        let group_bits = (file_mode >> 3) & 0o7;
        let other_bits = file_mode & 0o7;

        let granted = if snapshot.uid == meta.uid() {
            owner_bits & want == want
        } else if snapshot.gid == meta.gid() || snapshot.groups.contains(&meta.gid()) {
            group_bits & want == want
        } else {
            other_bits & want == want
        };
        if granted {
            return Ok(());
        }

        let is_dir = meta.is_dir();
        if snapshot.has_dac_override() {
            let any_exec_bit = file_mode & 0o111 != 0;
            if want != AccessMode::Execute.bit() || is_dir || any_exec_bit {
                return Ok(());
            }
        }
        if snapshot.has_dac_read_search() {
            let readable = want == AccessMode::Read.bit();
            let searchable = is_dir && want == AccessMode::Execute.bit();
            if readable || searchable {
                return Ok(());
            }
        }
        Err(ProcessError::PermissionDenied(path.to_path_buf()))
    }
}

fn parse_status(text: &str) -> (u32, u32, Vec<u32>, u64) {
    let mut uid = 0;
    let mut gid = 0;
    let mut groups = Vec::new();
    let mut cap_effective = 0u64;
    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("Uid:") {
            uid = rest.split_whitespace().next().and_then(|s| s.parse().ok()).unwrap_or(0);
        } else if let Some(rest) = line.strip_prefix("Gid:") {
            gid = rest.split_whitespace().next().and_then(|s| s.parse().ok()).unwrap_or(0);
        } else if let Some(rest) = line.strip_prefix("Groups:") {
            groups = rest
                .split_whitespace()
                .filter_map(|s| s.parse().ok())
                .collect();
        } else if let Some(rest) = line.strip_prefix("CapEff:") {
            cap_effective = u64::from_str_radix(rest.trim(), 16).unwrap_or(0);
        }
    }
    (uid, gid, groups, cap_effective)
}

use std::io::Read;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ionode::RealIoBackend;
    use std::fs;
    use std::os::unix::fs::symlink;

    fn write_status(dir: &Path, pid: i32, uid: u32, gid: u32) {
        let proc_dir = dir.join(format!("proc/{pid}"));
        fs::create_dir_all(&proc_dir).unwrap();
        fs::write(
            proc_dir.join("status"),
            format!("Uid:\t{uid}\t{uid}\t{uid}\t{uid}\nGid:\t{gid}\t{gid}\t{gid}\t{gid}\nGroups:\t\nCapEff:\t0000000000000000\n"),
        )
        .unwrap();
        symlink("/", proc_dir.join("root")).unwrap();
        symlink("/", proc_dir.join("cwd")).unwrap();
        let ns_dir = proc_dir.join("ns");
        fs::create_dir_all(&ns_dir).unwrap();
        for ns in NS_NAMES {
            fs::write(ns_dir.join(ns), b"").unwrap();
        }
    }

    #[test]
    fn namespace_inodes_collects_all_seven_entries() {
        let dir = tempfile::tempdir().unwrap();
        write_status(dir.path(), 42, 0, 0);
        let backend = RealIoBackend::new(dir.path().to_path_buf());
        let inspector = ProcessInspector::new(&backend);
        let inodes = inspector.namespace_inodes(42).unwrap();
        assert_eq!(inodes.len(), NS_NAMES.len());
    }

    #[test]
    fn snapshot_reads_uid_gid_from_status() {
        let dir = tempfile::tempdir().unwrap();
        write_status(dir.path(), 7, 1000, 1000);
        let backend = RealIoBackend::new(dir.path().to_path_buf());
        let inspector = ProcessInspector::new(&backend);
        let snap = inspector.snapshot(7).unwrap();
        assert_eq!(snap.uid, 1000);
        assert_eq!(snap.gid, 1000);
    }

    #[test]
    fn path_access_rejects_traversal_above_root() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("real-root/etc")).unwrap();
        fs::write(dir.path().join("real-root/etc/hosts"), b"localhost").unwrap();

        let backend = RealIoBackend::new(dir.path().to_path_buf());
        let inspector = ProcessInspector::new(&backend);
        let snapshot = ProcessSnapshot {
            pid: 1,
            uid: 0,
            gid: 0,
            groups: vec![],
            cap_effective: 0,
            root: PathBuf::from("/real-root"),
            cwd: PathBuf::from("/real-root"),
            ns_inodes: HashMap::new(),
        };
        let resolved = inspector
            .path_access(
                &snapshot,
                Path::new("/../../etc/hosts"),
                AccessMode::Read,
                true,
            )
            .unwrap();
        assert_eq!(resolved, PathBuf::from("/real-root/etc/hosts"));
    }

    #[test]
    fn path_access_missing_component_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("real-root")).unwrap();
        let backend = RealIoBackend::new(dir.path().to_path_buf());
        let inspector = ProcessInspector::new(&backend);
        let snapshot = ProcessSnapshot {
            pid: 1,
            uid: 0,
            gid: 0,
            groups: vec![],
            cap_effective: 0,
            root: PathBuf::from("/real-root"),
            cwd: PathBuf::from("/real-root"),
            ns_inodes: HashMap::new(),
        };
        let err = inspector
            .path_access(&snapshot, Path::new("/missing"), AccessMode::Read, true)
            .unwrap_err();
        assert!(matches!(err, ProcessError::NotFound(_)));
    }
}
