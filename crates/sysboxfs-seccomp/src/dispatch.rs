//! Evaluates mount-family syscalls intercepted by seccomp-notify and turns
//! accepted ones into nsenter broker events.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use sysboxfs_core::ionode::IoBackend;
use sysboxfs_core::Directory;
use sysboxfs_nsenter::{Broker, Namespace, NsEvent, NsRequest, NsResponse};

use crate::error::{Result, SeccompError};
use crate::mem::MemReader;
use crate::notify::{NotifyRequest, NotifyResponse, NotifySource};

/// `fstype` values this daemon is willing to emulate inside a container's
/// mount namespace.
pub const EMULATED_FSTYPES: &[&str] = &["proc", "sysfs", "overlay"];

/// Path prefixes under which a `chown`/`fchownat` always succeeds as a
/// no-op: the emulated value has no real owner to change.
const EMULATED_CHOWN_PREFIXES: &[&str] = &["/proc/sys", "/proc/swaps"];

const MS_REMOUNT: u64 = 32;

#[derive(Debug, Clone)]
pub struct MountArgs {
    pub source: Option<String>,
    pub target: String,
    pub fstype: Option<String>,
    pub flags: u64,
    pub data: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyscallDecision {
    EmulateMount(MountArgs),
    EmulateUnmount { target: String },
    EmulateChownNoop,
    Continue,
}

impl PartialEq for MountArgs {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
            && self.target == other.target
            && self.fstype == other.fstype
            && self.flags == other.flags
            && self.data == other.data
    }
}
impl Eq for MountArgs {}

/// Classifies a `mount` call by fstype and target shape. The target is
/// always interpreted inside the caller's own mount namespace — by the
/// time this notification fires, the container is already confined to its
/// namespace view, so a relative-looking target can resolve only within
/// it, never onto the host filesystem. A non-absolute target is left to
/// the kernel, since this daemon only emulates mounts onto well-known
/// absolute paths.
pub fn evaluate_mount(args: &MountArgs) -> SyscallDecision {
    let Some(fstype) = args.fstype.as_deref() else {
        return SyscallDecision::Continue;
    };
    if !EMULATED_FSTYPES.contains(&fstype) {
        return SyscallDecision::Continue;
    }
    if !Path::new(&args.target).is_absolute() {
        return SyscallDecision::Continue;
    }
    // A remount carries no new fstype/source semantics of its own; the
    // fstype/target checks above already re-validate it the same way a
    // fresh mount would be, so no further branching is needed here.
    let _ = args.flags & MS_REMOUNT;
    SyscallDecision::EmulateMount(args.clone())
}

pub fn evaluate_umount(target: &str, managed_mounts: &HashSet<PathBuf>) -> SyscallDecision {
    if managed_mounts.contains(Path::new(target)) {
        SyscallDecision::EmulateUnmount {
            target: target.to_string(),
        }
    } else {
        SyscallDecision::Continue
    }
}

pub fn evaluate_chown(path: &str) -> SyscallDecision {
    if EMULATED_CHOWN_PREFIXES.iter().any(|p| path.starts_with(p)) {
        SyscallDecision::EmulateChownNoop
    } else {
        SyscallDecision::Continue
    }
}

/// Drives one listener fd: receives notifications, resolves the caller to
/// a container, evaluates the syscall, and responds. Holds the mounts it
/// has itself created so a later `umount2` on the same target is
/// recognized as one of ours.
pub struct Engine {
    directory: Arc<Directory>,
    broker: Arc<Broker>,
    host_pid_ns_inode: u64,
    mem: Arc<dyn MemReader>,
    managed_mounts: Mutex<HashSet<PathBuf>>,
}

impl Engine {
    pub fn new(
        directory: Arc<Directory>,
        broker: Arc<Broker>,
        host_pid_ns_inode: u64,
        mem: Arc<dyn MemReader>,
    ) -> Self {
        Self {
            directory,
            broker,
            host_pid_ns_inode,
            mem,
            managed_mounts: Mutex::new(HashSet::new()),
        }
    }

    /// Services exactly one notification off `source`. Returns `Ok(())`
    /// whether or not a response was sent to the kernel; a stale cookie is
    /// not an error, it just means nothing needs to be answered.
    pub fn handle_one(&self, source: &dyn NotifySource, backend: &dyn IoBackend) -> Result<()> {
        let req = source.receive()?;
        if source.id_valid(req.id).is_err() {
            return Ok(());
        }

        let container = self
            .directory
            .lookup_by_pid(backend, req.pid as i32, self.host_pid_ns_inode)
            .map_err(sysboxfs_core::HandlerErrorKind::from)?;
        let Some(container) = container else {
            return self.respond_best_effort(source, NotifyResponse::allow(req.id));
        };

        let outcome = match req.syscall.as_str() {
            "mount" => self.handle_mount(source, &req, &container),
            "umount2" => self.handle_umount(source, &req),
            "chown" | "fchownat" => self.handle_chown(source, &req),
            _ => Ok(NotifyResponse::allow(req.id)),
        };
        // A cookie that goes stale between the first check above and the
        // re-check inside the handler is the same benign race as a cookie
        // that was already stale on receipt: skip, don't answer, don't
        // fail the worker loop.
        let response = match outcome {
            Ok(response) => response,
            Err(SeccompError::StaleNotification(_)) => return Ok(()),
            Err(e) => return Err(e),
        };
        self.respond_best_effort(source, response)
    }

    fn handle_mount(
        &self,
        source: &dyn NotifySource,
        req: &NotifyRequest,
        container: &sysboxfs_core::ContainerRecord,
    ) -> Result<NotifyResponse> {
        let args = MountArgs {
            source: non_empty(self.mem.read_cstring(req.pid as i32, req.args[0])?),
            target: self.mem.read_cstring(req.pid as i32, req.args[1])?,
            fstype: non_empty(self.mem.read_cstring(req.pid as i32, req.args[2])?),
            flags: req.args[3],
            data: non_empty(self.mem.read_cstring(req.pid as i32, req.args[4])?),
        };

        // TOCTOU re-check: the caller could have rewritten the pointed-to
        // bytes between the first read and now.
        if source.id_valid(req.id).is_err() {
            return Err(SeccompError::StaleNotification(req.id));
        }

        let target_pid = container.init_pid.unwrap_or(req.pid as i32);
        match evaluate_mount(&args) {
            SyscallDecision::EmulateMount(args) => {
                let event = NsEvent {
                    target_pid,
                    namespaces: vec![Namespace::User, Namespace::Mount],
                    request: NsRequest::MountSyscall {
                        source: args.source.map(PathBuf::from),
                        target: PathBuf::from(&args.target),
                        fstype: args.fstype,
                        flags: args.flags,
                        data: args.data,
                    },
                    async_event: false,
                };
                let outcome = self.broker.dispatch(event);
                match outcome {
                    Ok(NsResponse::Ok) => {
                        self.managed_mounts
                            .lock()
                            .unwrap()
                            .insert(PathBuf::from(&args.target));
                        Ok(NotifyResponse::success(req.id, 0))
                    }
                    Ok(NsResponse::Error { errno, .. }) => Ok(NotifyResponse::fail(req.id, errno)),
                    Ok(_) => Ok(NotifyResponse::fail(req.id, libc::EIO)),
                    Err(_) => Ok(NotifyResponse::fail(req.id, libc::EIO)),
                }
            }
            _ => Ok(NotifyResponse::allow(req.id)),
        }
    }

    fn handle_umount(
        &self,
        source: &dyn NotifySource,
        req: &NotifyRequest,
    ) -> Result<NotifyResponse> {
        let target = self.mem.read_cstring(req.pid as i32, req.args[0])?;
        if source.id_valid(req.id).is_err() {
            return Err(SeccompError::StaleNotification(req.id));
        }

        let managed = self.managed_mounts.lock().unwrap().clone();
        match evaluate_umount(&target, &managed) {
            SyscallDecision::EmulateUnmount { target } => {
                let event = NsEvent {
                    target_pid: req.pid as i32,
                    namespaces: vec![Namespace::User, Namespace::Mount],
                    request: NsRequest::UmountSyscall {
                        target: PathBuf::from(&target),
                        flags: req.args[1] as i32,
                    },
                    async_event: false,
                };
                match self.broker.dispatch(event) {
                    Ok(NsResponse::Ok) => {
                        self.managed_mounts
                            .lock()
                            .unwrap()
                            .remove(Path::new(&target));
                        Ok(NotifyResponse::success(req.id, 0))
                    }
                    Ok(NsResponse::Error { errno, .. }) => Ok(NotifyResponse::fail(req.id, errno)),
                    _ => Ok(NotifyResponse::fail(req.id, libc::EIO)),
                }
            }
            _ => Ok(NotifyResponse::allow(req.id)),
        }
    }

    fn handle_chown(
        &self,
        source: &dyn NotifySource,
        req: &NotifyRequest,
    ) -> Result<NotifyResponse> {
        let path_arg_index = if req.syscall == "fchownat" { 1 } else { 0 };
        let path = self
            .mem
            .read_cstring(req.pid as i32, req.args[path_arg_index])?;
        if source.id_valid(req.id).is_err() {
            return Err(SeccompError::StaleNotification(req.id));
        }
        match evaluate_chown(&path) {
            SyscallDecision::EmulateChownNoop => Ok(NotifyResponse::success(req.id, 0)),
            _ => Ok(NotifyResponse::allow(req.id)),
        }
    }

    /// A stale or already-answered notification fails `respond`; that is
    /// expected once the caller has moved on, never a reason to propagate
    /// an error out of the dispatch loop.
    fn respond_best_effort(
        &self,
        source: &dyn NotifySource,
        response: NotifyResponse,
    ) -> Result<()> {
        if let Err(e) = source.respond(response) {
            tracing::debug!(?e, "seccomp response delivery failed, caller likely gone");
        }
        Ok(())
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::FakeMemReader;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use sysboxfs_core::container::RegisterRequest;
    use sysboxfs_core::ionode::RealIoBackend;

    /// A notification whose cookie is valid when first checked (on
    /// receipt) but has gone stale by the time a handler re-checks it
    /// immediately before trusting the memory it read — the race the
    /// second `id_valid` call exists to catch.
    struct GoesStaleAfterFirstCheck {
        id_valid_calls: AtomicUsize,
        responded: std::sync::Mutex<Option<NotifyResponse>>,
    }

    impl NotifySource for GoesStaleAfterFirstCheck {
        fn receive(&self) -> Result<NotifyRequest> {
            Ok(NotifyRequest {
                id: 1,
                pid: 4242,
                syscall: "chown".into(),
                args: [9, 0, 0, 0, 0, 0],
            })
        }

        fn id_valid(&self, id: u64) -> Result<()> {
            if self.id_valid_calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(())
            } else {
                Err(SeccompError::StaleNotification(id))
            }
        }

        fn respond(&self, response: NotifyResponse) -> Result<()> {
            *self.responded.lock().unwrap() = Some(response);
            Ok(())
        }
    }

    fn fixture_with_pid(root: &std::path::Path, pid: i32) {
        let ns_dir = root.join(format!("proc/{pid}/ns"));
        std::fs::create_dir_all(&ns_dir).unwrap();
        for ns in ["pid", "net", "user", "uts", "ipc", "mnt", "cgroup"] {
            std::fs::write(ns_dir.join(ns), []).unwrap();
        }
    }

    #[test]
    fn handle_one_skips_silently_when_cookie_goes_stale_before_the_recheck() {
        let dir = tempfile::tempdir().unwrap();
        fixture_with_pid(dir.path(), 4242);
        let backend = RealIoBackend::new(dir.path().to_path_buf());

        let directory = Arc::new(Directory::new());
        directory.pre_register("c1".into(), chrono::Utc::now()).unwrap();
        directory
            .register(
                &backend,
                RegisterRequest {
                    id: "c1".into(),
                    init_pid: 4242,
                    ctime: chrono::Utc::now(),
                    uid_map: vec![],
                    gid_map: vec![],
                    ro_paths: vec![],
                    masked_paths: vec![],
                },
            )
            .unwrap();

        let mem = Arc::new(FakeMemReader {
            strings: [(9, "/proc/sys/kernel/panic".to_string())].into(),
        });
        let engine = Engine::new(directory, Arc::new(Broker::new(std::time::Duration::from_secs(5)).unwrap()), 0, mem);

        let source = GoesStaleAfterFirstCheck {
            id_valid_calls: AtomicUsize::new(0),
            responded: std::sync::Mutex::new(None),
        };

        let result = engine.handle_one(&source, &backend);
        assert!(result.is_ok());
        assert!(
            source.responded.lock().unwrap().is_none(),
            "a notification that went stale before the recheck must not be answered"
        );
    }

    #[test]
    fn evaluate_mount_accepts_proc_onto_absolute_target() {
        let args = MountArgs {
            source: Some("proc".into()),
            target: "/proc".into(),
            fstype: Some("proc".into()),
            flags: 0,
            data: None,
        };
        let decision = evaluate_mount(&args);
        assert_eq!(decision, SyscallDecision::EmulateMount(args));
    }

    #[test]
    fn evaluate_mount_continues_for_unemulated_fstype() {
        let args = MountArgs {
            source: Some("/dev/sda1".into()),
            target: "/mnt".into(),
            fstype: Some("ext4".into()),
            flags: 0,
            data: None,
        };
        let decision = evaluate_mount(&args);
        assert_eq!(decision, SyscallDecision::Continue);
    }

    #[test]
    fn evaluate_mount_continues_for_relative_target() {
        let args = MountArgs {
            source: Some("proc".into()),
            target: "proc".into(),
            fstype: Some("proc".into()),
            flags: 0,
            data: None,
        };
        let decision = evaluate_mount(&args);
        assert_eq!(decision, SyscallDecision::Continue);
    }

    #[test]
    fn evaluate_umount_matches_only_managed_targets() {
        let mut managed = HashSet::new();
        managed.insert(PathBuf::from("/proc"));
        assert_eq!(
            evaluate_umount("/proc", &managed),
            SyscallDecision::EmulateUnmount {
                target: "/proc".into()
            }
        );
        assert_eq!(evaluate_umount("/mnt/data", &managed), SyscallDecision::Continue);
    }

    #[test]
    fn evaluate_chown_is_noop_under_proc_sys() {
        assert_eq!(
            evaluate_chown("/proc/sys/kernel/panic"),
            SyscallDecision::EmulateChownNoop
        );
        assert_eq!(evaluate_chown("/etc/passwd"), SyscallDecision::Continue);
    }
}
