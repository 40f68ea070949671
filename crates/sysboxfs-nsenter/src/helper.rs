//! The grandchild side of an nsenter event: joins the requested namespaces
//! of a target pid and then executes exactly one [`NsRequest`], writing
//! back exactly one [`NsResponse`]. This runs in the re-exec'd
//! `sysboxfs nsenter` helper process (see the `sysboxfs` binary crate),
//! never in the multi-threaded daemon itself — entering namespaces from a
//! thread of a multi-threaded process is unsupported by the kernel.

use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use nix::fcntl::{self, OFlag};
use nix::sched::{setns, CloneFlags};
use nix::sys::stat::Mode;
use nix::unistd;

use crate::error::{NsenterError, Result};
use crate::wire::{AttrWire, DirEntryWire, Namespace, NsRequest, NsResponse};

fn clone_flag(ns: Namespace) -> CloneFlags {
    match ns {
        Namespace::Mount => CloneFlags::CLONE_NEWNS,
        Namespace::Pid => CloneFlags::CLONE_NEWPID,
        Namespace::Net => CloneFlags::CLONE_NEWNET,
        Namespace::User => CloneFlags::CLONE_NEWUSER,
        Namespace::Uts => CloneFlags::CLONE_NEWUTS,
        Namespace::Ipc => CloneFlags::CLONE_NEWIPC,
        Namespace::Cgroup => CloneFlags::CLONE_NEWCGROUP,
    }
}

/// Joins `target_pid`'s namespaces, in [`Namespace::ORDERED`] order
/// restricted to `requested`. Joining pid-namespace only affects children
/// forked after the call, which is why the request itself still runs in
/// this same process rather than in a further fork: for pid-ns the only
/// observable effect we need is that `/proc` reads resolve against the
/// target's pid-ns view, which mount-namespace entry already provides via
/// the container's private `/proc` mount.
pub fn enter_namespaces(target_pid: i32, requested: &[Namespace]) -> Result<()> {
    for ns in Namespace::ORDERED {
        if !requested.contains(ns) {
            continue;
        }
        let ns_path = PathBuf::from(format!(
            "/proc/{}/ns/{}",
            target_pid,
            ns.proc_ns_file()
        ));
        let fd = fcntl::open(&ns_path, OFlag::O_RDONLY, Mode::empty())
            .map_err(|e| NsenterError::EnterNamespace(*ns, target_pid, e))?;
        let result = setns(unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) }, clone_flag(*ns));
        let _ = unistd::close(fd);
        result.map_err(|e| NsenterError::EnterNamespace(*ns, target_pid, e))?;
    }
    Ok(())
}

fn attr_of(path: &Path) -> std::io::Result<AttrWire> {
    let meta = fs::symlink_metadata(path)?;
    Ok(AttrWire {
        mode: meta.permissions().mode(),
        uid: meta.uid(),
        gid: meta.gid(),
        size: meta.size(),
        is_dir: meta.is_dir(),
    })
}

fn to_errno_response(err: &std::io::Error) -> NsResponse {
    NsResponse::Error {
        errno: err.raw_os_error().unwrap_or(libc::EIO),
        message: err.to_string(),
    }
}

/// Executes one request against the namespaces already entered by the
/// caller. Every branch converts its own I/O error into an `Error`
/// response rather than propagating it, per the broker's "never surfaces
/// errors as panics" contract; the only `Result::Err` this function itself
/// returns is for malformed requests it cannot make sense of at all.
pub fn execute(request: &NsRequest) -> NsResponse {
    match request {
        NsRequest::Lookup { path } => match attr_of(path) {
            Ok(attr) => NsResponse::Lookup(attr),
            Err(e) => to_errno_response(&e),
        },
        NsRequest::GetAttr { path } => match attr_of(path) {
            Ok(attr) => NsResponse::Attr(attr),
            Err(e) => to_errno_response(&e),
        },
        NsRequest::ReadFile { path, offset, len } => {
            let result = (|| -> std::io::Result<Vec<u8>> {
                let mut f = fs::File::open(path)?;
                f.seek(SeekFrom::Start(*offset))?;
                let mut buf = vec![0u8; *len];
                let n = f.read(&mut buf)?;
                buf.truncate(n);
                Ok(buf)
            })();
            match result {
                Ok(data) => NsResponse::Data(data),
                Err(e) => to_errno_response(&e),
            }
        }
        NsRequest::WriteFile { path, offset, data } => {
            let result = (|| -> std::io::Result<usize> {
                let mut f = OpenOptions::new().write(true).open(path)?;
                f.seek(SeekFrom::Start(*offset))?;
                f.write(data)
            })();
            match result {
                Ok(n) => NsResponse::Written(n),
                Err(e) => to_errno_response(&e),
            }
        }
        NsRequest::ReadDir { path } => {
            let result = (|| -> std::io::Result<Vec<DirEntryWire>> {
                let mut out = Vec::new();
                for entry in fs::read_dir(path)? {
                    let entry = entry?;
                    out.push(DirEntryWire {
                        name: entry.file_name().to_string_lossy().into_owned(),
                        is_dir: entry.file_type()?.is_dir(),
                    });
                }
                Ok(out)
            })();
            match result {
                Ok(entries) => NsResponse::Entries(entries),
                Err(e) => to_errno_response(&e),
            }
        }
        NsRequest::MountSyscall {
            source,
            target,
            fstype,
            flags,
            data,
        } => {
            let flags = nix::mount::MsFlags::from_bits_truncate(*flags);
            let result = nix::mount::mount(
                source.as_deref(),
                target.as_path(),
                fstype.as_deref(),
                flags,
                data.as_deref(),
            );
            match result {
                Ok(()) => NsResponse::Ok,
                Err(e) => NsResponse::Error {
                    errno: e as i32,
                    message: e.to_string(),
                },
            }
        }
        NsRequest::UmountSyscall { target, flags } => {
            use nix::mount::MntFlags;
            let flags = MntFlags::from_bits_truncate(*flags);
            match nix::mount::umount2(target.as_path(), flags) {
                Ok(()) => NsResponse::Ok,
                Err(e) => NsResponse::Error {
                    errno: e as i32,
                    message: e.to_string(),
                },
            }
        }
        NsRequest::ChownSyscall { path, uid, gid } => {
            let uid = uid.map(unistd::Uid::from_raw);
            let gid = gid.map(unistd::Gid::from_raw);
            match unistd::chown(path.as_path(), uid, gid) {
                Ok(()) => NsResponse::Ok,
                Err(e) => NsResponse::Error {
                    errno: e as i32,
                    message: e.to_string(),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write as _;

    #[test]
    fn read_file_returns_requested_slice() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("value");
        File::create(&path).unwrap().write_all(b"hello").unwrap();

        let resp = execute(&NsRequest::ReadFile {
            path: path.clone(),
            offset: 1,
            len: 3,
        });
        match resp {
            NsResponse::Data(d) => assert_eq!(d, b"ell"),
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[test]
    fn read_file_missing_path_is_errno_response_not_panic() {
        let resp = execute(&NsRequest::ReadFile {
            path: PathBuf::from("/does/not/exist"),
            offset: 0,
            len: 8,
        });
        match resp {
            NsResponse::Error { errno, .. } => assert_eq!(errno, libc::ENOENT),
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[test]
    fn readdir_lists_entries() {
        let dir = tempfile::tempdir().unwrap();
        File::create(dir.path().join("a")).unwrap();
        std::fs::create_dir(dir.path().join("b")).unwrap();

        let resp = execute(&NsRequest::ReadDir {
            path: dir.path().to_path_buf(),
        });
        match resp {
            NsResponse::Entries(mut entries) => {
                entries.sort_by(|a, b| a.name.cmp(&b.name));
                assert_eq!(entries.len(), 2);
                assert_eq!(entries[0].name, "a");
                assert!(!entries[0].is_dir);
                assert_eq!(entries[1].name, "b");
                assert!(entries[1].is_dir);
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }
}
