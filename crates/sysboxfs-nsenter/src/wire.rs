//! The tagged-union request/response messages exchanged between the broker
//! and the helper process it forks into a container's namespaces.
//!
//! Wire format: a `u64` little-endian length prefix followed by that many
//! bytes of `serde_json`. This is the same framing the request/response
//! messages between the daemon's own worker threads use (see
//! [`crate::channel`]), just with a different payload type.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// One of the seven namespace kinds a container process may be joined into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Namespace {
    Mount,
    Pid,
    Net,
    User,
    Uts,
    Ipc,
    Cgroup,
}

impl Namespace {
    /// Fixed iteration order used whenever namespaces must be entered
    /// together: user first (so the other namespaces are interpreted in the
    /// uid-mapped context), pid and the rest after, mount last so open file
    /// descriptors from the old mount namespace remain valid while setting
    /// up the new one.
    pub const ORDERED: &'static [Namespace] = &[
        Namespace::User,
        Namespace::Pid,
        Namespace::Net,
        Namespace::Uts,
        Namespace::Ipc,
        Namespace::Cgroup,
        Namespace::Mount,
    ];

    pub fn proc_ns_file(self) -> &'static str {
        match self {
            Namespace::Mount => "mnt",
            Namespace::Pid => "pid",
            Namespace::Net => "net",
            Namespace::User => "user",
            Namespace::Uts => "uts",
            Namespace::Ipc => "ipc",
            Namespace::Cgroup => "cgroup",
        }
    }
}

/// Request payload sent to the helper once it has entered the target
/// namespaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NsRequest {
    Lookup {
        path: PathBuf,
    },
    ReadFile {
        path: PathBuf,
        offset: u64,
        len: usize,
    },
    WriteFile {
        path: PathBuf,
        offset: u64,
        data: Vec<u8>,
    },
    ReadDir {
        path: PathBuf,
    },
    GetAttr {
        path: PathBuf,
    },
    MountSyscall {
        source: Option<PathBuf>,
        target: PathBuf,
        fstype: Option<String>,
        flags: u64,
        data: Option<String>,
    },
    UmountSyscall {
        target: PathBuf,
        flags: i32,
    },
    ChownSyscall {
        path: PathBuf,
        uid: Option<u32>,
        gid: Option<u32>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirEntryWire {
    pub name: String,
    pub is_dir: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttrWire {
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub is_dir: bool,
}

/// Response payload returned by the helper. `Error` carries a negative
/// errno so callers never need to guess what went wrong; an unrecognized
/// request tag always produces `Error`, never a panic, per the broker's
/// contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NsResponse {
    Lookup(AttrWire),
    Data(Vec<u8>),
    Written(usize),
    Entries(Vec<DirEntryWire>),
    Attr(AttrWire),
    Ok,
    Error { errno: i32, message: String },
}

/// One nsenter event: the broker's view of a single helper round-trip.
#[derive(Debug, Clone)]
pub struct NsEvent {
    pub target_pid: i32,
    pub namespaces: Vec<Namespace>,
    pub request: NsRequest,
    /// Fire-and-forget events are still reaped, but the caller does not
    /// block waiting for `NsResponse`.
    pub async_event: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_order_is_user_first_mount_last() {
        assert_eq!(Namespace::ORDERED.first(), Some(&Namespace::User));
        assert_eq!(Namespace::ORDERED.last(), Some(&Namespace::Mount));
    }

    #[test]
    fn request_round_trips_through_json() {
        let req = NsRequest::WriteFile {
            path: PathBuf::from("/proc/sys/kernel/panic"),
            offset: 0,
            data: b"2".to_vec(),
        };
        let encoded = serde_json::to_vec(&req).unwrap();
        let decoded: NsRequest = serde_json::from_slice(&encoded).unwrap();
        match decoded {
            NsRequest::WriteFile { data, .. } => assert_eq!(data, b"2"),
            other => panic!("unexpected decode: {other:?}"),
        }
    }
}
