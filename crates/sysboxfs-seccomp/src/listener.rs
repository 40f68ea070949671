//! Receives a seccomp-notify listener fd from the external runtime.
//!
//! The runtime's own seccomp-listener handoff connects to a rendezvous
//! unix-domain socket and sends the container's state plus the listener fd
//! in a single `sendmsg` carrying an `SCM_RIGHTS` control message; this is
//! the receiving half of that same protocol.

use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::path::{Path, PathBuf};

use nix::sys::socket::{
    self, ControlMessageOwned, MsgFlags, RecvMsg, SockFlag, SockType, UnixAddr,
};
use nix::unistd;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SeccompError};

const MAX_PAYLOAD: usize = 4096;

/// The JSON payload accompanying the handed-off fd. Only the fields this
/// engine needs to correlate the fd with a managed container are carried;
/// the runtime's own container state is a superset this daemon ignores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffMessage {
    pub container_id: String,
}

/// Binds `rendezvous_path`, accepts exactly one connection, and returns the
/// decoded handoff message plus the listener fd carried alongside it.
pub fn receive_listener_fd(rendezvous_path: &Path) -> Result<(HandoffMessage, OwnedFd)> {
    let _ = std::fs::remove_file(rendezvous_path);
    let listen_fd = socket::socket(
        socket::AddressFamily::Unix,
        SockType::Stream,
        SockFlag::empty(),
        None,
    )
    .map_err(SeccompError::Kernel)?;
    let addr = UnixAddr::new(rendezvous_path).map_err(|e| {
        SeccompError::RendezvousUnavailable(
            rendezvous_path.to_owned(),
            std::io::Error::from_raw_os_error(e as i32),
        )
    })?;
    socket::bind(listen_fd.as_raw_fd(), &addr).map_err(SeccompError::Kernel)?;
    socket::listen(&listen_fd, socket::Backlog::new(1).unwrap()).map_err(SeccompError::Kernel)?;

    let conn_fd = socket::accept(listen_fd.as_raw_fd()).map_err(SeccompError::Kernel)?;
    drop(listen_fd);

    let mut buf = vec![0u8; MAX_PAYLOAD];
    let mut cmsg_buf = nix::cmsg_space!([std::os::fd::RawFd; 1]);
    let mut iov = [std::io::IoSliceMut::new(&mut buf)];
    let msg: RecvMsg<UnixAddr> =
        socket::recvmsg(conn_fd, &mut iov, Some(&mut cmsg_buf), MsgFlags::empty())
            .map_err(SeccompError::Kernel)?;

    let mut received_fd = None;
    for cmsg in msg.cmsgs() {
        if let ControlMessageOwned::ScmRights(fds) = cmsg {
            received_fd = fds.into_iter().next();
        }
    }
    let payload_len = msg.bytes;
    let _ = unistd::close(conn_fd);

    let fd = received_fd.ok_or(SeccompError::MissingFd)?;
    let handoff: HandoffMessage =
        serde_json::from_slice(&buf[..payload_len]).map_err(SeccompError::DecodeHandoff)?;
    Ok((handoff, unsafe { OwnedFd::from_raw_fd(fd) }))
}

#[allow(dead_code)]
fn rendezvous_path_for(container_id: &str) -> PathBuf {
    PathBuf::from(format!("/run/sysboxfs/seccomp-{container_id}.sock"))
}
