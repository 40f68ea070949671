//! A length-prefixed, `serde_json`-framed channel over a unix socketpair,
//! optionally carrying file descriptors via `SCM_RIGHTS`.
//!
//! This is the transport the broker uses to talk to the helper process it
//! forks for each nsenter event, and the transport the seccomp engine uses
//! to hand a received listener fd onward. Two peers each hold one end;
//! whichever end is dropped first closes its half of the socketpair, which
//! is how a helper death is observed as a broken-channel error rather than
//! a hang.

use std::io::{IoSlice, IoSliceMut};
use std::marker::PhantomData;
use std::os::fd::{FromRawFd, OwnedFd};
use std::os::unix::prelude::{AsRawFd, RawFd};

use nix::sys::socket::{self, UnixAddr};
use nix::unistd;
use serde::{Deserialize, Serialize};

use crate::error::ChannelError;

type Result<T> = std::result::Result<T, ChannelError>;

/// Holds its end of the socketpair as an [`OwnedFd`], so a `Sender` dropped
/// without being used (e.g. the parent's copy of a closure that only ever
/// runs in the forked child) still closes its fd exactly once, instead of
/// relying on every caller to remember an explicit `close()`.
pub struct Sender<T> {
    fd: OwnedFd,
    phantom: PhantomData<T>,
}

pub struct Receiver<T> {
    fd: OwnedFd,
    phantom: PhantomData<T>,
}

/// Creates a connected `(Sender, Receiver)` pair backed by a
/// `SOCK_SEQPACKET` socketpair, matching message boundaries 1:1 with
/// `send`/`recv` calls.
pub fn pair<T>() -> Result<(Sender<T>, Receiver<T>)>
where
    T: for<'de> Deserialize<'de> + Serialize,
{
    let (a, b) = socket::socketpair(
        socket::AddressFamily::Unix,
        socket::SockType::SeqPacket,
        None,
        socket::SockFlag::SOCK_CLOEXEC,
    )?;
    Ok((
        Sender {
            fd: a,
            phantom: PhantomData,
        },
        Receiver {
            fd: b,
            phantom: PhantomData,
        },
    ))
}

impl<T> Sender<T> {
    /// Duplicates the underlying fd so both the forking process and its
    /// child can hold an independent `Sender` after `fork()`, where a
    /// plain move would only be usable by one of the two closures.
    pub fn try_clone(&self) -> Result<Self> {
        let new_fd = unistd::dup(self.fd.as_raw_fd())?;
        Ok(Self {
            fd: unsafe { OwnedFd::from_raw_fd(new_fd) },
            phantom: PhantomData,
        })
    }
}

impl<T> Sender<T>
where
    T: Serialize,
{
    fn send_raw(&mut self, payload: &[u8], fds: Option<&[RawFd]>) -> Result<()> {
        let len = payload.len() as u64;
        let cmsgs = if let Some(fds) = fds {
            vec![socket::ControlMessage::ScmRights(fds)]
        } else {
            vec![]
        };
        let iov = [
            IoSlice::new(unsafe {
                std::slice::from_raw_parts(
                    (&len as *const u64) as *const u8,
                    std::mem::size_of::<u64>(),
                )
            }),
            IoSlice::new(payload),
        ];
        socket::sendmsg::<UnixAddr>(
            self.fd.as_raw_fd(),
            &iov,
            &cmsgs,
            socket::MsgFlags::empty(),
            None,
        )?;
        Ok(())
    }

    pub fn send(&mut self, message: &T) -> Result<()> {
        let payload = serde_json::to_vec(message)?;
        self.send_raw(&payload, None)
    }

    pub fn send_with_fds(&mut self, message: &T, fds: &[RawFd]) -> Result<()> {
        let payload = serde_json::to_vec(message)?;
        self.send_raw(&payload, Some(fds))
    }

    /// Closes this end early. Equivalent to `drop(sender)`; kept as a named
    /// method because closing the parent's copy of a forked-away sender at
    /// a specific point in `dispatch` (rather than wherever it happens to
    /// go out of scope) is part of the protocol, not an afterthought.
    pub fn close(self) {
        drop(self)
    }
}

impl<T> Receiver<T> {
    pub fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl<T> Receiver<T>
where
    T: serde::de::DeserializeOwned,
{
    fn recv_raw<F>(&mut self) -> Result<(Vec<u8>, Option<F>)>
    where
        F: Default + AsMut<[RawFd]>,
    {
        let mut len: u64 = 0;
        let mut buf = vec![0u8; 64 * 1024];
        let mut cmsgspace = nix::cmsg_space!(F);
        let (bytes, fds) = {
            let mut iov = [
                IoSliceMut::new(unsafe {
                    std::slice::from_raw_parts_mut(
                        (&mut len as *mut u64) as *mut u8,
                        std::mem::size_of::<u64>(),
                    )
                }),
                IoSliceMut::new(&mut buf),
            ];
            let msg = socket::recvmsg::<UnixAddr>(
                self.fd.as_raw_fd(),
                &mut iov,
                Some(&mut cmsgspace),
                socket::MsgFlags::MSG_CMSG_CLOEXEC,
            )?;
            let fds: Option<F> = msg
                .cmsgs()
                .find_map(|cmsg| match cmsg {
                    socket::ControlMessageOwned::ScmRights(fds) => Some(fds),
                    _ => None,
                })
                .map(|fds| {
                    let mut out: F = Default::default();
                    <F as AsMut<[RawFd]>>::as_mut(&mut out).clone_from_slice(&fds);
                    out
                });
            (msg.bytes, fds)
        };

        if bytes == 0 {
            return Err(ChannelError::ConnectionBroken);
        }
        buf.truncate(bytes.saturating_sub(std::mem::size_of::<u64>()));
        Ok((buf, fds))
    }

    pub fn recv(&mut self) -> Result<T> {
        let (buf, _fds) = self.recv_raw::<[RawFd; 0]>()?;
        Ok(serde_json::from_slice(&buf)?)
    }

    pub fn recv_with_fds<F>(&mut self) -> Result<(T, Option<F>)>
    where
        F: Default + AsMut<[RawFd]>,
    {
        let (buf, fds) = self.recv_raw::<F>()?;
        Ok((serde_json::from_slice(&buf)?, fds))
    }

    /// Closes this end early; see [`Sender::close`].
    pub fn close(self) {
        drop(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::wait;
    use serial_test::serial;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    enum Msg {
        Ping,
        Pong(i32),
    }

    #[test]
    #[serial]
    fn round_trips_a_message_across_a_fork() -> Result<()> {
        let (mut tx, mut rx) = pair::<Msg>()?;
        match unsafe { unistd::fork() }.unwrap() {
            unistd::ForkResult::Parent { child } => {
                tx.send(&Msg::Pong(42))?;
                wait::waitpid(child, None).unwrap();
                let got = rx.recv()?;
                assert_eq!(got, Msg::Ping);
            }
            unistd::ForkResult::Child => {
                let got = rx.recv().unwrap();
                assert_eq!(got, Msg::Pong(42));
                tx.send(&Msg::Ping).unwrap();
                std::process::exit(0);
            }
        }
        Ok(())
    }

    #[test]
    #[serial]
    fn closed_sender_is_observed_as_broken_connection() -> Result<()> {
        let (tx, mut rx) = pair::<Msg>()?;
        tx.close();
        let err = rx.recv();
        assert!(err.is_err());
        Ok(())
    }
}
