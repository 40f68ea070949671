//! The nsenter broker: turns an [`NsEvent`] into a helper process that
//! joins a container's namespaces, executes one request, and reports back.
//!
//! The helper is a double fork, not a single one: the first child joins
//! every namespace except mount (`setns` on a pid-namespace fd only
//! affects namespaces of *future* children, so pid-ns membership has to be
//! established before the grandchild is forked), then forks the
//! grandchild, which finally joins the mount namespace (whose `setns`
//! takes effect immediately on the calling thread) and runs the request.
//! The first child waits for the grandchild and forwards its exit status,
//! so the broker always has exactly one pid to track per event.

use std::os::unix::prelude::RawFd;
use std::sync::Arc;
use std::time::Duration;

use nix::sys::socket::sockopt::ReceiveTimeout;
use nix::sys::socket::setsockopt;
use nix::sys::time::TimeVal;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::Pid;

use crate::channel::{self, Receiver, Sender};
use crate::error::{NsenterError, Result};
use crate::fork::container_fork;
use crate::helper;
use crate::reaper::Reaper;
use crate::wire::{Namespace, NsEvent, NsResponse};

pub struct Broker {
    reaper: Arc<Reaper>,
    timeout: Duration,
}

/// Handle to a fire-and-forget event, kept only so it can be reaped or
/// cancelled later.
pub struct AsyncHandle {
    pid: Pid,
}

impl Broker {
    pub fn new(timeout: Duration) -> std::result::Result<Self, nix::Error> {
        let reaper = Arc::new(Reaper::new());
        reaper.set_subreaper()?;
        Ok(Self { reaper, timeout })
    }

    pub fn reaper(&self) -> Arc<Reaper> {
        self.reaper.clone()
    }

    /// Runs an event to completion and returns the helper's response.
    pub fn dispatch(&self, event: NsEvent) -> Result<NsResponse> {
        let (tx, mut rx): (Sender<NsResponse>, Receiver<NsResponse>) = channel::pair()?;
        let _latch = self.reaper.hold();

        let request = event.request.clone();
        let target_pid = event.target_pid;
        let namespaces = event.namespaces.clone();
        let child_tx = tx.try_clone()?;

        let first_child = container_fork(move || {
            let (pre_mount, mount): (Vec<Namespace>, Vec<Namespace>) = namespaces
                .into_iter()
                .partition(|ns| *ns != Namespace::Mount);
            if helper::enter_namespaces(target_pid, &pre_mount).is_err() {
                return 1;
            }

            let request = request.clone();
            let mut tx = match child_tx.try_clone() {
                Ok(tx) => tx,
                Err(_) => return 1,
            };
            let grandchild = container_fork(move || {
                if helper::enter_namespaces(target_pid, &mount).is_err() {
                    return 1;
                }
                let response = helper::execute(&request);
                if tx.send(&response).is_err() {
                    return 1;
                }
                0
            });
            match grandchild {
                Ok(pid) => match waitpid(pid, None) {
                    Ok(WaitStatus::Exited(_, code)) => code,
                    _ => 1,
                },
                Err(_) => 1,
            }
        })
        .map_err(NsenterError::Fork)?;

        self.reaper.track(first_child);
        tx.close();

        let result = recv_with_timeout(&mut rx, self.timeout);
        rx.close();
        drop(_latch);
        self.reaper.sweep();
        result
    }

    /// Runs an event without waiting for its response; the caller gets a
    /// handle it can use to track or terminate it, but the helper is still
    /// reaped normally.
    pub fn dispatch_async(&self, event: NsEvent) -> Result<AsyncHandle> {
        let target_pid = event.target_pid;
        let namespaces = event.namespaces.clone();
        let request = event.request.clone();

        let first_child = container_fork(move || {
            let (pre_mount, mount): (Vec<Namespace>, Vec<Namespace>) = namespaces
                .into_iter()
                .partition(|ns| *ns != Namespace::Mount);
            if helper::enter_namespaces(target_pid, &pre_mount).is_err() {
                return 1;
            }
            let grandchild = container_fork(move || {
                if helper::enter_namespaces(target_pid, &mount).is_err() {
                    return 1;
                }
                let _ = helper::execute(&request);
                0
            });
            match grandchild {
                Ok(pid) => match waitpid(pid, None) {
                    Ok(WaitStatus::Exited(_, code)) => code,
                    _ => 1,
                },
                Err(_) => 1,
            }
        })
        .map_err(NsenterError::Fork)?;

        self.reaper.track(first_child);
        self.reaper.sweep();
        Ok(AsyncHandle { pid: first_child })
    }

    /// `TerminateRequest`: signals the helper group and waits for the
    /// reaper to observe its exit.
    pub fn terminate(&self, handle: AsyncHandle) -> Result<()> {
        use nix::sys::signal::{self, Signal};
        let _ = signal::kill(handle.pid, Signal::SIGKILL);
        self.reaper.sweep();
        Ok(())
    }
}

fn recv_with_timeout(rx: &mut Receiver<NsResponse>, timeout: Duration) -> Result<NsResponse> {
    set_receive_timeout(rx, timeout)?;
    rx.recv().map_err(|e| match e {
        crate::error::ChannelError::Unix(nix::Error::EAGAIN) => NsenterError::Timeout(timeout),
        other => NsenterError::Channel(other),
    })
}

fn set_receive_timeout(rx: &Receiver<NsResponse>, timeout: Duration) -> Result<()> {
    let raw_fd: RawFd = rx.as_raw_fd();
    let tv = TimeVal::new(timeout.as_secs() as i64, timeout.subsec_micros() as i64);
    setsockopt(&unsafe { std::os::fd::BorrowedFd::borrow_raw(raw_fd) }, ReceiveTimeout, &tv)
        .map_err(|e| NsenterError::Channel(crate::error::ChannelError::Unix(e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::NsRequest;
    use std::fs::File;
    use std::io::Write as _;

    #[test]
    fn dispatch_runs_request_in_own_process_and_returns_response() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        File::create(&path).unwrap().write_all(b"payload").unwrap();

        let broker = Broker::new(Duration::from_secs(5)).unwrap();
        let event = NsEvent {
            target_pid: nix::unistd::getpid().as_raw(),
            namespaces: vec![],
            request: NsRequest::ReadFile {
                path,
                offset: 0,
                len: 16,
            },
            async_event: false,
        };
        let response = broker.dispatch(event).unwrap();
        match response {
            NsResponse::Data(d) => assert_eq!(d, b"payload"),
            other => panic!("unexpected response: {other:?}"),
        }
    }
}
