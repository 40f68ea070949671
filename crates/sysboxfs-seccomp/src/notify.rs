//! The seccomp-notify kernel surface, behind a trait so the dispatch logic
//! in [`crate::dispatch`] can be exercised without a real listener fd.

use std::os::fd::RawFd;

use libseccomp::{ScmpNotifReq, ScmpNotifResp, ScmpNotifRespFlags};

use crate::error::{Result, SeccompError};

#[derive(Debug, Clone)]
pub struct NotifyRequest {
    pub id: u64,
    pub pid: u32,
    pub syscall: String,
    pub args: [u64; 6],
}

#[derive(Debug, Clone, Copy)]
pub struct NotifyResponse {
    pub id: u64,
    pub val: i64,
    pub error: i32,
    pub continue_syscall: bool,
}

impl NotifyResponse {
    pub fn allow(id: u64) -> Self {
        Self {
            id,
            val: 0,
            error: 0,
            continue_syscall: true,
        }
    }

    pub fn success(id: u64, val: i64) -> Self {
        Self {
            id,
            val,
            error: 0,
            continue_syscall: false,
        }
    }

    pub fn fail(id: u64, errno: i32) -> Self {
        Self {
            id,
            val: -1,
            error: errno,
            continue_syscall: false,
        }
    }
}

/// Abstracts the three kernel operations the engine performs on a
/// notification fd: receive the next request, re-check a cookie's
/// liveness, and respond.
pub trait NotifySource: Send + Sync {
    fn receive(&self) -> Result<NotifyRequest>;
    fn id_valid(&self, id: u64) -> Result<()>;
    fn respond(&self, response: NotifyResponse) -> Result<()>;
}

pub struct KernelNotifySource {
    fd: RawFd,
}

impl KernelNotifySource {
    pub fn new(fd: RawFd) -> Self {
        Self { fd }
    }
}

impl NotifySource for KernelNotifySource {
    fn receive(&self) -> Result<NotifyRequest> {
        let req = ScmpNotifReq::receive(self.fd)
            .map_err(|e| SeccompError::NotifyCall(e.to_string()))?;
        Ok(NotifyRequest {
            id: req.id,
            pid: req.pid,
            syscall: req.data.syscall.get_name().unwrap_or_default(),
            args: req.data.args,
        })
    }

    fn id_valid(&self, id: u64) -> Result<()> {
        libseccomp::notify_id_valid(self.fd, id)
            .map_err(|_| SeccompError::StaleNotification(id))
    }

    fn respond(&self, response: NotifyResponse) -> Result<()> {
        let flags = if response.continue_syscall {
            ScmpNotifRespFlags::CONTINUE
        } else {
            ScmpNotifRespFlags::empty()
        };
        let resp = ScmpNotifResp::new(response.id, response.val, response.error, flags.bits());
        resp.respond(self.fd)
            .map_err(|_| SeccompError::StaleNotification(response.id))
    }
}
