//! Error taxonomy for the seccomp-notify engine, converging into
//! [`sysboxfs_core::HandlerErrorKind`] wherever a decision crosses into the
//! shared taxonomy.

use std::path::PathBuf;

use sysboxfs_core::HandlerErrorKind;

#[derive(Debug, thiserror::Error)]
pub enum SeccompError {
    #[error("listener rendezvous socket {0:?} unavailable")]
    RendezvousUnavailable(PathBuf, #[source] std::io::Error),
    #[error("handoff message was not accompanied by a file descriptor")]
    MissingFd,
    #[error("failed to decode handoff message")]
    DecodeHandoff(#[source] serde_json::Error),
    #[error("notification id {0} is no longer valid")]
    StaleNotification(u64),
    #[error("failed to read target process memory at {0:#x}")]
    MemRead(u64, #[source] std::io::Error),
    #[error("string at {0:#x} exceeds the maximum argument length")]
    ArgumentTooLong(u64),
    #[error(transparent)]
    Kernel(#[from] nix::Error),
    #[error("seccomp kernel call failed: {0}")]
    NotifyCall(String),
    #[error(transparent)]
    Container(#[from] sysboxfs_core::HandlerErrorKind),
}

impl From<SeccompError> for HandlerErrorKind {
    fn from(e: SeccompError) -> Self {
        match e {
            SeccompError::Container(k) => k,
            SeccompError::StaleNotification(_) => HandlerErrorKind::Timeout,
            other => HandlerErrorKind::Internal(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, SeccompError>;
