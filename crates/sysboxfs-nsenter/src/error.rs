//! Error taxonomy for the nsenter broker and its wire protocol.
//!
//! Mirrors the production split between a syscall-wrapper error and a
//! higher-level channel error: low-level `nix`/`io` failures are captured
//! verbatim, while protocol-level failures (bad tag, timeout, helper death)
//! get their own variants so callers can match on them without inspecting
//! an errno.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("channel connection broken")]
    ConnectionBroken,
    #[error("failed to (de)serialize channel message")]
    Serde(#[from] serde_json::Error),
    #[error(transparent)]
    Unix(#[from] nix::Error),
    #[error("expecting {expected} fds in channel message, received {received}")]
    UnexpectedFdCount { expected: usize, received: usize },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

type ChannelResult<T> = std::result::Result<T, ChannelError>;

#[derive(Debug, thiserror::Error)]
pub enum NsenterError {
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error("failed to fork helper process")]
    Fork(#[source] nix::Error),
    #[error("failed to enter {0:?} namespace for pid {1}")]
    EnterNamespace(Namespace, i32, #[source] nix::Error),
    #[error("helper process exited with status {0}")]
    HelperExited(i32),
    #[error("helper process was killed by signal {0:?}")]
    HelperSignaled(nix::sys::signal::Signal),
    #[error("nsenter round-trip timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("event was cancelled before a response arrived")]
    Cancelled,
    #[error("unrecognized wire tag: {0}")]
    UnrecognizedTag(String),
    #[error("target path escapes target root: {0:?}")]
    PathEscape(PathBuf),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, NsenterError>;

pub use crate::wire::Namespace;
