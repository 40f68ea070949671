//! Error taxonomy for the daemon core.
//!
//! Each module boundary gets its own `thiserror` enum; every one of them
//! converts into [`HandlerErrorKind`] at the point it crosses into the
//! upper-filesystem adapter or the RPC server, mirroring the production
//! split of one error enum per subsystem rather than a single monolith.

use std::path::PathBuf;

use sysboxfs_nsenter::NsenterError;

/// The taxonomy the adapter and RPC boundaries translate into errnos/status
/// codes. See the error handling design for the errno/status mapping.
#[derive(Debug, thiserror::Error)]
pub enum HandlerErrorKind {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("not a directory: {0}")]
    NotADirectory(String),
    #[error("too many symbolic links")]
    TooManyLinks,
    #[error("name too long: {0}")]
    NameTooLong(String),
    #[error("operation interrupted")]
    Interrupted,
    #[error("operation timed out")]
    Timeout,
    #[error("namespace unavailable for pid {0}")]
    NamespaceUnavailable(i32),
    #[error("internal error: {0}")]
    Internal(String),
}

impl HandlerErrorKind {
    /// The errno the upper-filesystem adapter and the seccomp engine answer
    /// with at their respective boundaries.
    pub fn errno(&self) -> i32 {
        match self {
            HandlerErrorKind::NotFound(_) => libc::ENOENT,
            HandlerErrorKind::AlreadyExists(_) => libc::EEXIST,
            HandlerErrorKind::PermissionDenied(_) => libc::EACCES,
            HandlerErrorKind::InvalidArgument(_) => libc::EINVAL,
            HandlerErrorKind::NotADirectory(_) => libc::ENOTDIR,
            HandlerErrorKind::TooManyLinks => libc::ELOOP,
            HandlerErrorKind::NameTooLong(_) => libc::ENAMETOOLONG,
            HandlerErrorKind::Interrupted => libc::EINTR,
            HandlerErrorKind::Timeout => libc::ETIMEDOUT,
            HandlerErrorKind::NamespaceUnavailable(_) => libc::ESRCH,
            HandlerErrorKind::Internal(_) => libc::EIO,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("no such process: {0}")]
    NoSuchProcess(i32),
    #[error("missing namespace entry {ns} for pid {pid}")]
    MissingNamespace { pid: i32, ns: &'static str },
    #[error("path resolution exceeded the symlink limit")]
    TooManyLinks,
    #[error("path exceeds PATH_MAX: {0:?}")]
    NameTooLong(PathBuf),
    #[error("component is not a directory: {0:?}")]
    NotADirectory(PathBuf),
    #[error("no such file or directory: {0:?}")]
    NotFound(PathBuf),
    #[error("permission denied: {0:?}")]
    PermissionDenied(PathBuf),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<ProcessError> for HandlerErrorKind {
    fn from(e: ProcessError) -> Self {
        match e {
            ProcessError::NoSuchProcess(pid) => HandlerErrorKind::NamespaceUnavailable(pid),
            ProcessError::MissingNamespace { pid, .. } => {
                HandlerErrorKind::NamespaceUnavailable(pid)
            }
            ProcessError::TooManyLinks => HandlerErrorKind::TooManyLinks,
            ProcessError::NameTooLong(p) => HandlerErrorKind::NameTooLong(p.display().to_string()),
            ProcessError::NotADirectory(p) => {
                HandlerErrorKind::NotADirectory(p.display().to_string())
            }
            ProcessError::NotFound(p) => HandlerErrorKind::NotFound(p.display().to_string()),
            ProcessError::PermissionDenied(p) => {
                HandlerErrorKind::PermissionDenied(p.display().to_string())
            }
            ProcessError::Io(e) => HandlerErrorKind::Internal(e.to_string()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("container already exists: {0}")]
    AlreadyExists(String),
    #[error("container not found: {0}")]
    NotFound(String),
    #[error("pid-namespace inode {0} already claimed by another container")]
    PidNsConflict(u64),
    #[error("user-namespace inode {0} already claimed by another container")]
    UserNsConflict(u64),
    #[error("container {0} is not yet registered")]
    NotRegistered(String),
    #[error(transparent)]
    Process(#[from] ProcessError),
}

impl From<DirectoryError> for HandlerErrorKind {
    fn from(e: DirectoryError) -> Self {
        match e {
            DirectoryError::AlreadyExists(id) => HandlerErrorKind::AlreadyExists(id),
            DirectoryError::NotFound(id) => HandlerErrorKind::NotFound(id),
            DirectoryError::PidNsConflict(ino) => {
                HandlerErrorKind::AlreadyExists(format!("pid-ns inode {ino}"))
            }
            DirectoryError::UserNsConflict(ino) => {
                HandlerErrorKind::AlreadyExists(format!("user-ns inode {ino}"))
            }
            DirectoryError::NotRegistered(id) => HandlerErrorKind::InvalidArgument(id),
            DirectoryError::Process(e) => e.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("handler already registered for path {0:?}")]
    AlreadyRegistered(PathBuf),
    #[error("no handler for path {0:?}")]
    NoHandler(PathBuf),
}

impl From<RegistryError> for HandlerErrorKind {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::AlreadyRegistered(p) => {
                HandlerErrorKind::AlreadyExists(p.display().to_string())
            }
            RegistryError::NoHandler(p) => HandlerErrorKind::NotFound(p.display().to_string()),
        }
    }
}

impl From<NsenterError> for HandlerErrorKind {
    fn from(e: NsenterError) -> Self {
        match e {
            NsenterError::Timeout(_) => HandlerErrorKind::Timeout,
            other => HandlerErrorKind::Internal(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, HandlerErrorKind>;
