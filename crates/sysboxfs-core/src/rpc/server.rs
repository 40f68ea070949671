//! Server side of the container lifecycle RPC: binds a unix-domain socket
//! and dispatches each framed request against the container directory.

use std::env;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use nix::unistd;

use crate::container::{Directory, IdMapEntry, RegisterRequest};
use crate::error::DirectoryError;
use crate::ionode::IoBackend;

use super::messages::{read_framed, write_framed, RpcRequest, RpcResponse, StatusCode};

#[derive(Debug, thiserror::Error)]
pub enum RpcServerError {
    #[error("invalid socket path: {0:?}")]
    InvalidPath(PathBuf),
    #[error("failed to get cwd")]
    GetCwd(#[source] std::io::Error),
    #[error("failed to chdir to {path:?}")]
    Chdir {
        source: nix::Error,
        path: PathBuf,
    },
    #[error("failed to bind rpc socket {0:?}")]
    Bind(#[source] std::io::Error, PathBuf),
}

/// Binds `socket_path`, chdir-ing into its parent first so the bind call
/// never has to pass a path longer than `sun_path`'s 108-byte limit; this
/// is the same workaround the runtime's own notify-socket bind uses, since
/// container working directories routinely produce absolute paths longer
/// than that.
pub struct RpcServer {
    listener: UnixListener,
    directory: Arc<Directory>,
    host: Arc<dyn IoBackend>,
}

impl RpcServer {
    pub fn bind(
        socket_path: &Path,
        directory: Arc<Directory>,
        host: Arc<dyn IoBackend>,
    ) -> Result<Self, RpcServerError> {
        let workdir = socket_path
            .parent()
            .ok_or_else(|| RpcServerError::InvalidPath(socket_path.to_owned()))?;
        let socket_name = socket_path
            .file_name()
            .ok_or_else(|| RpcServerError::InvalidPath(socket_path.to_owned()))?;
        let cwd = env::current_dir().map_err(RpcServerError::GetCwd)?;
        unistd::chdir(workdir).map_err(|e| RpcServerError::Chdir {
            source: e,
            path: workdir.to_owned(),
        })?;
        let listener = UnixListener::bind(socket_name)
            .map_err(|e| RpcServerError::Bind(e, socket_path.to_owned()));
        unistd::chdir(&cwd).map_err(|e| RpcServerError::Chdir {
            source: e,
            path: cwd,
        })?;
        Ok(Self {
            listener: listener?,
            directory,
            host,
        })
    }

    /// Serves connections until the listener is closed. Each connection
    /// carries exactly one request/response round-trip, matching the way
    /// the companion runtime issues one lifecycle call at a time.
    pub fn serve_forever(&self) -> std::io::Result<()> {
        for stream in self.listener.incoming() {
            let mut stream = stream?;
            if let Err(e) = self.handle_connection(&mut stream) {
                tracing::warn!(?e, "rpc connection failed");
            }
        }
        Ok(())
    }

    fn handle_connection(&self, stream: &mut UnixStream) -> std::io::Result<()> {
        let request: RpcRequest = read_framed(stream)?;
        let response = self.dispatch(request);
        write_framed(stream, &response)
    }

    fn dispatch(&self, request: RpcRequest) -> RpcResponse {
        match request {
            RpcRequest::PreRegister { id } => match self.directory.pre_register(id, Utc::now()) {
                Ok(()) => RpcResponse::ok(),
                Err(e) => directory_error_response(e),
            },
            RpcRequest::Register {
                id,
                init_pid,
                ctime_unix,
                uid_first,
                uid_size,
                gid_first,
                gid_size,
                ro_paths,
                masked_paths,
            } => {
                let ctime = Utc
                    .timestamp_opt(ctime_unix, 0)
                    .single()
                    .unwrap_or_else(Utc::now);
                let req = RegisterRequest {
                    id,
                    init_pid,
                    ctime,
                    uid_map: vec![IdMapEntry {
                        container_id: 0,
                        host_id: uid_first,
                        size: uid_size,
                    }],
                    gid_map: vec![IdMapEntry {
                        container_id: 0,
                        host_id: gid_first,
                        size: gid_size,
                    }],
                    ro_paths,
                    masked_paths,
                };
                match self.directory.register(self.host.as_ref(), req) {
                    Ok(()) => RpcResponse::ok(),
                    Err(e) => directory_error_response(e),
                }
            }
            RpcRequest::Update {
                id,
                ctime_unix,
                uid_first,
                uid_size,
                gid_first,
                gid_size,
                ro_paths,
                masked_paths,
            } => {
                let ctime = Utc
                    .timestamp_opt(ctime_unix, 0)
                    .single()
                    .unwrap_or_else(Utc::now);
                let uid_map = vec![IdMapEntry {
                    container_id: 0,
                    host_id: uid_first,
                    size: uid_size,
                }];
                let gid_map = vec![IdMapEntry {
                    container_id: 0,
                    host_id: gid_first,
                    size: gid_size,
                }];
                match self
                    .directory
                    .update(&id, ctime, uid_map, gid_map, ro_paths, masked_paths)
                {
                    Ok(()) => RpcResponse::ok(),
                    Err(e) => directory_error_response(e),
                }
            }
            RpcRequest::Unregister { id } => match self.directory.unregister(&id) {
                Ok(()) => RpcResponse::ok(),
                Err(e) => directory_error_response(e),
            },
        }
    }
}

fn directory_error_response(e: DirectoryError) -> RpcResponse {
    match e {
        DirectoryError::AlreadyExists(id) => {
            RpcResponse::error(StatusCode::AlreadyExists, format!("already exists: {id}"))
        }
        DirectoryError::NotFound(id) => {
            RpcResponse::error(StatusCode::NotFound, format!("not found: {id}"))
        }
        DirectoryError::PidNsConflict(_) | DirectoryError::UserNsConflict(_) => {
            RpcResponse::error(StatusCode::AlreadyExists, e.to_string())
        }
        DirectoryError::NotRegistered(id) => {
            RpcResponse::error(StatusCode::InvalidArgument, format!("not registered: {id}"))
        }
        DirectoryError::Process(e) => RpcResponse::error(StatusCode::Internal, e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ionode::RealIoBackend;

    #[test]
    fn pre_register_then_duplicate_returns_already_exists() {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("sysboxfs.sock");
        let directory = Arc::new(Directory::new());
        let host: Arc<dyn IoBackend> = Arc::new(RealIoBackend::default());
        let server = RpcServer::bind(&socket_path, directory, host).unwrap();

        let first = server.dispatch(RpcRequest::PreRegister { id: "dup".into() });
        assert_eq!(first.status, StatusCode::Ok);
        let second = server.dispatch(RpcRequest::PreRegister { id: "dup".into() });
        assert_eq!(second.status, StatusCode::AlreadyExists);
    }

    #[test]
    fn unregister_of_unknown_id_returns_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("sysboxfs.sock");
        let directory = Arc::new(Directory::new());
        let host: Arc<dyn IoBackend> = Arc::new(RealIoBackend::default());
        let server = RpcServer::bind(&socket_path, directory, host).unwrap();

        let resp = server.dispatch(RpcRequest::Unregister { id: "ghost".into() });
        assert_eq!(resp.status, StatusCode::NotFound);
    }
}
