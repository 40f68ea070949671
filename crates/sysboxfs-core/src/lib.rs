//! Core of the userspace filesystem daemon: process inspection, the
//! container state directory, the handler registry and substrate, the
//! upper-filesystem adapter, and the container lifecycle RPC server.
//!
//! The cross-namespace execution broker lives in the sibling
//! `sysboxfs-nsenter` crate; the seccomp-notify engine lives in
//! `sysboxfs-seccomp`. This crate wires both in through [`handler::roster`]
//! and leaves mount construction and process startup to the `sysboxfs`
//! binary crate.

pub mod adapter;
pub mod config;
pub mod container;
pub mod error;
pub mod handler;
pub mod ionode;
pub mod process;
pub mod rpc;

pub use adapter::{Adapter, CallerContext, FilesystemOps};
pub use config::Config;
pub use container::{ContainerRecord, ContainerState, Directory, IdMapEntry, RegisterRequest};
pub use error::{HandlerErrorKind, Result};
pub use handler::{EnumHandler, Handler, PassthroughHandler, Registry, ScalarBoundHandler, SyntheticHandler};
pub use ionode::{IoBackend, IoNode, RealIoBackend};
pub use process::{ProcessInspector, ProcessSnapshot};
pub use rpc::{RpcRequest, RpcResponse, RpcServer, StatusCode};
