//! Container lifecycle RPC: a length-prefixed `serde_json` protocol over a
//! unix-domain socket, grounded on the production notify-socket's
//! chdir-then-bind pattern for staying under `sun_path`'s 108-byte limit.
//! The companion runtime process that originates these messages is an
//! external collaborator; this module implements only the framing and the
//! server-side dispatch against the container directory.

pub mod messages;
pub mod server;

pub use messages::{RpcRequest, RpcResponse, StatusCode};
pub use server::RpcServer;
