//! Helper-process broker for executing filesystem and mount operations
//! inside a container's namespaces.
//!
//! A daemon thread that has work to do inside a container never joins that
//! container's namespaces itself; it hands an [`NsEvent`] to a [`Broker`],
//! which forks a short-lived helper that does the joining, runs exactly one
//! [`NsRequest`], and reports an [`NsResponse`] back over a
//! [`channel::Sender`]/[`channel::Receiver`] pair. This keeps the daemon's
//! own threads out of container namespaces entirely, so a hung or malicious
//! container can wedge at most one helper process rather than the daemon.

pub mod broker;
pub mod channel;
pub mod error;
pub mod fork;
pub mod helper;
pub mod reaper;
pub mod wire;

pub use broker::{AsyncHandle, Broker};
pub use error::{ChannelError, NsenterError, Result};
pub use reaper::Reaper;
pub use wire::{AttrWire, DirEntryWire, Namespace, NsEvent, NsRequest, NsResponse};
