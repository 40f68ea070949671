//! The container state directory and the records it indexes.

pub mod directory;
pub mod record;

pub use directory::{Directory, RegisterRequest};
pub use record::{ContainerRecord, ContainerState, IdMapEntry};
