//! Process inspection: namespace inodes, a point-in-time snapshot of a
//! caller's identity, and kernel-faithful path resolution with DAC checks.

pub mod inspector;

pub use inspector::{ProcessInspector, ProcessSnapshot};
