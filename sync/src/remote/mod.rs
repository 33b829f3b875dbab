//! Remote store interface.
//!
//! The mirror consumes a path-addressable hierarchical store through the
//! [`RemoteStore`] trait. [`MemoryRemote`] is a complete in-process
//! implementation used by tests and the demo binary.

mod memory;
mod protocol;

pub use memory::MemoryRemote;
pub use protocol::*;
