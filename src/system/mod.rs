//! Device status providers.
//!
//! Network type and free storage are read at decision time, never cached:
//! both can change between a request and its execution.

pub mod network;
pub mod storage;

pub use network::{NetworkStatus, StaticNetwork};
pub use storage::{DiskStorage, FixedStorage, FreeStorage};
