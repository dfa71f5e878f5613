//! Buffer pool management for OpalDB.
//!
//! This crate provides in-memory page caching with:
//! - Fixed-size buffer pool with configurable frame count
//! - LRU-K eviction policy
//! - Pin counting enforced through RAII page guards
//! - Dirty page tracking for write-back

mod frame;
mod pool;
mod replacer;
mod store;

pub use frame::BufferFrame;
pub use pool::{BufferPoolManager, PageGuard};
pub use replacer::{LruKReplacer, Replacer};
pub use store::{MemStore, PageStore};
