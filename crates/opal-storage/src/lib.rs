//! Storage engine for OpalDB.
//!
//! This crate provides:
//! - Disk manager for page-level file I/O (the buffer pool's `PageStore`)
//! - Row, field, and schema codecs
//! - Table heap for row storage
//! - B+ tree index over buffer-pool pages

mod disk;
mod heap;
pub mod index;
mod record;

pub use disk::{DiskManager, DiskManagerConfig};
pub use heap::TableHeap;
pub use index::{BPlusTree, IndexRoots, KeyCodec, ScanOp, TreeIterator, MAX_KEY_SIZE};
pub use record::{Column, Field, Row, RowId, Schema};
