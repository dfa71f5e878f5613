//! B+ tree index over buffer-pool pages.
//!
//! Submodules:
//! - [`key`]: fixed-width composite key codec and comparison
//! - [`node`]: byte-level leaf/internal page layouts
//! - [`roots`]: the index-roots directory page (page 0)
//! - tree: search, insert-with-split, delete-with-merge, iteration

pub mod key;
pub mod node;
pub mod roots;

mod iterator;
mod tree;

pub use iterator::TreeIterator;
pub use key::{KeyCodec, MAX_KEY_SIZE};
pub use roots::IndexRoots;
pub use tree::{BPlusTree, ScanOp};
