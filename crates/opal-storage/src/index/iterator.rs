//! Forward iteration over the leaf chain.

use bytes::Bytes;
use std::sync::Arc;

use opal_buffer::BufferPoolManager;
use opal_common::error::Result;
use opal_common::page::{PageId, INVALID_PAGE_ID};

use crate::record::RowId;

use super::node::{self, LeafNode};

/// Forward iterator over a B+ tree's entries in key order.
///
/// Each step pins the current leaf only for the duration of the call, so
/// an iterator never holds a page across calls. Valid only between tree
/// mutations.
pub struct TreeIterator {
    bpm: Arc<BufferPoolManager>,
    page_id: PageId,
    slot: usize,
}

impl TreeIterator {
    pub(crate) fn new(bpm: Arc<BufferPoolManager>, page_id: PageId, slot: usize) -> Self {
        Self { bpm, page_id, slot }
    }

    /// An exhausted iterator.
    pub(crate) fn exhausted(bpm: Arc<BufferPoolManager>) -> Self {
        Self::new(bpm, INVALID_PAGE_ID, 0)
    }

    /// Advances to the next entry; `Ok(None)` when past the last leaf.
    pub fn next_entry(&mut self) -> Result<Option<(Bytes, RowId)>> {
        loop {
            if self.page_id == INVALID_PAGE_ID {
                return Ok(None);
            }
            let guard = self.bpm.fetch_page(self.page_id)?;
            let page = guard.read();

            if self.slot < node::size(&page) {
                let key = Bytes::copy_from_slice(LeafNode::key_at(&page, self.slot));
                let rid = LeafNode::rid_at(&page, self.slot);
                self.slot += 1;
                return Ok(Some((key, rid)));
            }

            self.page_id = LeafNode::next_page_id(&page);
            self.slot = 0;
        }
    }
}
