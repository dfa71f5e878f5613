//! The index-roots directory page.
//!
//! Page 0 maps every index id to its current B+ tree root page and is
//! the single source of truth for roots across restarts.
//!
//! Layout: `{count: u32}` followed by `count` records of
//! `(index_id: u32, root_page_id: i32)`. Records are unordered and
//! searched linearly; capacity is bounded by the page size.

use opal_common::error::{DbError, Result};
use opal_common::page::{PageId, PAGE_SIZE};

const COUNT_OFFSET: usize = 0;
const RECORDS_OFFSET: usize = 4;
const RECORD_SIZE: usize = 8;

/// Maximum number of `(index_id, root)` records a directory page holds.
pub const MAX_ROOT_RECORDS: usize = (PAGE_SIZE - RECORDS_OFFSET) / RECORD_SIZE;

/// Operations on the index-roots directory page bytes.
pub struct IndexRoots;

impl IndexRoots {
    fn count(page: &[u8]) -> usize {
        u32::from_le_bytes([page[0], page[1], page[2], page[3]]) as usize
    }

    fn set_count(page: &mut [u8], count: usize) {
        page[COUNT_OFFSET..COUNT_OFFSET + 4].copy_from_slice(&(count as u32).to_le_bytes());
    }

    fn record(page: &[u8], index: usize) -> (u32, PageId) {
        let off = RECORDS_OFFSET + index * RECORD_SIZE;
        (
            u32::from_le_bytes([page[off], page[off + 1], page[off + 2], page[off + 3]]),
            PageId::from_le_bytes([page[off + 4], page[off + 5], page[off + 6], page[off + 7]]),
        )
    }

    fn write_record(page: &mut [u8], index: usize, index_id: u32, root: PageId) {
        let off = RECORDS_OFFSET + index * RECORD_SIZE;
        page[off..off + 4].copy_from_slice(&index_id.to_le_bytes());
        page[off + 4..off + 8].copy_from_slice(&root.to_le_bytes());
    }

    fn position(page: &[u8], index_id: u32) -> Option<usize> {
        (0..Self::count(page)).find(|&i| Self::record(page, i).0 == index_id)
    }

    /// Looks up the recorded root page for `index_id`.
    pub fn get(page: &[u8], index_id: u32) -> Option<PageId> {
        Self::position(page, index_id).map(|i| Self::record(page, i).1)
    }

    /// Records `root` for `index_id`, inserting or updating in place.
    pub fn set(page: &mut [u8], index_id: u32, root: PageId) -> Result<()> {
        if let Some(position) = Self::position(page, index_id) {
            Self::write_record(page, position, index_id, root);
            return Ok(());
        }
        let count = Self::count(page);
        if count >= MAX_ROOT_RECORDS {
            return Err(DbError::Internal("index-roots directory is full".into()));
        }
        Self::write_record(page, count, index_id, root);
        Self::set_count(page, count + 1);
        Ok(())
    }

    /// Removes the record for `index_id`. Returns true if it existed.
    pub fn remove(page: &mut [u8], index_id: u32) -> bool {
        let Some(position) = Self::position(page, index_id) else {
            return false;
        };
        let count = Self::count(page);
        // Swap-remove: record order carries no meaning.
        if position + 1 < count {
            let (last_id, last_root) = Self::record(page, count - 1);
            Self::write_record(page, position, last_id, last_root);
        }
        Self::set_count(page, count - 1);
        true
    }
}
