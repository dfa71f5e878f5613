//! Table heap: slotted pages of serialized rows.
//!
//! Heap page layout:
//! ```text
//! +--------------------------+ 0
//! | next_page_id: i32        |
//! | slot_count: u16          |
//! | free_space_end: u16      |
//! +--------------------------+ 8
//! | slot array               |  <- grows forward
//! | (offset: u16, len: u16)* |
//! +--------------------------+
//! |       free space         |
//! +--------------------------+ free_space_end
//! | row data                 |  <- grows backward
//! +--------------------------+ PAGE_SIZE
//! ```
//!
//! Pages are forward-chained through `next_page_id`; inserts walk the
//! chain first-fit and append a page when every page is full.

use std::sync::Arc;

use opal_buffer::BufferPoolManager;
use opal_common::error::{DbError, Result};
use opal_common::page::{PageId, INVALID_PAGE_ID, PAGE_SIZE};

use crate::record::{Row, RowId, Schema};

const HEAP_HEADER_SIZE: usize = 8;
const SLOT_SIZE: usize = 4;

fn next_page_id(page: &[u8]) -> PageId {
    PageId::from_le_bytes([page[0], page[1], page[2], page[3]])
}

fn set_next_page_id(page: &mut [u8], next: PageId) {
    page[0..4].copy_from_slice(&next.to_le_bytes());
}

fn slot_count(page: &[u8]) -> u16 {
    u16::from_le_bytes([page[4], page[5]])
}

fn set_slot_count(page: &mut [u8], count: u16) {
    page[4..6].copy_from_slice(&count.to_le_bytes());
}

fn free_space_end(page: &[u8]) -> u16 {
    u16::from_le_bytes([page[6], page[7]])
}

fn set_free_space_end(page: &mut [u8], end: u16) {
    page[6..8].copy_from_slice(&end.to_le_bytes());
}

fn slot(page: &[u8], index: usize) -> (u16, u16) {
    let off = HEAP_HEADER_SIZE + index * SLOT_SIZE;
    (
        u16::from_le_bytes([page[off], page[off + 1]]),
        u16::from_le_bytes([page[off + 2], page[off + 3]]),
    )
}

fn set_slot(page: &mut [u8], index: usize, offset: u16, len: u16) {
    let off = HEAP_HEADER_SIZE + index * SLOT_SIZE;
    page[off..off + 2].copy_from_slice(&offset.to_le_bytes());
    page[off + 2..off + 4].copy_from_slice(&len.to_le_bytes());
}

fn init_heap_page(page: &mut [u8]) {
    set_next_page_id(page, INVALID_PAGE_ID);
    set_slot_count(page, 0);
    set_free_space_end(page, PAGE_SIZE as u16);
}

fn free_space(page: &[u8]) -> usize {
    let slot_array_end = HEAP_HEADER_SIZE + slot_count(page) as usize * SLOT_SIZE;
    (free_space_end(page) as usize).saturating_sub(slot_array_end)
}

/// A table's row storage: a forward-linked chain of slotted pages.
pub struct TableHeap {
    bpm: Arc<BufferPoolManager>,
    first_page_id: PageId,
    schema: Arc<Schema>,
}

impl TableHeap {
    /// Creates an empty heap with one fresh page.
    pub fn create(bpm: Arc<BufferPoolManager>, schema: Arc<Schema>) -> Result<Self> {
        let first_page_id = {
            let guard = bpm.new_page()?;
            init_heap_page(&mut guard.write());
            guard.page_id()
        };
        Ok(Self {
            bpm,
            first_page_id,
            schema,
        })
    }

    /// Reopens a heap at its recorded first page.
    pub fn open(bpm: Arc<BufferPoolManager>, first_page_id: PageId, schema: Arc<Schema>) -> Self {
        Self {
            bpm,
            first_page_id,
            schema,
        }
    }

    /// Returns the id of the first heap page.
    pub fn first_page_id(&self) -> PageId {
        self.first_page_id
    }

    /// Returns the heap's schema.
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Inserts a row, assigning and returning its [`RowId`].
    ///
    /// The row's `rid` field is updated before serialization so the
    /// stored bytes carry the row's own location.
    pub fn insert_tuple(&self, row: &mut Row) -> Result<RowId> {
        let row_size = self.schema.row_size();
        if row_size + SLOT_SIZE > PAGE_SIZE - HEAP_HEADER_SIZE {
            return Err(DbError::RecordTooLarge {
                size: row_size,
                max: PAGE_SIZE - HEAP_HEADER_SIZE - SLOT_SIZE,
            });
        }

        let mut page_id = self.first_page_id;
        loop {
            let guard = self.bpm.fetch_page(page_id)?;
            let has_space = free_space(&guard.read()) >= row_size + SLOT_SIZE;

            if has_space {
                let mut page = guard.write();
                let index = slot_count(&page) as usize;
                let data_off = free_space_end(&page) as usize - row_size;

                let rid = RowId::new(page_id, index as u32);
                row.rid = rid;
                let bytes = row.serialize(&self.schema)?;
                page[data_off..data_off + row_size].copy_from_slice(&bytes);
                set_slot(&mut page, index, data_off as u16, row_size as u16);
                set_slot_count(&mut page, index as u16 + 1);
                set_free_space_end(&mut page, data_off as u16);
                return Ok(rid);
            }

            let next = next_page_id(&guard.read());
            if next != INVALID_PAGE_ID {
                page_id = next;
                continue;
            }

            // Chain is full: append a page and link it in.
            let new_guard = self.bpm.new_page()?;
            init_heap_page(&mut new_guard.write());
            set_next_page_id(&mut guard.write(), new_guard.page_id());
            page_id = new_guard.page_id();
        }
    }

    /// Reads the row stored at `rid`.
    pub fn get_tuple(&self, rid: RowId) -> Result<Row> {
        let guard = self.bpm.fetch_page(rid.page_id)?;
        let page = guard.read();

        if rid.slot >= slot_count(&page) as u32 {
            return Err(DbError::RecordNotFound(rid.to_string()));
        }
        let (offset, len) = slot(&page, rid.slot as usize);
        let mut row = Row::deserialize(&page[offset as usize..(offset + len) as usize], &self.schema)?;
        row.rid = rid;
        Ok(row)
    }

    /// Frees every page in the heap chain. Used by `DropTable`.
    pub fn free_pages(&self) -> Result<()> {
        let mut page_id = self.first_page_id;
        while page_id != INVALID_PAGE_ID {
            let next = {
                let guard = self.bpm.fetch_page(page_id)?;
                let next = next_page_id(&guard.read());
                next
            };
            self.bpm.delete_page(page_id)?;
            page_id = next;
        }
        Ok(())
    }
}
