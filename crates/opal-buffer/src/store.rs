//! Block-device abstraction the buffer pool is written against.

use parking_lot::Mutex;
use std::collections::HashMap;

use opal_common::error::{DbError, Result};
use opal_common::page::{PageId, PAGE_SIZE};

/// Backing store for fixed-size pages.
///
/// The buffer pool reads and writes pages exclusively through this
/// trait; the disk manager in the storage crate is the production
/// implementation.
pub trait PageStore: Send + Sync {
    /// Allocates a fresh page and returns its id.
    fn allocate_page(&self) -> Result<PageId>;

    /// Returns a page to the store's free list.
    fn deallocate_page(&self, page_id: PageId) -> Result<()>;

    /// Reads a page into a fresh buffer.
    fn read_page(&self, page_id: PageId) -> Result<Box<[u8; PAGE_SIZE]>>;

    /// Writes a page buffer back to the store.
    fn write_page(&self, page_id: PageId, data: &[u8; PAGE_SIZE]) -> Result<()>;
}

/// In-memory page store for tests.
pub struct MemStore {
    inner: Mutex<MemStoreInner>,
}

struct MemStoreInner {
    pages: HashMap<PageId, Box<[u8; PAGE_SIZE]>>,
    free_list: Vec<PageId>,
    next_page_id: PageId,
}

impl MemStore {
    /// Creates an empty store whose first allocated page id is `first_id`.
    pub fn new(first_id: PageId) -> Self {
        Self {
            inner: Mutex::new(MemStoreInner {
                pages: HashMap::new(),
                free_list: Vec::new(),
                next_page_id: first_id,
            }),
        }
    }

    /// Number of live (allocated and not freed) pages.
    pub fn live_pages(&self) -> usize {
        self.inner.lock().pages.len()
    }
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new(0)
    }
}

impl PageStore for MemStore {
    fn allocate_page(&self) -> Result<PageId> {
        let mut inner = self.inner.lock();
        let page_id = match inner.free_list.pop() {
            Some(pid) => pid,
            None => {
                let pid = inner.next_page_id;
                inner.next_page_id += 1;
                pid
            }
        };
        inner.pages.insert(page_id, Box::new([0u8; PAGE_SIZE]));
        Ok(page_id)
    }

    fn deallocate_page(&self, page_id: PageId) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.pages.remove(&page_id).is_none() {
            return Err(DbError::PageNotFound(page_id));
        }
        inner.free_list.push(page_id);
        Ok(())
    }

    fn read_page(&self, page_id: PageId) -> Result<Box<[u8; PAGE_SIZE]>> {
        let inner = self.inner.lock();
        inner
            .pages
            .get(&page_id)
            .cloned()
            .ok_or(DbError::PageNotFound(page_id))
    }

    fn write_page(&self, page_id: PageId, data: &[u8; PAGE_SIZE]) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.pages.get_mut(&page_id) {
            Some(page) => {
                page.copy_from_slice(data);
                Ok(())
            }
            None => Err(DbError::PageNotFound(page_id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mem_store_allocate_sequential() {
        let store = MemStore::new(2);
        assert_eq!(store.allocate_page().unwrap(), 2);
        assert_eq!(store.allocate_page().unwrap(), 3);
        assert_eq!(store.live_pages(), 2);
    }

    #[test]
    fn test_mem_store_read_write() {
        let store = MemStore::default();
        let pid = store.allocate_page().unwrap();

        let mut data = [0u8; PAGE_SIZE];
        data[0] = 0xAB;
        store.write_page(pid, &data).unwrap();

        let read = store.read_page(pid).unwrap();
        assert_eq!(read[0], 0xAB);
    }

    #[test]
    fn test_mem_store_deallocate_and_reuse() {
        let store = MemStore::default();
        let pid = store.allocate_page().unwrap();
        store.deallocate_page(pid).unwrap();

        assert!(store.read_page(pid).is_err());
        // Freed id is handed out again.
        assert_eq!(store.allocate_page().unwrap(), pid);
    }

    #[test]
    fn test_mem_store_missing_page() {
        let store = MemStore::default();
        assert!(matches!(
            store.read_page(42),
            Err(DbError::PageNotFound(42))
        ));
        assert!(store.deallocate_page(42).is_err());
    }
}
