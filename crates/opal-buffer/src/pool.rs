//! Buffer pool manager.

use parking_lot::{MappedRwLockReadGuard, MappedRwLockWriteGuard, Mutex, RwLockReadGuard, RwLockWriteGuard};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::frame::BufferFrame;
use crate::replacer::{LruKReplacer, Replacer};
use crate::store::PageStore;
use opal_common::error::{DbError, Result};
use opal_common::page::{FrameId, PageId};

/// Buffer pool manager.
///
/// Maintains a fixed pool of frames caching pages of the backing store:
/// - page id to frame id mapping
/// - free frame list for unused frames
/// - LRU-K replacement for eviction
/// - pin counting, enforced through [`PageGuard`]
///
/// Every page access goes through a guard returned by [`fetch_page`] or
/// [`new_page`]; dropping the guard performs the matching unpin, so a
/// fetch can never leak a pin on an early return path.
///
/// [`fetch_page`]: BufferPoolManager::fetch_page
/// [`new_page`]: BufferPoolManager::new_page
pub struct BufferPoolManager {
    /// Backing page store.
    store: Arc<dyn PageStore>,
    /// Array of buffer frames.
    frames: Vec<BufferFrame>,
    /// Page ID to frame ID mapping.
    page_table: Mutex<HashMap<PageId, FrameId>>,
    /// List of free frame IDs.
    free_list: Mutex<Vec<FrameId>>,
    /// Page replacement policy.
    replacer: LruKReplacer,
}

impl BufferPoolManager {
    /// Creates a new buffer pool over `store` with `num_frames` frames
    /// and LRU-K history depth `k`.
    pub fn new(store: Arc<dyn PageStore>, num_frames: usize, k: usize) -> Self {
        let frames: Vec<_> = (0..num_frames)
            .map(|i| BufferFrame::new(FrameId(i as u32)))
            .collect();
        let free_list: Vec<_> = (0..num_frames).rev().map(|i| FrameId(i as u32)).collect();

        Self {
            store,
            frames,
            page_table: Mutex::new(HashMap::new()),
            free_list: Mutex::new(free_list),
            replacer: LruKReplacer::new(k),
        }
    }

    /// Returns the number of frames in the pool.
    pub fn num_frames(&self) -> usize {
        self.frames.len()
    }

    /// Returns the number of free frames.
    pub fn free_count(&self) -> usize {
        self.free_list.lock().len()
    }

    /// Checks if a page is resident in the buffer pool.
    pub fn contains(&self, page_id: PageId) -> bool {
        self.page_table.lock().contains_key(&page_id)
    }

    /// Returns the backing page store.
    pub fn store(&self) -> &Arc<dyn PageStore> {
        &self.store
    }

    /// Fetches a page, pinning it for the lifetime of the returned guard.
    ///
    /// On a miss the page is read from the store, evicting a victim
    /// frame if the pool is full. Fails with [`DbError::BufferPoolFull`]
    /// only when every frame is pinned.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PageGuard<'_>> {
        if let Some(&frame_id) = self.page_table.lock().get(&page_id) {
            let frame = &self.frames[frame_id.0 as usize];
            frame.pin();
            self.replacer.pin(frame_id);
            return Ok(PageGuard {
                pool: self,
                page_id,
                frame,
            });
        }

        let frame_id = self.allocate_frame()?;
        let frame = &self.frames[frame_id.0 as usize];

        let data = match self.store.read_page(page_id) {
            Ok(data) => data,
            Err(e) => {
                self.free_list.lock().push(frame_id);
                return Err(e);
            }
        };
        frame.copy_from(&data[..]);
        frame.set_page_id(Some(page_id));
        frame.pin();
        self.replacer.pin(frame_id);
        self.page_table.lock().insert(page_id, frame_id);

        Ok(PageGuard {
            pool: self,
            page_id,
            frame,
        })
    }

    /// Allocates a fresh page on the store and pins a zeroed frame for it.
    ///
    /// The new frame starts dirty so the page reaches disk even if the
    /// caller writes nothing.
    pub fn new_page(&self) -> Result<PageGuard<'_>> {
        let frame_id = self.allocate_frame()?;
        let frame = &self.frames[frame_id.0 as usize];

        let page_id = match self.store.allocate_page() {
            Ok(page_id) => page_id,
            Err(e) => {
                self.free_list.lock().push(frame_id);
                return Err(e);
            }
        };
        frame.set_page_id(Some(page_id));
        frame.set_dirty(true);
        frame.pin();
        self.replacer.pin(frame_id);
        self.page_table.lock().insert(page_id, frame_id);

        Ok(PageGuard {
            pool: self,
            page_id,
            frame,
        })
    }

    /// Finds a frame for a new resident page: free list first, then the
    /// replacer. A dirty victim is written back before its frame is
    /// reused.
    fn allocate_frame(&self) -> Result<FrameId> {
        if let Some(frame_id) = self.free_list.lock().pop() {
            return Ok(frame_id);
        }

        let frame_id = self.replacer.victim().ok_or(DbError::BufferPoolFull)?;
        let frame = &self.frames[frame_id.0 as usize];

        if let Some(old_page_id) = frame.page_id() {
            if frame.is_dirty() {
                let data = frame.read_data();
                self.store.write_page(old_page_id, &data)?;
            }
            self.page_table.lock().remove(&old_page_id);
            debug!(page_id = old_page_id, frame = frame_id.0, "evicted page");
        }
        frame.reset();
        Ok(frame_id)
    }

    /// Decrements a page's pin count, ORing `is_dirty` into the frame's
    /// dirty flag.
    ///
    /// Returns false (silently) if the page is not resident or already
    /// unpinned. When the pin count reaches zero the frame becomes
    /// evictable.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let frame_id = match self.page_table.lock().get(&page_id) {
            Some(&frame_id) => frame_id,
            None => return false,
        };
        let frame = &self.frames[frame_id.0 as usize];

        if is_dirty {
            frame.set_dirty(true);
        }
        if frame.pin_count() == 0 {
            return false;
        }
        if frame.unpin() == 0 {
            self.replacer.unpin(frame_id);
        }
        true
    }

    /// Writes a resident page back to the store, clearing its dirty flag.
    ///
    /// Returns true if a write happened.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        let frame_id = match self.page_table.lock().get(&page_id) {
            Some(&frame_id) => frame_id,
            None => return Ok(false),
        };
        let frame = &self.frames[frame_id.0 as usize];

        if !frame.is_dirty() {
            return Ok(false);
        }
        {
            let data = frame.read_data();
            self.store.write_page(page_id, &data)?;
        }
        frame.set_dirty(false);
        Ok(true)
    }

    /// Flushes all dirty resident pages. Returns the number flushed.
    pub fn flush_all(&self) -> Result<usize> {
        let resident: Vec<PageId> = self.page_table.lock().keys().copied().collect();
        let mut flushed = 0;
        for page_id in resident {
            if self.flush_page(page_id)? {
                flushed += 1;
            }
        }
        Ok(flushed)
    }

    /// Removes a page from the pool and returns it to the store's free
    /// list.
    ///
    /// Returns `Ok(false)` without side effects if the page is pinned.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        let mut page_table = self.page_table.lock();
        if let Some(&frame_id) = page_table.get(&page_id) {
            let frame = &self.frames[frame_id.0 as usize];
            if frame.is_pinned() {
                return Ok(false);
            }
            page_table.remove(&page_id);
            drop(page_table);

            self.replacer.remove(frame_id);
            frame.reset();
            self.free_list.lock().push(frame_id);
        } else {
            drop(page_table);
        }
        self.store.deallocate_page(page_id)?;
        Ok(true)
    }

    /// Diagnostic: true iff every resident frame has a zero pin count.
    pub fn check_all_unpinned(&self) -> bool {
        self.frames.iter().all(|frame| frame.pin_count() == 0)
    }
}

impl std::fmt::Debug for BufferPoolManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPoolManager")
            .field("num_frames", &self.num_frames())
            .field("free_frames", &self.free_count())
            .field("resident_pages", &self.page_table.lock().len())
            .finish()
    }
}

/// RAII pin on a buffer-pool page.
///
/// Read access goes through [`read`](PageGuard::read); [`write`]
/// (PageGuard::write) additionally marks the frame dirty. Dropping the
/// guard unpins the page.
pub struct PageGuard<'a> {
    pool: &'a BufferPoolManager,
    page_id: PageId,
    frame: &'a BufferFrame,
}

impl<'a> PageGuard<'a> {
    /// Returns the pinned page's id.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Returns read access to the page bytes.
    pub fn read(&self) -> MappedRwLockReadGuard<'_, [u8]> {
        RwLockReadGuard::map(self.frame.read_data(), |data| &data[..])
    }

    /// Returns write access to the page bytes, marking the frame dirty.
    pub fn write(&self) -> MappedRwLockWriteGuard<'_, [u8]> {
        self.frame.set_dirty(true);
        RwLockWriteGuard::map(self.frame.write_data(), |data| &mut data[..])
    }
}

impl Drop for PageGuard<'_> {
    fn drop(&mut self) {
        self.pool.unpin_page(self.page_id, false);
    }
}
