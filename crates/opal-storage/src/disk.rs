//! Disk manager for page-level file I/O.

use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use opal_buffer::PageStore;
use opal_common::error::{DbError, Result};
use opal_common::page::{PageId, PAGE_SIZE};
use opal_common::StorageConfig;

/// Configuration for the disk manager.
#[derive(Debug, Clone)]
pub struct DiskManagerConfig {
    /// Path to the data file.
    pub data_path: PathBuf,
    /// Enable fsync after writes.
    pub fsync_enabled: bool,
}

impl Default for DiskManagerConfig {
    fn default() -> Self {
        let storage = StorageConfig::default();
        Self {
            data_path: storage.data_path,
            fsync_enabled: storage.fsync_enabled,
        }
    }
}

impl From<&StorageConfig> for DiskManagerConfig {
    fn from(config: &StorageConfig) -> Self {
        Self {
            data_path: config.data_path.clone(),
            fsync_enabled: config.fsync_enabled,
        }
    }
}

/// Manages reading and writing pages of a single data file.
///
/// Pages live at `page_id * PAGE_SIZE`. Pages 0 and 1 are reserved (the
/// index-roots directory and the catalog meta page) and are created
/// zeroed when the file is first opened. Freed page ids go onto an
/// in-run free list and are handed out again by later allocations.
pub struct DiskManager {
    config: DiskManagerConfig,
    inner: Mutex<DiskInner>,
}

struct DiskInner {
    file: File,
    num_pages: u32,
    free_list: Vec<PageId>,
}

/// Number of reserved pages at the front of the file.
const RESERVED_PAGES: u32 = 2;

impl DiskManager {
    /// Opens (or creates) the data file, reserving pages 0 and 1.
    pub fn open(config: DiskManagerConfig) -> Result<Self> {
        if let Some(parent) = config.data_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&config.data_path)?;

        let file_size = file.metadata()?.len();
        let mut num_pages = (file_size / PAGE_SIZE as u64) as u32;

        while num_pages < RESERVED_PAGES {
            file.seek(SeekFrom::Start(num_pages as u64 * PAGE_SIZE as u64))?;
            file.write_all(&[0u8; PAGE_SIZE])?;
            num_pages += 1;
        }
        if config.fsync_enabled {
            file.sync_all()?;
        }

        Ok(Self {
            config,
            inner: Mutex::new(DiskInner {
                file,
                num_pages,
                free_list: Vec::new(),
            }),
        })
    }

    /// Returns the data file path.
    pub fn data_path(&self) -> &Path {
        &self.config.data_path
    }

    /// Total pages in the file, including reserved and freed ones.
    pub fn num_pages(&self) -> u32 {
        self.inner.lock().num_pages
    }

    /// Pages currently allocated to callers: everything past the
    /// reserved prefix minus the free list. Diagnostic for leak tests.
    pub fn allocated_pages(&self) -> u32 {
        let inner = self.inner.lock();
        inner.num_pages - RESERVED_PAGES - inner.free_list.len() as u32
    }

    fn check_bounds(inner: &DiskInner, page_id: PageId) -> Result<()> {
        if page_id < 0 || page_id as u32 >= inner.num_pages {
            return Err(DbError::PageNotFound(page_id));
        }
        Ok(())
    }
}

impl PageStore for DiskManager {
    fn allocate_page(&self) -> Result<PageId> {
        let mut inner = self.inner.lock();

        if let Some(page_id) = inner.free_list.pop() {
            debug!(page_id, "reallocated freed page");
            return Ok(page_id);
        }

        let page_id = inner.num_pages as PageId;
        let offset = inner.num_pages as u64 * PAGE_SIZE as u64;
        inner.file.seek(SeekFrom::Start(offset))?;
        inner.file.write_all(&[0u8; PAGE_SIZE])?;
        if self.config.fsync_enabled {
            inner.file.sync_all()?;
        }
        inner.num_pages += 1;

        debug!(page_id, "allocated page");
        Ok(page_id)
    }

    fn deallocate_page(&self, page_id: PageId) -> Result<()> {
        let mut inner = self.inner.lock();
        Self::check_bounds(&inner, page_id)?;
        if (page_id as u32) < RESERVED_PAGES {
            return Err(DbError::Internal(format!(
                "cannot deallocate reserved page {}",
                page_id
            )));
        }
        debug_assert!(!inner.free_list.contains(&page_id), "double free");
        inner.free_list.push(page_id);
        debug!(page_id, "deallocated page");
        Ok(())
    }

    fn read_page(&self, page_id: PageId) -> Result<Box<[u8; PAGE_SIZE]>> {
        let mut inner = self.inner.lock();
        Self::check_bounds(&inner, page_id)?;

        let offset = page_id as u64 * PAGE_SIZE as u64;
        inner.file.seek(SeekFrom::Start(offset))?;

        let mut buffer = Box::new([0u8; PAGE_SIZE]);
        inner.file.read_exact(&mut buffer[..])?;
        Ok(buffer)
    }

    fn write_page(&self, page_id: PageId, data: &[u8; PAGE_SIZE]) -> Result<()> {
        let mut inner = self.inner.lock();
        Self::check_bounds(&inner, page_id)?;

        let offset = page_id as u64 * PAGE_SIZE as u64;
        inner.file.seek(SeekFrom::Start(offset))?;
        inner.file.write_all(data)?;
        if self.config.fsync_enabled {
            inner.file.sync_all()?;
        }
        Ok(())
    }
}

impl Drop for DiskManager {
    fn drop(&mut self) {
        let _ = self.inner.lock().file.sync_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn create_test_disk_manager() -> (DiskManager, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let config = DiskManagerConfig {
            data_path: dir.path().join("opal.db"),
            fsync_enabled: false,
        };
        let dm = DiskManager::open(config).unwrap();
        (dm, dir)
    }

    #[test]
    fn test_reserved_pages_exist() {
        let (dm, _dir) = create_test_disk_manager();
        assert_eq!(dm.num_pages(), 2);
        assert_eq!(dm.allocated_pages(), 0);
        // Reserved pages are readable and zeroed.
        assert_eq!(dm.read_page(0).unwrap()[0], 0);
        assert_eq!(dm.read_page(1).unwrap()[0], 0);
    }

    #[test]
    fn test_allocate_starts_after_reserved() {
        let (dm, _dir) = create_test_disk_manager();
        assert_eq!(dm.allocate_page().unwrap(), 2);
        assert_eq!(dm.allocate_page().unwrap(), 3);
        assert_eq!(dm.allocated_pages(), 2);
    }

    #[test]
    fn test_write_read_roundtrip() {
        let (dm, _dir) = create_test_disk_manager();
        let page_id = dm.allocate_page().unwrap();

        let mut data = [0u8; PAGE_SIZE];
        data[0] = 0xAB;
        data[PAGE_SIZE - 1] = 0xEF;
        dm.write_page(page_id, &data).unwrap();

        let read = dm.read_page(page_id).unwrap();
        assert_eq!(read[0], 0xAB);
        assert_eq!(read[PAGE_SIZE - 1], 0xEF);
    }

    #[test]
    fn test_free_list_reuse() {
        let (dm, _dir) = create_test_disk_manager();
        let a = dm.allocate_page().unwrap();
        let _b = dm.allocate_page().unwrap();

        dm.deallocate_page(a).unwrap();
        assert_eq!(dm.allocated_pages(), 1);
        assert_eq!(dm.allocate_page().unwrap(), a);
        assert_eq!(dm.allocated_pages(), 2);
    }

    #[test]
    fn test_deallocate_reserved_fails() {
        let (dm, _dir) = create_test_disk_manager();
        assert!(dm.deallocate_page(0).is_err());
        assert!(dm.deallocate_page(1).is_err());
    }

    #[test]
    fn test_read_out_of_bounds() {
        let (dm, _dir) = create_test_disk_manager();
        assert!(matches!(dm.read_page(99), Err(DbError::PageNotFound(99))));
        assert!(matches!(dm.read_page(-1), Err(DbError::PageNotFound(-1))));
    }

    #[test]
    fn test_persistence_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("opal.db");
        let page_id;

        {
            let dm = DiskManager::open(DiskManagerConfig {
                data_path: path.clone(),
                fsync_enabled: true,
            })
            .unwrap();
            page_id = dm.allocate_page().unwrap();
            let mut data = [0u8; PAGE_SIZE];
            data[0] = 0xFF;
            dm.write_page(page_id, &data).unwrap();
        }

        {
            let dm = DiskManager::open(DiskManagerConfig {
                data_path: path,
                fsync_enabled: true,
            })
            .unwrap();
            assert_eq!(dm.num_pages(), 3);
            assert_eq!(dm.read_page(page_id).unwrap()[0], 0xFF);
        }
    }
}
