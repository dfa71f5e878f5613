//! The catalog manager.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use opal_buffer::BufferPoolManager;
use opal_common::error::{DbError, Result};
use opal_common::page::{PageId, CATALOG_META_PAGE_ID};
use opal_common::types::TxnId;
use opal_storage::{BPlusTree, KeyCodec, Schema, TableHeap};

use crate::meta::{CatalogMeta, IndexMetadata, TableMetadata};

/// Lock-manager handle threaded through catalog mutations.
///
/// Unobserved by the storage core; reserved for latch coupling above
/// this layer.
#[derive(Debug, Default)]
pub struct LockManager;

/// A live table: its persistent metadata plus the open heap.
pub struct TableInfo {
    meta: TableMetadata,
    schema: Arc<Schema>,
    heap: TableHeap,
}

impl TableInfo {
    /// The table's id.
    pub fn table_id(&self) -> u32 {
        self.meta.table_id
    }

    /// The table's name.
    pub fn name(&self) -> &str {
        &self.meta.name
    }

    /// The table's schema.
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// The table's row storage.
    pub fn heap(&self) -> &TableHeap {
        &self.heap
    }

    /// First page of the heap chain.
    pub fn first_heap_page(&self) -> PageId {
        self.meta.first_heap_page
    }
}

/// A live index: its persistent metadata plus the open B+ tree.
pub struct IndexInfo {
    meta: IndexMetadata,
    tree: BPlusTree,
}

impl IndexInfo {
    /// The index's id.
    pub fn index_id(&self) -> u32 {
        self.meta.index_id
    }

    /// The index's name.
    pub fn name(&self) -> &str {
        &self.meta.name
    }

    /// Id of the indexed table.
    pub fn table_id(&self) -> u32 {
        self.meta.table_id
    }

    /// Key column positions in the table schema.
    pub fn key_columns(&self) -> &[u32] {
        &self.meta.key_column_indices
    }

    /// The underlying B+ tree.
    pub fn tree(&self) -> &BPlusTree {
        &self.tree
    }
}

/// Resolves names to tables and indexes, owning their live handles.
///
/// All mappings are mirrored to the catalog meta page (page 1), which is
/// flushed synchronously before any mutating operation returns.
pub struct CatalogManager {
    bpm: Arc<BufferPoolManager>,
    #[allow(dead_code)]
    lock_manager: Arc<LockManager>,
    meta: CatalogMeta,
    table_names: HashMap<String, u32>,
    tables: HashMap<u32, TableInfo>,
    /// table name -> (index name -> index id).
    index_names: HashMap<String, HashMap<String, u32>>,
    indexes: HashMap<u32, IndexInfo>,
    next_table_id: u32,
    next_index_id: u32,
}

impl CatalogManager {
    /// Initializes the catalog of a freshly created database.
    pub fn bootstrap(bpm: Arc<BufferPoolManager>, lock_manager: Arc<LockManager>) -> Result<Self> {
        let catalog = Self {
            bpm,
            lock_manager,
            meta: CatalogMeta::new(),
            table_names: HashMap::new(),
            tables: HashMap::new(),
            index_names: HashMap::new(),
            indexes: HashMap::new(),
            next_table_id: 0,
            next_index_id: 0,
        };
        catalog.flush_catalog_meta()?;
        Ok(catalog)
    }

    /// Opens the catalog of an existing database: decodes the meta page,
    /// then reloads every table and index.
    pub fn open(bpm: Arc<BufferPoolManager>, lock_manager: Arc<LockManager>) -> Result<Self> {
        let meta = {
            let guard = bpm.fetch_page(CATALOG_META_PAGE_ID)?;
            let page = guard.read();
            CatalogMeta::from_bytes(&page)?
        };

        let mut catalog = Self {
            bpm,
            lock_manager,
            next_table_id: meta.next_table_id(),
            next_index_id: meta.next_index_id(),
            meta,
            table_names: HashMap::new(),
            tables: HashMap::new(),
            index_names: HashMap::new(),
            indexes: HashMap::new(),
        };

        let table_pages: Vec<(u32, PageId)> = catalog
            .meta
            .table_meta_pages
            .iter()
            .map(|(&id, &page)| (id, page))
            .collect();
        for (table_id, page_id) in table_pages {
            catalog.load_table(table_id, page_id)?;
        }

        let index_pages: Vec<(u32, PageId)> = catalog
            .meta
            .index_meta_pages
            .iter()
            .map(|(&id, &page)| (id, page))
            .collect();
        for (index_id, page_id) in index_pages {
            catalog.load_index(index_id, page_id)?;
        }

        Ok(catalog)
    }

    /// Creates a table with an empty heap. Fails if the name is taken.
    pub fn create_table(
        &mut self,
        table_name: &str,
        schema: Schema,
        _txn: TxnId,
    ) -> Result<&TableInfo> {
        if self.table_names.contains_key(table_name) {
            return Err(DbError::TableAlreadyExists(table_name.to_string()));
        }

        let table_id = self.next_table_id;
        self.next_table_id += 1;

        let schema = Arc::new(schema);
        let heap = TableHeap::create(self.bpm.clone(), schema.clone())?;
        let meta = TableMetadata {
            table_id,
            name: table_name.to_string(),
            first_heap_page: heap.first_page_id(),
            schema: (*schema).clone(),
        };

        let meta_page_id = self.write_meta_page(&meta.to_bytes())?;
        self.meta.table_meta_pages.insert(table_id, meta_page_id);
        self.table_names.insert(table_name.to_string(), table_id);
        self.tables.insert(table_id, TableInfo { meta, schema, heap });

        self.flush_catalog_meta()?;
        info!(table = table_name, table_id, "created table");
        Ok(&self.tables[&table_id])
    }

    /// Drops a table, its heap pages, its metadata page, and every
    /// index built over it.
    pub fn drop_table(&mut self, table_name: &str) -> Result<()> {
        let table_id = *self
            .table_names
            .get(table_name)
            .ok_or_else(|| DbError::TableNotFound(table_name.to_string()))?;

        if let Some(index_map) = self.index_names.remove(table_name) {
            for (_, index_id) in index_map {
                if let Some(info) = self.indexes.remove(&index_id) {
                    info.tree.destroy()?;
                }
                if let Some(meta_page) = self.meta.index_meta_pages.remove(&index_id) {
                    self.bpm.delete_page(meta_page)?;
                }
            }
        }

        let info = self
            .tables
            .remove(&table_id)
            .ok_or_else(|| DbError::TableNotFound(table_name.to_string()))?;
        info.heap.free_pages()?;
        if let Some(meta_page) = self.meta.table_meta_pages.remove(&table_id) {
            self.bpm.delete_page(meta_page)?;
        }
        self.table_names.remove(table_name);

        self.flush_catalog_meta()?;
        info!(table = table_name, table_id, "dropped table");
        Ok(())
    }

    /// Creates an index over `key_columns` of `table_name` with an
    /// empty B+ tree.
    pub fn create_index(
        &mut self,
        table_name: &str,
        index_name: &str,
        key_columns: &[&str],
        _txn: TxnId,
    ) -> Result<&IndexInfo> {
        let table_id = *self
            .table_names
            .get(table_name)
            .ok_or_else(|| DbError::TableNotFound(table_name.to_string()))?;
        if self
            .index_names
            .get(table_name)
            .is_some_and(|map| map.contains_key(index_name))
        {
            return Err(DbError::IndexAlreadyExists(index_name.to_string()));
        }

        let table = &self.tables[&table_id];
        let mut key_column_indices = Vec::with_capacity(key_columns.len());
        for column_name in key_columns {
            let index = table
                .schema
                .column_index(column_name)
                .ok_or_else(|| DbError::ColumnNotFound(column_name.to_string()))?;
            key_column_indices.push(index as u32);
        }

        let index_id = self.next_index_id;
        self.next_index_id += 1;

        let positions: Vec<usize> = key_column_indices.iter().map(|&i| i as usize).collect();
        let codec = KeyCodec::new(&table.schema, &positions)?;
        let tree = BPlusTree::new(index_id, self.bpm.clone(), codec, None, None)?;

        let meta = IndexMetadata {
            index_id,
            name: index_name.to_string(),
            table_id,
            key_column_indices,
        };
        let meta_page_id = self.write_meta_page(&meta.to_bytes())?;
        self.meta.index_meta_pages.insert(index_id, meta_page_id);
        self.index_names
            .entry(table_name.to_string())
            .or_default()
            .insert(index_name.to_string(), index_id);
        self.indexes.insert(index_id, IndexInfo { meta, tree });

        self.flush_catalog_meta()?;
        info!(table = table_name, index = index_name, index_id, "created index");
        Ok(&self.indexes[&index_id])
    }

    /// Drops an index, destroying its tree and metadata page.
    pub fn drop_index(&mut self, table_name: &str, index_name: &str) -> Result<()> {
        if !self.table_names.contains_key(table_name) {
            return Err(DbError::TableNotFound(table_name.to_string()));
        }
        let index_map = self
            .index_names
            .get_mut(table_name)
            .ok_or_else(|| DbError::IndexNotFound(index_name.to_string()))?;
        let index_id = index_map
            .remove(index_name)
            .ok_or_else(|| DbError::IndexNotFound(index_name.to_string()))?;
        if index_map.is_empty() {
            self.index_names.remove(table_name);
        }

        if let Some(info) = self.indexes.remove(&index_id) {
            info.tree.destroy()?;
        }
        if let Some(meta_page) = self.meta.index_meta_pages.remove(&index_id) {
            self.bpm.delete_page(meta_page)?;
        }

        self.flush_catalog_meta()?;
        info!(table = table_name, index = index_name, "dropped index");
        Ok(())
    }

    /// Resolves a table by name.
    pub fn get_table(&self, table_name: &str) -> Result<&TableInfo> {
        let table_id = self
            .table_names
            .get(table_name)
            .ok_or_else(|| DbError::TableNotFound(table_name.to_string()))?;
        self.tables
            .get(table_id)
            .ok_or_else(|| DbError::TableNotFound(table_name.to_string()))
    }

    /// Resolves an index by table and index name.
    pub fn get_index(&self, table_name: &str, index_name: &str) -> Result<&IndexInfo> {
        if !self.table_names.contains_key(table_name) {
            return Err(DbError::TableNotFound(table_name.to_string()));
        }
        let index_id = self
            .index_names
            .get(table_name)
            .and_then(|map| map.get(index_name))
            .ok_or_else(|| DbError::IndexNotFound(index_name.to_string()))?;
        self.indexes
            .get(index_id)
            .ok_or_else(|| DbError::IndexNotFound(index_name.to_string()))
    }

    /// Every index of a table.
    pub fn get_table_indexes(&self, table_name: &str) -> Result<Vec<&IndexInfo>> {
        if !self.table_names.contains_key(table_name) {
            return Err(DbError::TableNotFound(table_name.to_string()));
        }
        let mut result = Vec::new();
        if let Some(index_map) = self.index_names.get(table_name) {
            for index_id in index_map.values() {
                let info = self
                    .indexes
                    .get(index_id)
                    .ok_or_else(|| DbError::Internal(format!("index {} missing", index_id)))?;
                result.push(info);
            }
        }
        Ok(result)
    }

    /// Serializes the catalog meta onto page 1 and forces it to disk.
    pub fn flush_catalog_meta(&self) -> Result<()> {
        {
            let guard = self.bpm.fetch_page(CATALOG_META_PAGE_ID)?;
            let bytes = self.meta.to_bytes();
            let mut page = guard.write();
            page[..bytes.len()].copy_from_slice(&bytes);
        }
        self.bpm.flush_page(CATALOG_META_PAGE_ID)?;
        Ok(())
    }

    /// Writes a metadata blob onto a freshly allocated page.
    fn write_meta_page(&self, bytes: &[u8]) -> Result<PageId> {
        let guard = self.bpm.new_page()?;
        let mut page = guard.write();
        page[..bytes.len()].copy_from_slice(bytes);
        Ok(guard.page_id())
    }

    fn load_table(&mut self, table_id: u32, page_id: PageId) -> Result<()> {
        let meta = {
            let guard = self.bpm.fetch_page(page_id)?;
            let page = guard.read();
            TableMetadata::from_bytes(&page, page_id)?
        };
        if meta.table_id != table_id {
            return Err(DbError::PageCorrupted {
                page_id,
                reason: format!(
                    "table metadata id {} does not match catalog entry {}",
                    meta.table_id, table_id
                ),
            });
        }

        let schema = Arc::new(meta.schema.clone());
        let heap = TableHeap::open(self.bpm.clone(), meta.first_heap_page, schema.clone());
        self.table_names.insert(meta.name.clone(), table_id);
        self.tables.insert(table_id, TableInfo { meta, schema, heap });
        Ok(())
    }

    fn load_index(&mut self, index_id: u32, page_id: PageId) -> Result<()> {
        let meta = {
            let guard = self.bpm.fetch_page(page_id)?;
            let page = guard.read();
            IndexMetadata::from_bytes(&page, page_id)?
        };
        if meta.index_id != index_id {
            return Err(DbError::PageCorrupted {
                page_id,
                reason: format!(
                    "index metadata id {} does not match catalog entry {}",
                    meta.index_id, index_id
                ),
            });
        }

        let table = self
            .tables
            .get(&meta.table_id)
            .ok_or_else(|| DbError::TableNotFound(format!("table #{}", meta.table_id)))?;
        let positions: Vec<usize> = meta.key_column_indices.iter().map(|&i| i as usize).collect();
        let codec = KeyCodec::new(&table.schema, &positions)?;
        // The tree handle resolves its root through the index-roots
        // directory.
        let tree = BPlusTree::new(index_id, self.bpm.clone(), codec, None, None)?;

        let table_name = table.meta.name.clone();
        self.index_names
            .entry(table_name)
            .or_default()
            .insert(meta.name.clone(), index_id);
        self.indexes.insert(index_id, IndexInfo { meta, tree });
        Ok(())
    }
}
