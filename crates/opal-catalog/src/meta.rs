//! On-disk codecs for catalog, table, and index metadata.

use std::collections::BTreeMap;

use opal_common::error::{DbError, Result};
use opal_common::page::{PageId, CATALOG_META_PAGE_ID, PAGE_SIZE};
use opal_storage::Schema;

/// Magic value leading the catalog meta page.
pub const CATALOG_META_MAGIC: u32 = u32::from_le_bytes(*b"OCAT");
/// Magic value leading every table metadata page.
pub const TABLE_META_MAGIC: u32 = u32::from_le_bytes(*b"OTBL");
/// Magic value leading every index metadata page.
pub const INDEX_META_MAGIC: u32 = u32::from_le_bytes(*b"OIDX");

fn read_u32(buf: &[u8], offset: usize) -> Result<u32> {
    if buf.len() < offset + 4 {
        return Err(DbError::Internal("truncated metadata".into()));
    }
    Ok(u32::from_le_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ]))
}

fn read_string(buf: &[u8], offset: usize) -> Result<(String, usize)> {
    let len = read_u32(buf, offset)? as usize;
    let start = offset + 4;
    if buf.len() < start + len {
        return Err(DbError::Internal("truncated metadata".into()));
    }
    let text = String::from_utf8(buf[start..start + len].to_vec())
        .map_err(|_| DbError::Internal("metadata name is not UTF-8".into()))?;
    Ok((text, 4 + len))
}

fn write_string(buf: &mut Vec<u8>, text: &str) {
    buf.extend_from_slice(&(text.len() as u32).to_le_bytes());
    buf.extend_from_slice(text.as_bytes());
}

/// The catalog meta page: maps table and index ids to the pages holding
/// their metadata.
///
/// Layout: `magic, n_tables, n_indexes` then `(table_id, meta_page)`
/// pairs and `(index_id, meta_page)` pairs, each sorted by id so that
/// serialization is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogMeta {
    /// table_id -> page holding its `TableMetadata`.
    pub table_meta_pages: BTreeMap<u32, PageId>,
    /// index_id -> page holding its `IndexMetadata`.
    pub index_meta_pages: BTreeMap<u32, PageId>,
}

impl CatalogMeta {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialized size in bytes.
    pub fn serialized_size(&self) -> usize {
        12 + 8 * (self.table_meta_pages.len() + self.index_meta_pages.len())
    }

    /// Next unused table id.
    pub fn next_table_id(&self) -> u32 {
        self.table_meta_pages
            .keys()
            .next_back()
            .map_or(0, |id| id + 1)
    }

    /// Next unused index id.
    pub fn next_index_id(&self) -> u32 {
        self.index_meta_pages
            .keys()
            .next_back()
            .map_or(0, |id| id + 1)
    }

    /// Serializes the catalog meta. The result always fits the meta
    /// page.
    pub fn to_bytes(&self) -> Vec<u8> {
        debug_assert!(self.serialized_size() <= PAGE_SIZE);
        let mut buf = Vec::with_capacity(self.serialized_size());
        buf.extend_from_slice(&CATALOG_META_MAGIC.to_le_bytes());
        buf.extend_from_slice(&(self.table_meta_pages.len() as u32).to_le_bytes());
        buf.extend_from_slice(&(self.index_meta_pages.len() as u32).to_le_bytes());
        for (&id, &page) in &self.table_meta_pages {
            buf.extend_from_slice(&id.to_le_bytes());
            buf.extend_from_slice(&page.to_le_bytes());
        }
        for (&id, &page) in &self.index_meta_pages {
            buf.extend_from_slice(&id.to_le_bytes());
            buf.extend_from_slice(&page.to_le_bytes());
        }
        buf
    }

    /// Deserializes the catalog meta, asserting the magic value.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        let magic = read_u32(buf, 0)?;
        if magic != CATALOG_META_MAGIC {
            return Err(DbError::PageCorrupted {
                page_id: CATALOG_META_PAGE_ID,
                reason: format!("bad catalog magic {:#x}", magic),
            });
        }
        let n_tables = read_u32(buf, 4)? as usize;
        let n_indexes = read_u32(buf, 8)? as usize;

        let mut meta = CatalogMeta::new();
        let mut offset = 12;
        for _ in 0..n_tables {
            let id = read_u32(buf, offset)?;
            let page = read_u32(buf, offset + 4)? as PageId;
            meta.table_meta_pages.insert(id, page);
            offset += 8;
        }
        for _ in 0..n_indexes {
            let id = read_u32(buf, offset)?;
            let page = read_u32(buf, offset + 4)? as PageId;
            meta.index_meta_pages.insert(id, page);
            offset += 8;
        }
        Ok(meta)
    }
}

/// Per-table metadata, stored on its own dedicated page.
#[derive(Debug, Clone, PartialEq)]
pub struct TableMetadata {
    pub table_id: u32,
    pub name: String,
    pub first_heap_page: PageId,
    pub schema: Schema,
}

impl TableMetadata {
    /// Serializes the table metadata.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&TABLE_META_MAGIC.to_le_bytes());
        buf.extend_from_slice(&self.table_id.to_le_bytes());
        write_string(&mut buf, &self.name);
        buf.extend_from_slice(&self.first_heap_page.to_le_bytes());
        self.schema.serialize_into(&mut buf);
        buf
    }

    /// Deserializes table metadata from its page.
    pub fn from_bytes(buf: &[u8], page_id: PageId) -> Result<Self> {
        let magic = read_u32(buf, 0)?;
        if magic != TABLE_META_MAGIC {
            return Err(DbError::PageCorrupted {
                page_id,
                reason: format!("bad table metadata magic {:#x}", magic),
            });
        }
        let table_id = read_u32(buf, 4)?;
        let (name, name_len) = read_string(buf, 8)?;
        let mut offset = 8 + name_len;
        let first_heap_page = read_u32(buf, offset)? as PageId;
        offset += 4;
        let (schema, _) = Schema::deserialize(&buf[offset..])?;
        Ok(Self {
            table_id,
            name,
            first_heap_page,
            schema,
        })
    }
}

/// Per-index metadata, stored on its own dedicated page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexMetadata {
    pub index_id: u32,
    pub name: String,
    pub table_id: u32,
    /// Indices of the key columns in the owning table's schema.
    pub key_column_indices: Vec<u32>,
}

impl IndexMetadata {
    /// Serializes the index metadata.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&INDEX_META_MAGIC.to_le_bytes());
        buf.extend_from_slice(&self.index_id.to_le_bytes());
        write_string(&mut buf, &self.name);
        buf.extend_from_slice(&self.table_id.to_le_bytes());
        buf.extend_from_slice(&(self.key_column_indices.len() as u32).to_le_bytes());
        for &column in &self.key_column_indices {
            buf.extend_from_slice(&column.to_le_bytes());
        }
        buf
    }

    /// Deserializes index metadata from its page.
    pub fn from_bytes(buf: &[u8], page_id: PageId) -> Result<Self> {
        let magic = read_u32(buf, 0)?;
        if magic != INDEX_META_MAGIC {
            return Err(DbError::PageCorrupted {
                page_id,
                reason: format!("bad index metadata magic {:#x}", magic),
            });
        }
        let index_id = read_u32(buf, 4)?;
        let (name, name_len) = read_string(buf, 8)?;
        let mut offset = 8 + name_len;
        let table_id = read_u32(buf, offset)?;
        offset += 4;
        let key_count = read_u32(buf, offset)? as usize;
        offset += 4;
        let mut key_column_indices = Vec::with_capacity(key_count);
        for _ in 0..key_count {
            key_column_indices.push(read_u32(buf, offset)?);
            offset += 4;
        }
        Ok(Self {
            index_id,
            name,
            table_id,
            key_column_indices,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opal_common::types::TypeId;
    use opal_storage::Column;

    #[test]
    fn test_catalog_meta_roundtrip() {
        let mut meta = CatalogMeta::new();
        meta.table_meta_pages.insert(0, 5);
        meta.table_meta_pages.insert(1, 9);
        meta.index_meta_pages.insert(0, 12);

        let bytes = meta.to_bytes();
        assert_eq!(bytes.len(), meta.serialized_size());
        let decoded = CatalogMeta::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, meta);
    }

    #[test]
    fn test_catalog_meta_serialization_is_deterministic() {
        let mut a = CatalogMeta::new();
        a.table_meta_pages.insert(3, 30);
        a.table_meta_pages.insert(1, 10);
        a.index_meta_pages.insert(2, 20);

        // Same mappings inserted in a different order.
        let mut b = CatalogMeta::new();
        b.index_meta_pages.insert(2, 20);
        b.table_meta_pages.insert(1, 10);
        b.table_meta_pages.insert(3, 30);

        assert_eq!(a.to_bytes(), b.to_bytes());
        assert_eq!(a.to_bytes(), a.to_bytes());
    }

    #[test]
    fn test_catalog_meta_bad_magic() {
        let mut bytes = CatalogMeta::new().to_bytes();
        bytes[0] ^= 0xFF;
        assert!(matches!(
            CatalogMeta::from_bytes(&bytes),
            Err(DbError::PageCorrupted { .. })
        ));
    }

    #[test]
    fn test_next_ids() {
        let mut meta = CatalogMeta::new();
        assert_eq!(meta.next_table_id(), 0);
        assert_eq!(meta.next_index_id(), 0);

        meta.table_meta_pages.insert(4, 2);
        meta.index_meta_pages.insert(7, 3);
        assert_eq!(meta.next_table_id(), 5);
        assert_eq!(meta.next_index_id(), 8);
    }

    #[test]
    fn test_table_metadata_roundtrip() {
        let meta = TableMetadata {
            table_id: 3,
            name: "accounts".to_string(),
            first_heap_page: 17,
            schema: Schema::new(vec![
                Column::new("id", TypeId::Int64, false),
                Column::char("owner", 24, true),
            ]),
        };
        let bytes = meta.to_bytes();
        let decoded = TableMetadata::from_bytes(&bytes, 2).unwrap();
        assert_eq!(decoded, meta);
    }

    #[test]
    fn test_index_metadata_roundtrip() {
        let meta = IndexMetadata {
            index_id: 2,
            name: "idx_owner".to_string(),
            table_id: 3,
            key_column_indices: vec![1, 0],
        };
        let bytes = meta.to_bytes();
        let decoded = IndexMetadata::from_bytes(&bytes, 4).unwrap();
        assert_eq!(decoded, meta);
    }

    #[test]
    fn test_metadata_magic_mismatch() {
        let table = TableMetadata {
            table_id: 0,
            name: "t".to_string(),
            first_heap_page: 2,
            schema: Schema::new(vec![Column::new("a", TypeId::Int32, false)]),
        };
        // A table page does not decode as an index page.
        assert!(IndexMetadata::from_bytes(&table.to_bytes(), 9).is_err());
    }
}
