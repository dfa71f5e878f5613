//! Catalog management for OpalDB.
//!
//! The catalog maps names to table and index identifiers and mirrors all
//! of its state onto reserved page 1, flushed synchronously on every
//! mutation.

mod catalog;
mod meta;

pub use catalog::{CatalogManager, IndexInfo, LockManager, TableInfo};
pub use meta::{
    CatalogMeta, IndexMetadata, TableMetadata, CATALOG_META_MAGIC, INDEX_META_MAGIC,
    TABLE_META_MAGIC,
};
