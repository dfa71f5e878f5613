//! Error types for OpalDB.

use thiserror::Error;

/// Result type alias using DbError.
pub type Result<T> = std::result::Result<T, DbError>;

/// Errors that can occur in OpalDB operations.
#[derive(Debug, Error)]
pub enum DbError {
    // I/O and resource errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("buffer pool full, unable to allocate frame")]
    BufferPoolFull,

    #[error("page not found: {0}")]
    PageNotFound(i32),

    #[error("page {page_id} corrupted: {reason}")]
    PageCorrupted { page_id: i32, reason: String },

    #[error("page full, unable to insert record")]
    PageFull,

    // B+ tree errors
    #[error("key not found")]
    KeyNotFound,

    #[error("duplicate key")]
    DuplicateKey,

    #[error("key too large: {size} bytes (max {max})")]
    KeyTooLarge { size: usize, max: usize },

    // Record errors
    #[error("record not found: {0}")]
    RecordNotFound(String),

    #[error("record too large: {size} bytes (page capacity {max})")]
    RecordTooLarge { size: usize, max: usize },

    // Catalog errors
    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("table already exists: {0}")]
    TableAlreadyExists(String),

    #[error("column not found: {0}")]
    ColumnNotFound(String),

    #[error("index not found: {0}")]
    IndexNotFound(String),

    #[error("index already exists: {0}")]
    IndexAlreadyExists(String),

    // Executor errors
    #[error("predicate error: {0}")]
    PredicateError(String),

    // Internal errors
    #[error("internal error: {0}")]
    Internal(String),
}
