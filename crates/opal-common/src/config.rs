//! Configuration structures for OpalDB.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Storage configuration for the database engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the data file.
    pub data_path: PathBuf,
    /// Buffer pool size in number of frames.
    pub buffer_pool_frames: usize,
    /// LRU-K history depth: a frame is promoted to the main list after
    /// `replacer_k` returns to the pool.
    pub replacer_k: usize,
    /// Enable fsync for page writes.
    pub fsync_enabled: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from("./data/opal.db"),
            buffer_pool_frames: 1024,
            replacer_k: 2,
            fsync_enabled: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StorageConfig::default();
        assert_eq!(config.data_path, PathBuf::from("./data/opal.db"));
        assert_eq!(config.buffer_pool_frames, 1024);
        assert_eq!(config.replacer_k, 2);
        assert!(config.fsync_enabled);
    }

    #[test]
    fn test_serde_roundtrip() {
        let original = StorageConfig {
            data_path: PathBuf::from("/tmp/test.db"),
            buffer_pool_frames: 64,
            replacer_k: 3,
            fsync_enabled: false,
        };
        let serialized = serde_json::to_string(&original).unwrap();
        let deserialized: StorageConfig = serde_json::from_str(&serialized).unwrap();

        assert_eq!(original.data_path, deserialized.data_path);
        assert_eq!(original.buffer_pool_frames, deserialized.buffer_pool_frames);
        assert_eq!(original.replacer_k, deserialized.replacer_k);
        assert_eq!(original.fsync_enabled, deserialized.fsync_enabled);
    }
}
