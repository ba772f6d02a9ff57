use std::path::PathBuf;
use std::sync::Arc;

use bytesize::ByteSize;
use serde::{Deserialize, Serialize};

use crate::error::StorageResult;
use crate::memory::MemoryStorage;
use crate::persistent::PersistentStorage;
use crate::traits::Storage;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct StorageConfig {
    /// Path to the RocksDB directory.
    ///
    /// Default: `None` (in-memory storage).
    pub path: Option<PathBuf>,

    /// `RocksDB` LRU cache capacity.
    ///
    /// Default: 64 MiB.
    pub rocksdb_lru_capacity: ByteSize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: None,
            rocksdb_lru_capacity: ByteSize::mib(64),
        }
    }
}

impl StorageConfig {
    pub fn open(&self) -> StorageResult<Arc<dyn Storage>> {
        Ok(match &self.path {
            Some(path) => Arc::new(PersistentStorage::open(path, self.rocksdb_lru_capacity)?),
            None => {
                tracing::warn!("no storage path configured, using in-memory storage");
                Arc::new(MemoryStorage::new())
            }
        })
    }
}
