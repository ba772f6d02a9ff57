#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("failed to open database: {0}")]
    Open(String),
    #[error("rocksdb error")]
    RocksDb(#[from] weedb::rocksdb::Error),
    #[error("failed to encode or decode a record")]
    Serde(#[from] serde_json::Error),
    #[error("corrupted entry in `{table}`")]
    Corrupted { table: &'static str },
    #[error("io error")]
    Io(#[from] std::io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;
