pub use self::config::StorageConfig;
pub use self::error::{StorageError, StorageResult};
pub use self::memory::MemoryStorage;
pub use self::models::*;
pub use self::persistent::PersistentStorage;
pub use self::traits::Storage;

pub mod persistent;

mod config;
mod error;
mod memory;
mod models;
mod traits;
