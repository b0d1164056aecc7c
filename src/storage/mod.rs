//! Subscriber persistence backends
//!
//! - **File** (default): one JSON document, atomically replaced on every change
//! - **SQLite**: embedded database, behind the `storage-sqlite` feature
//! - **In-Memory**: no persistence, for tests

pub mod backend;
pub mod error;
pub mod file;
pub mod memory;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

pub use backend::SubscriberBackend;
pub use error::{StorageError, StorageResult};

use std::path::Path;

use crate::config::StorageConfig;

/// Both file-based backends need a path that names a file, not a directory
fn require_file_name(path: &Path) -> StorageResult<()> {
    match path.file_name() {
        Some(_) => Ok(()),
        None => Err(StorageError::InvalidConfig(format!(
            "storage path {:?} does not name a file",
            path.display().to_string()
        ))),
    }
}

/// Build the backend selected in the configuration
pub async fn open_backend(config: &StorageConfig) -> StorageResult<Box<dyn SubscriberBackend>> {
    match config {
        StorageConfig::None => Ok(Box::new(memory::MemoryBackend::new())),
        StorageConfig::File { path } => {
            require_file_name(path)?;
            Ok(Box::new(file::FileBackend::new(path.clone())))
        }
        #[cfg(feature = "storage-sqlite")]
        StorageConfig::Sqlite { path } => {
            require_file_name(path)?;
            Ok(Box::new(sqlite::SqliteBackend::new(path).await?))
        }
        #[cfg(not(feature = "storage-sqlite"))]
        StorageConfig::Sqlite { .. } => Err(StorageError::InvalidConfig(
            "sqlite backend requested but the storage-sqlite feature is disabled".to_string(),
        )),
    }
}
