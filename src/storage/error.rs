//! Failures of the subscriber store's persistence layer

use std::fmt;

pub type StorageResult<T> = Result<T, StorageError>;

/// Why a subscriber could not be loaded or persisted
///
/// A failed write leaves the in-memory set untouched, and the command that caused
/// it reports the failure to the user.
#[derive(Debug)]
pub enum StorageError {
    /// The SQLite file could not be opened
    ConnectionFailed(String),

    /// A SQLite statement failed
    QueryFailed(String),

    /// The embedded schema could not be applied
    MigrationFailed(String),

    /// The configured backend cannot be built, e.g. a path that names no file
    InvalidConfig(String),

    /// A stored document or column could not be encoded or decoded
    SerializationError(String),

    /// Reading, replacing or syncing a file failed
    IoError(std::io::Error),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::ConnectionFailed(msg) => write!(f, "cannot open subscriber database: {msg}"),
            StorageError::QueryFailed(msg) => write!(f, "subscriber query failed: {msg}"),
            StorageError::MigrationFailed(msg) => {
                write!(f, "subscriber schema migration failed: {msg}")
            }
            StorageError::InvalidConfig(msg) => write!(f, "unusable storage settings: {msg}"),
            StorageError::SerializationError(msg) => write!(f, "corrupt subscriber data: {msg}"),
            StorageError::IoError(err) => write!(f, "subscriber file I/O failed: {err}"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::IoError(err)
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::SerializationError(err.to_string())
    }
}

#[cfg(feature = "storage-sqlite")]
impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(io_err) => StorageError::IoError(io_err),
            sqlx::Error::RowNotFound => StorageError::QueryFailed("no rows found".to_string()),
            _ => StorageError::QueryFailed(err.to_string()),
        }
    }
}

#[cfg(feature = "storage-sqlite")]
impl From<sqlx::migrate::MigrateError> for StorageError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StorageError::MigrationFailed(err.to_string())
    }
}
