//! JSON file subscriber backend
//!
//! The whole subscriber set lives in one document:
//!
//! ```json
//! { "subscribers": { "123456": { "subscribed_at": "2026-01-01T00:00:00Z" } } }
//! ```
//!
//! Every mutation rewrites the document through a temp file that is fsynced and
//! then renamed over the target, so a crash leaves either the old or the new
//! document on disk, never a torn one.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, instrument, trace};

use crate::{RecipientId, Subscriber};

use super::backend::SubscriberBackend;
use super::error::StorageResult;

#[derive(Debug, Default, Serialize, Deserialize)]
struct SubscriberDocument {
    #[serde(default)]
    subscribers: BTreeMap<RecipientId, SubscriberEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SubscriberEntry {
    subscribed_at: DateTime<Utc>,
}

pub struct FileBackend {
    path: PathBuf,

    /// Serializes read-modify-write cycles on the document
    write_lock: Mutex<()>,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_document(&self) -> StorageResult<SubscriberDocument> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                trace!("{} does not exist yet, starting empty", self.path.display());
                Ok(SubscriberDocument::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn parent_dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "subscribers".into());
        name.push(".tmp");
        self.parent_dir().join(name)
    }

    #[instrument(skip_all, fields(path = %self.path.display()))]
    async fn write_document(&self, document: &SubscriberDocument) -> StorageResult<()> {
        let bytes = serde_json::to_vec_pretty(document)?;
        let parent = self.parent_dir();
        tokio::fs::create_dir_all(&parent).await?;

        let temp_path = self.temp_path();
        let mut file = tokio::fs::File::create(&temp_path).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&temp_path, &self.path).await?;

        // the rename itself is only durable once the directory entry is flushed
        #[cfg(unix)]
        tokio::fs::File::open(&parent).await?.sync_all().await?;

        debug!(
            "persisted {} subscribers ({} bytes)",
            document.subscribers.len(),
            bytes.len()
        );
        Ok(())
    }
}

#[async_trait]
impl SubscriberBackend for FileBackend {
    async fn load(&self) -> StorageResult<Vec<Subscriber>> {
        let document = self.read_document().await?;
        Ok(document
            .subscribers
            .into_iter()
            .map(|(recipient_id, entry)| Subscriber {
                recipient_id,
                subscribed_at: entry.subscribed_at,
            })
            .collect())
    }

    async fn insert(&self, subscriber: &Subscriber) -> StorageResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut document = self.read_document().await?;
        document.subscribers.insert(
            subscriber.recipient_id.clone(),
            SubscriberEntry {
                subscribed_at: subscriber.subscribed_at,
            },
        );
        self.write_document(&document).await
    }

    async fn remove(&self, recipient_id: &RecipientId) -> StorageResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut document = self.read_document().await?;
        if document.subscribers.remove(recipient_id).is_none() {
            return Ok(());
        }
        self.write_document(&document).await
    }

    fn describe(&self) -> String {
        format!("json file at {}", self.path.display())
    }
}
