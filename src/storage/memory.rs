//! In-memory subscriber backend (no persistence)
//!
//! Useful for tests and for running without a writable data directory.
//! All subscribers are lost on restart.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::{RecipientId, Subscriber};

use super::backend::SubscriberBackend;
use super::error::StorageResult;

#[derive(Default)]
pub struct MemoryBackend {
    subscribers: RwLock<HashMap<RecipientId, Subscriber>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend pre-populated with `subscribers`
    pub fn with_subscribers(subscribers: impl IntoIterator<Item = Subscriber>) -> Self {
        let subscribers = subscribers
            .into_iter()
            .map(|s| (s.recipient_id.clone(), s))
            .collect();
        Self {
            subscribers: RwLock::new(subscribers),
        }
    }
}

#[async_trait]
impl SubscriberBackend for MemoryBackend {
    async fn load(&self) -> StorageResult<Vec<Subscriber>> {
        Ok(self.subscribers.read().await.values().cloned().collect())
    }

    async fn insert(&self, subscriber: &Subscriber) -> StorageResult<()> {
        debug!("in-memory backend: insert {}", subscriber.recipient_id);
        self.subscribers
            .write()
            .await
            .insert(subscriber.recipient_id.clone(), subscriber.clone());
        Ok(())
    }

    async fn remove(&self, recipient_id: &RecipientId) -> StorageResult<()> {
        debug!("in-memory backend: remove {recipient_id}");
        self.subscribers.write().await.remove(recipient_id);
        Ok(())
    }

    fn describe(&self) -> String {
        "in-memory (no persistence)".to_string()
    }
}
