//! Durable subscriber registry
//!
//! All mutations go through one async mutex (single writer). A change is written
//! to the backend first and only applied to the in-memory set once the backend
//! confirms, so a failed write never leaves memory and disk disagreeing.

use std::collections::HashMap;

use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::storage::{StorageResult, SubscriberBackend};
use crate::{RecipientId, Subscriber};

pub struct SubscriberStore {
    backend: Box<dyn SubscriberBackend>,
    subscribers: Mutex<HashMap<RecipientId, Subscriber>>,
}

impl SubscriberStore {
    /// Reload every persisted subscriber from `backend`
    #[instrument(skip_all)]
    pub async fn open(backend: Box<dyn SubscriberBackend>) -> StorageResult<Self> {
        let loaded = backend.load().await?;
        info!(
            "loaded {} subscribers from {}",
            loaded.len(),
            backend.describe()
        );

        let subscribers = loaded
            .into_iter()
            .map(|s| (s.recipient_id.clone(), s))
            .collect();

        Ok(Self {
            backend,
            subscribers: Mutex::new(subscribers),
        })
    }

    /// Register `id`. Returns `true` if it was not subscribed before.
    #[instrument(skip(self))]
    pub async fn add(&self, id: RecipientId) -> StorageResult<bool> {
        let mut subscribers = self.subscribers.lock().await;
        if subscribers.contains_key(&id) {
            debug!("{id} already subscribed");
            return Ok(false);
        }

        let subscriber = Subscriber::new(id);
        if let Err(e) = self.backend.insert(&subscriber).await {
            warn!("failed to persist subscription of {}: {e}", subscriber.recipient_id);
            return Err(e);
        }

        info!("{} subscribed", subscriber.recipient_id);
        subscribers.insert(subscriber.recipient_id.clone(), subscriber);
        Ok(true)
    }

    /// Unregister `id`. Returns `true` if it was subscribed.
    #[instrument(skip(self))]
    pub async fn remove(&self, id: &RecipientId) -> StorageResult<bool> {
        let mut subscribers = self.subscribers.lock().await;
        if !subscribers.contains_key(id) {
            debug!("{id} was not subscribed");
            return Ok(false);
        }

        if let Err(e) = self.backend.remove(id).await {
            warn!("failed to persist removal of {id}: {e}");
            return Err(e);
        }

        info!("{id} unsubscribed");
        subscribers.remove(id);
        Ok(true)
    }

    /// Point-in-time copy of all subscribers, in no particular order
    pub async fn list_all(&self) -> Vec<Subscriber> {
        self.subscribers.lock().await.values().cloned().collect()
    }

    pub async fn contains(&self, id: &RecipientId) -> bool {
        self.subscribers.lock().await.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.subscribers.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
