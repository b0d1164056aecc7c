//! Subscriber backend trait definition

use async_trait::async_trait;

use crate::{RecipientId, Subscriber};

use super::error::StorageResult;

/// Durable keyed record set holding one entry per recipient
///
/// Callers serialize mutations (see [`crate::subscribers::SubscriberStore`]), so
/// implementations only have to guarantee that a successful return means the
/// change is on stable storage and that a crash mid-write leaves the previous
/// state intact.
#[async_trait]
pub trait SubscriberBackend: Send + Sync {
    /// Load every persisted subscriber. Order is not significant.
    async fn load(&self) -> StorageResult<Vec<Subscriber>>;

    /// Insert or overwrite the entry for `subscriber.recipient_id`
    async fn insert(&self, subscriber: &Subscriber) -> StorageResult<()>;

    /// Remove the entry for `recipient_id`; removing an absent id is not an error
    async fn remove(&self, recipient_id: &RecipientId) -> StorageResult<()>;

    /// Human-readable description for startup logs
    fn describe(&self) -> String;
}
