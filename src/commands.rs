//! Inbound operations invoked by the messaging transport

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::instrument;

use crate::actors::messages::SchedulerState;
use crate::actors::scheduler::{SchedulerHandle, SchedulerSettings};
use crate::monitors::AlertState;
use crate::provider::{MetricSource, SourceError};
use crate::storage::StorageResult;
use crate::subscribers::SubscriberStore;
use crate::{MetricSnapshot, RecipientId};

/// What `/status` reports back to a user
#[derive(Debug, Clone)]
pub struct StatusSummary {
    pub subscribed: bool,
    pub subscriber_count: usize,
    pub threshold: f64,
    pub poll_interval: Duration,
    pub state: SchedulerState,
    pub alert: AlertState,
    pub last_snapshot: Option<MetricSnapshot>,
    pub consecutive_failures: u32,
}

#[derive(Clone)]
pub struct CommandHandler {
    store: Arc<SubscriberStore>,
    scheduler: SchedulerHandle,
    source: Arc<dyn MetricSource>,
    poll_interval: Duration,
    fetch_timeout: Duration,
    threshold: f64,
}

impl CommandHandler {
    pub fn new(
        store: Arc<SubscriberStore>,
        scheduler: SchedulerHandle,
        source: Arc<dyn MetricSource>,
        settings: &SchedulerSettings,
    ) -> Self {
        Self {
            store,
            scheduler,
            source,
            poll_interval: settings.interval,
            fetch_timeout: settings.fetch_timeout,
            threshold: settings.threshold,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Returns `true` if `id` was newly added
    #[instrument(skip(self))]
    pub async fn on_subscribe(&self, id: RecipientId) -> StorageResult<bool> {
        self.store.add(id).await
    }

    /// Returns `true` if `id` was subscribed
    #[instrument(skip(self))]
    pub async fn on_unsubscribe(&self, id: &RecipientId) -> StorageResult<bool> {
        self.store.remove(id).await
    }

    #[instrument(skip(self))]
    pub async fn on_status_query(&self, id: &RecipientId) -> Result<StatusSummary> {
        let status = self.scheduler.status().await?;

        Ok(StatusSummary {
            subscribed: self.store.contains(id).await,
            subscriber_count: self.store.len().await,
            threshold: self.threshold,
            poll_interval: self.poll_interval,
            state: status.state,
            alert: status.alert,
            last_snapshot: status.last_snapshot,
            consecutive_failures: status.consecutive_failures,
        })
    }

    /// Fetch a fresh snapshot for an on-demand query. Does not touch the alert state.
    #[instrument(skip(self))]
    pub async fn on_metrics_query(&self) -> Result<MetricSnapshot, SourceError> {
        tokio::time::timeout(self.fetch_timeout, self.source.fetch())
            .await
            .unwrap_or_else(|_| {
                Err(SourceError::Transport(format!(
                    "fetch timed out after {:?}",
                    self.fetch_timeout
                )))
            })
    }
}
