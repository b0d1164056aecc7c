//! Test helpers shared by the integration tests

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use nockbot::{
    MetricSnapshot, RecipientId,
    actors::scheduler::SchedulerSettings,
    notifier::{DeliveryChannel, DeliveryError},
    provider::{MetricSource, SourceError},
    storage::memory::MemoryBackend,
    subscribers::SubscriberStore,
};

/// Create a snapshot with the given proofrate and plausible other fields
pub fn snapshot(proofrate: f64) -> MetricSnapshot {
    MetricSnapshot {
        proofrate,
        difficulty_log2: 42.3,
        avg_block_time: Duration::from_secs(590),
        epoch_progress: 0.25,
        blocks_to_adjustment: 1512,
        est_time_to_adjustment: Duration::from_secs(1512 * 590),
        next_adjustment_ratio: 600.0 / 590.0,
        latest_height: 61_000,
        fetched_at: Utc::now(),
    }
}

/// Metric source that replays a script, then fails with a transport error forever
pub struct ScriptedSource {
    script: Mutex<VecDeque<Result<MetricSnapshot, SourceError>>>,
    calls: AtomicUsize,
}

impl ScriptedSource {
    pub fn new(script: Vec<Result<MetricSnapshot, SourceError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn rates(rates: &[f64]) -> Self {
        Self::new(rates.iter().map(|r| Ok(snapshot(*r))).collect())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetricSource for ScriptedSource {
    async fn fetch(&self) -> Result<MetricSnapshot, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(SourceError::Transport("connection refused".to_string())))
    }
}

/// Delivery channel that records messages and rejects a fixed set of recipients
#[derive(Default)]
pub struct MockChannel {
    rejected: HashSet<RecipientId>,
    sent: Mutex<Vec<(RecipientId, String)>>,
    delay: Option<Duration>,
}

impl MockChannel {
    pub fn rejecting(ids: &[i64]) -> Self {
        Self {
            rejected: ids.iter().map(|id| RecipientId::from(*id)).collect(),
            ..Default::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn sent(&self) -> Vec<(RecipientId, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn messages_for(&self, id: i64) -> Vec<String> {
        let id = RecipientId::from(id);
        self.sent()
            .into_iter()
            .filter(|(recipient, _)| *recipient == id)
            .map(|(_, text)| text)
            .collect()
    }
}

#[async_trait]
impl DeliveryChannel for MockChannel {
    async fn send(&self, recipient: &RecipientId, text: &str) -> Result<(), DeliveryError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.rejected.contains(recipient) {
            return Err(DeliveryError::Rejected {
                status: 403,
                description: "Forbidden: bot was blocked by the user".to_string(),
            });
        }
        self.sent
            .lock()
            .unwrap()
            .push((recipient.clone(), text.to_string()));
        Ok(())
    }
}

pub async fn memory_store(ids: &[i64]) -> Arc<SubscriberStore> {
    let store = SubscriberStore::open(Box::new(MemoryBackend::new()))
        .await
        .unwrap();
    for id in ids {
        store.add(RecipientId::from(*id)).await.unwrap();
    }
    Arc::new(store)
}

/// Settings with a 10s interval, an 80s backoff cap, a 5s fetch budget and no jitter
pub fn test_settings(threshold: f64, poll_on_start: bool) -> SchedulerSettings {
    SchedulerSettings {
        interval: Duration::from_secs(10),
        backoff_max: Duration::from_secs(80),
        jitter: 0.0,
        threshold,
        recovery_margin: 0.0,
        fetch_timeout: Duration::from_secs(5),
        poll_on_start,
    }
}
