//! Fan-out delivery to every subscriber
//!
//! A broadcast reads the subscriber set at call time, then delivers to each
//! recipient independently. Per-recipient failures end up in the
//! [`DeliveryReport`]; they never abort the rest of the fan-out.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{StreamExt, stream};
use tracing::{debug, instrument, warn};

use crate::RecipientId;
use crate::subscribers::SubscriberStore;

/// Maximum number of deliveries in flight during one broadcast
pub const DEFAULT_FANOUT: usize = 8;

/// Why a single delivery failed
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryError {
    /// Network failure or timeout talking to the messaging transport
    Transport(String),

    /// The transport refused the message (e.g. the recipient blocked the bot)
    Rejected { status: u16, description: String },
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryError::Transport(msg) => write!(f, "delivery transport error: {}", msg),
            DeliveryError::Rejected {
                status,
                description,
            } => write!(f, "delivery rejected ({}): {}", status, description),
        }
    }
}

impl std::error::Error for DeliveryError {}

/// Outbound side of the messaging transport
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    async fn send(&self, recipient: &RecipientId, text: &str) -> Result<(), DeliveryError>;
}

/// Outcome of one broadcast
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: usize,
    pub failed_recipients: Vec<RecipientId>,
}

impl DeliveryReport {
    pub fn attempted(&self) -> usize {
        self.delivered + self.failed
    }
}

pub struct Notifier {
    store: Arc<SubscriberStore>,
    channel: Arc<dyn DeliveryChannel>,
    fanout: usize,
}

impl Notifier {
    pub fn new(store: Arc<SubscriberStore>, channel: Arc<dyn DeliveryChannel>) -> Self {
        Self {
            store,
            channel,
            fanout: DEFAULT_FANOUT,
        }
    }

    pub fn with_fanout(mut self, fanout: usize) -> Self {
        self.fanout = fanout.max(1);
        self
    }

    /// Deliver `message` to every current subscriber.
    #[instrument(skip_all)]
    pub async fn broadcast(&self, message: &str) -> DeliveryReport {
        let recipients = self.store.list_all().await;
        debug!("broadcasting to {} subscribers", recipients.len());

        let channel = &self.channel;
        let results: Vec<_> = stream::iter(recipients)
            .map(|subscriber| async move {
                let result = channel.send(&subscriber.recipient_id, message).await;
                (subscriber.recipient_id, result)
            })
            .buffer_unordered(self.fanout)
            .collect()
            .await;

        let mut report = DeliveryReport::default();
        for (recipient, result) in results {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!("failed to deliver to {recipient}: {e}");
                    report.failed += 1;
                    report.failed_recipients.push(recipient);
                }
            }
        }

        report.failed_recipients.sort();
        report
    }
}
