pub mod actors;
pub mod alerts;
pub mod commands;
pub mod config;
pub mod format;
pub mod monitors;
pub mod notifier;
pub mod provider;
pub mod storage;
pub mod subscribers;
pub mod telegram;
pub mod util;

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of blocks in one difficulty epoch.
pub const BLOCKS_PER_EPOCH: u64 = 2016;

/// Block time the difficulty adjustment aims for.
pub const TARGET_BLOCK_TIME: Duration = Duration::from_secs(600);

/// One poll's view of the network.
///
/// Snapshots are built once by a [`provider::MetricSource`] and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    /// Aggregate proof rate in MP/s (10^6 proofs per second)
    pub proofrate: f64,

    /// Difficulty as a base-2 exponent (average work per block = 2^difficulty_log2)
    pub difficulty_log2: f64,

    pub avg_block_time: Duration,

    /// Fraction of the current epoch already mined, in [0, 1]
    pub epoch_progress: f64,

    pub blocks_to_adjustment: u64,

    pub est_time_to_adjustment: Duration,

    /// Target block time divided by the observed average
    pub next_adjustment_ratio: f64,

    pub latest_height: u64,

    pub fetched_at: DateTime<Utc>,
}

/// Opaque identity of an alert recipient (a Telegram chat id for the bundled transport).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecipientId(String);

impl RecipientId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RecipientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<i64> for RecipientId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

impl From<&str> for RecipientId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// A registered alert recipient
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscriber {
    pub recipient_id: RecipientId,
    pub subscribed_at: DateTime<Utc>,
}

impl Subscriber {
    pub fn new(recipient_id: RecipientId) -> Self {
        Self {
            recipient_id,
            subscribed_at: Utc::now(),
        }
    }
}
