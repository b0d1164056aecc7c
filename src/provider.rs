//! Metric source adapter for the NockBlocks JSON-RPC API
//!
//! ## Message Flow
//!
//! ```text
//! check hint height → step up by 5000 until a height is missing → binary search tip
//!     → fetch blocks [tip - 100, tip] → derive MetricSnapshot
//! ```
//!
//! The adapter never retries; a failed fetch is reported to the scheduler, which owns
//! the retry policy.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, instrument, trace};

use crate::config::ProviderConfig;
use crate::{BLOCKS_PER_EPOCH, MetricSnapshot, TARGET_BLOCK_TIME};

/// Number of blocks the rates are averaged over
pub const SAMPLE_BLOCKS: u64 = 100;

/// Step used while searching upwards for the chain tip
const SEARCH_STEP: u64 = 5000;

/// Upper bound on upward steps before the tip search gives up
const MAX_SEARCH_STEPS: u32 = 64;

/// Errors returned by a [`MetricSource`]
#[derive(Debug, Clone, PartialEq)]
pub enum SourceError {
    /// Network failure, timeout or non-success HTTP status
    Transport(String),

    /// The provider answered, but the data is unusable
    MalformedResponse(String),
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::Transport(msg) => write!(f, "metric provider unreachable: {}", msg),
            SourceError::MalformedResponse(msg) => {
                write!(f, "malformed metric provider response: {}", msg)
            }
        }
    }
}

impl std::error::Error for SourceError {}

fn malformed(msg: impl Into<String>) -> SourceError {
    SourceError::MalformedResponse(msg.into())
}

/// Anything that can produce a fresh [`MetricSnapshot`]
#[async_trait]
pub trait MetricSource: Send + Sync {
    async fn fetch(&self) -> Result<MetricSnapshot, SourceError>;
}

/// Accumulated work is reported either as a JSON number or as a decimal string
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum WorkValue {
    Number(f64),
    Text(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBlock {
    timestamp: Option<f64>,
    accumulated_work: Option<WorkValue>,
    epoch_counter: Option<u64>,
}

/// Validated subset of a block needed for the metrics
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockSample {
    pub height: u64,
    /// Unix seconds
    pub timestamp: f64,
    pub accumulated_work: f64,
    pub epoch_counter: u64,
}

impl BlockSample {
    fn from_raw(height: u64, raw: RawBlock) -> Result<Self, SourceError> {
        let timestamp = raw
            .timestamp
            .ok_or_else(|| malformed(format!("block {height} has no timestamp")))?;

        let accumulated_work = match raw.accumulated_work {
            Some(WorkValue::Number(n)) => n,
            Some(WorkValue::Text(s)) => s.trim().parse::<f64>().map_err(|_| {
                malformed(format!("block {height} has non-numeric accumulatedWork {s:?}"))
            })?,
            None => return Err(malformed(format!("block {height} has no accumulatedWork"))),
        };

        if !timestamp.is_finite() || !accumulated_work.is_finite() {
            return Err(malformed(format!("block {height} has non-finite fields")));
        }

        Ok(Self {
            height,
            timestamp,
            accumulated_work,
            epoch_counter: raw.epoch_counter.unwrap_or_default(),
        })
    }
}

/// Derive the network metrics from the first and last block of a sample window.
pub fn compute_snapshot(
    first: &BlockSample,
    latest: &BlockSample,
    fetched_at: DateTime<Utc>,
) -> Result<MetricSnapshot, SourceError> {
    let span = latest.height.saturating_sub(first.height);
    if span == 0 {
        return Err(malformed("sample window contains a single block"));
    }

    let time_diff = latest.timestamp - first.timestamp;
    if time_diff <= 0.0 {
        return Err(malformed(format!(
            "block timestamps do not increase ({} → {})",
            first.timestamp, latest.timestamp
        )));
    }

    let work_diff = latest.accumulated_work - first.accumulated_work;
    if work_diff < 0.0 {
        return Err(malformed("accumulated work decreased"));
    }

    let proofrate = work_diff / time_diff / 1_000_000.0;
    let avg_block_secs = time_diff / span as f64;
    let work_per_block = work_diff / span as f64;
    let difficulty_log2 = if work_per_block > 0.0 {
        work_per_block.log2()
    } else {
        0.0
    };

    let mut epoch_block = latest.epoch_counter % BLOCKS_PER_EPOCH;
    if epoch_block == 0 && latest.epoch_counter > 0 {
        epoch_block = BLOCKS_PER_EPOCH;
    }
    let blocks_to_adjustment = BLOCKS_PER_EPOCH - epoch_block;
    let epoch_progress = epoch_block as f64 / BLOCKS_PER_EPOCH as f64;
    let next_adjustment_ratio = TARGET_BLOCK_TIME.as_secs_f64() / avg_block_secs;
    let est_secs = blocks_to_adjustment as f64 * avg_block_secs;

    let values = [
        proofrate,
        avg_block_secs,
        difficulty_log2,
        next_adjustment_ratio,
        est_secs,
    ];
    if values.iter().any(|v| !v.is_finite()) {
        return Err(malformed("derived metrics are not finite"));
    }

    Ok(MetricSnapshot {
        proofrate,
        difficulty_log2,
        avg_block_time: to_duration(avg_block_secs)?,
        epoch_progress,
        blocks_to_adjustment,
        est_time_to_adjustment: to_duration(est_secs)?,
        next_adjustment_ratio,
        latest_height: latest.height,
        fetched_at,
    })
}

fn to_duration(secs: f64) -> Result<Duration, SourceError> {
    Duration::try_from_secs_f64(secs)
        .map_err(|_| malformed(format!("block time span of {secs}s is out of range")))
}

/// Client for the NockBlocks JSON-RPC API
pub struct NockBlocksClient {
    /// HTTP client (reused across requests)
    client: reqwest::Client,

    rpc_url: String,

    api_key: String,

    height_hint: u64,

    request_id: AtomicU64,
}

impl NockBlocksClient {
    pub fn new(config: &ProviderConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("nockbot/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            rpc_url: format!("{}/rpc/v1", config.url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            height_hint: config.height_hint.max(1),
            request_id: AtomicU64::new(0),
        })
    }

    #[instrument(skip(self, params))]
    async fn rpc_call(&self, method: &str, params: Value) -> Result<Value, SourceError> {
        let id = self.request_id.fetch_add(1, Ordering::Relaxed) + 1;
        let payload = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": id,
        });

        let response = self
            .client
            .post(&self.rpc_url)
            .bearer_auth(&self.api_key)
            .header("Accept", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| SourceError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Transport(format!("HTTP error: {status}")));
        }

        let mut body: Value = response
            .json()
            .await
            .map_err(|e| malformed(format!("invalid JSON body: {e}")))?;

        if let Some(error) = body.get("error") {
            return Err(malformed(format!("rpc error for {method}: {error}")));
        }

        body.get_mut("result")
            .map(Value::take)
            .ok_or_else(|| malformed(format!("rpc response for {method} has no result")))
    }

    /// Fetch blocks by height; missing heights come back as `None`, in request order.
    async fn get_blocks(&self, heights: &[u64]) -> Result<Vec<Option<BlockSample>>, SourceError> {
        let result = self
            .rpc_call("getBlocksByHeight", json!([{ "heights": heights }]))
            .await?;

        let raw: Vec<Option<RawBlock>> = match result {
            Value::Null => Vec::new(),
            other => serde_json::from_value(other)
                .map_err(|e| malformed(format!("unexpected block list: {e}")))?,
        };

        heights
            .iter()
            .enumerate()
            .map(|(i, height)| match raw.get(i).cloned().flatten() {
                Some(block) => BlockSample::from_raw(*height, block).map(Some),
                None => Ok(None),
            })
            .collect()
    }

    async fn block_exists(&self, height: u64) -> Result<bool, SourceError> {
        Ok(matches!(
            self.get_blocks(&[height]).await?.first(),
            Some(Some(_))
        ))
    }

    /// Locate the chain tip: step upwards from the hint, then binary search.
    #[instrument(skip(self))]
    pub async fn find_latest_height(&self) -> Result<u64, SourceError> {
        let (mut low, mut high) = if self.block_exists(self.height_hint).await? {
            let mut low = self.height_hint;
            let mut steps = 0;
            loop {
                if steps == MAX_SEARCH_STEPS {
                    return Err(malformed(format!(
                        "no missing height found within {} blocks of {}",
                        u64::from(MAX_SEARCH_STEPS) * SEARCH_STEP,
                        self.height_hint
                    )));
                }
                steps += 1;

                let next = low.saturating_add(SEARCH_STEP);
                if self.block_exists(next).await? {
                    low = next;
                } else {
                    break (low, next - 1);
                }
            }
        } else {
            (0, self.height_hint - 1)
        };

        while low < high {
            let mid = (low + high).div_ceil(2);
            if self.block_exists(mid).await? {
                low = mid;
            } else {
                high = mid - 1;
            }
        }

        if low == 0 {
            return Err(malformed("provider reports an empty chain"));
        }

        trace!("latest block height is {low}");
        Ok(low)
    }
}

#[async_trait]
impl MetricSource for NockBlocksClient {
    #[instrument(skip(self))]
    async fn fetch(&self) -> Result<MetricSnapshot, SourceError> {
        let latest_height = self.find_latest_height().await?;
        let first_height = latest_height.saturating_sub(SAMPLE_BLOCKS).max(1);

        let blocks = self.get_blocks(&[first_height, latest_height]).await?;
        let (Some(Some(first)), Some(Some(latest))) = (blocks.first(), blocks.get(1)) else {
            return Err(malformed(format!(
                "blocks {first_height} and {latest_height} are not both available"
            )));
        };

        let snapshot = compute_snapshot(first, latest, Utc::now())?;
        debug!(
            "fetched metrics at height {}: {:.3} MP/s",
            snapshot.latest_height, snapshot.proofrate
        );
        Ok(snapshot)
    }
}
