//! Proofrate threshold state machine
//!
//! ```text
//! Normal ──(proofrate <  threshold)──────────▶ Below     Transition::Degraded
//! Below  ──(proofrate >= threshold + margin)─▶ Normal    Transition::Recovered
//! anything else                                unchanged  no transition
//! ```
//!
//! The functions here are pure: the caller owns the [`AlertState`] and passes it in,
//! so every step can be tested without a clock or a network.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::MetricSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    #[default]
    Normal,
    Below,
}

/// Edge that fired during an evaluation. Only edges produce notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transition {
    /// Normal → Below
    Degraded,
    /// Below → Normal
    Recovered,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlertState {
    pub status: AlertStatus,

    /// `None` until the first snapshot has been evaluated
    pub last_evaluated_at: Option<DateTime<Utc>>,

    pub threshold_at_evaluation: f64,
}

impl AlertState {
    /// Fresh state for a process that has not evaluated anything yet
    pub fn new(threshold: f64) -> Self {
        Self {
            status: AlertStatus::Normal,
            last_evaluated_at: None,
            threshold_at_evaluation: threshold,
        }
    }

    pub fn is_below(&self) -> bool {
        self.status == AlertStatus::Below
    }
}

/// Evaluate a snapshot without hysteresis.
pub fn evaluate(
    snapshot: &MetricSnapshot,
    threshold: f64,
    current: AlertState,
) -> (AlertState, Option<Transition>) {
    evaluate_with_margin(snapshot, threshold, 0.0, current)
}

/// Evaluate a snapshot, requiring `proofrate >= threshold + recovery_margin` to recover.
///
/// With a zero margin, flapping around the exact threshold yields one alert per poll.
pub fn evaluate_with_margin(
    snapshot: &MetricSnapshot,
    threshold: f64,
    recovery_margin: f64,
    current: AlertState,
) -> (AlertState, Option<Transition>) {
    let proofrate = snapshot.proofrate;

    let (status, transition) = match current.status {
        AlertStatus::Normal if proofrate < threshold => {
            (AlertStatus::Below, Some(Transition::Degraded))
        }
        AlertStatus::Below if proofrate >= threshold + recovery_margin => {
            (AlertStatus::Normal, Some(Transition::Recovered))
        }
        unchanged => (unchanged, None),
    };

    let next = AlertState {
        status,
        last_evaluated_at: Some(snapshot.fetched_at),
        threshold_at_evaluation: threshold,
    };

    (next, transition)
}
