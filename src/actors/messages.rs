//! Message types for actor communication
//!
//! Commands travel over an mpsc channel to the owning actor; replies come back
//! over a oneshot carried inside the command.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::oneshot;

use crate::MetricSnapshot;
use crate::monitors::{AlertState, Transition};
use crate::notifier::DeliveryReport;
use crate::provider::SourceError;

/// Commands that can be sent to the Scheduler
#[derive(Debug)]
pub enum SchedulerCommand {
    /// Run one poll cycle right away and report what happened
    ///
    /// The regular timer restarts from the end of this cycle.
    PollNow {
        respond_to: oneshot::Sender<PollOutcome>,
    },

    GetStatus {
        respond_to: oneshot::Sender<SchedulerStatus>,
    },

    /// Stop after the in-flight cycle (if any) completes
    Shutdown { respond_to: oneshot::Sender<()> },
}

/// Result of one poll cycle
#[derive(Debug, Clone)]
pub enum PollOutcome {
    Completed {
        snapshot: MetricSnapshot,
        transition: Option<Transition>,
        /// Present only when a transition was broadcast
        report: Option<DeliveryReport>,
    },
    Failed {
        error: SourceError,
        retry_in: Duration,
    },
}

impl PollOutcome {
    pub fn transition(&self) -> Option<Transition> {
        match self {
            PollOutcome::Completed { transition, .. } => *transition,
            PollOutcome::Failed { .. } => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, PollOutcome::Failed { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum SchedulerState {
    Idle,
    Polling,
    /// Waiting after `attempt` consecutive failed polls
    Backoff { attempt: u32 },
}

/// Point-in-time view of the Scheduler
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub state: SchedulerState,
    pub alert: AlertState,
    pub last_snapshot: Option<MetricSnapshot>,
    /// Nominal delay before the next poll (jitter not included)
    pub next_delay: Duration,
    pub consecutive_failures: u32,
}
