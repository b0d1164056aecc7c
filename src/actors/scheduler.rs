//! Scheduler - periodically polls the metric source and drives the alert state machine
//!
//! ## Message Flow
//!
//! ```text
//! Timer → fetch snapshot → evaluate → (transition?) → AlertManager → Notifier
//!   ↑                                      │
//!   └──── Commands (PollNow, GetStatus, Shutdown)
//! ```
//!
//! The actor is the sole owner of the process-wide [`AlertState`]. Commands are
//! handled one at a time, so a `Shutdown` arriving mid-poll is only seen once the
//! in-flight cycle is complete.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use rand::Rng;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, sleep_until, timeout};
use tracing::{debug, info, instrument, warn};

use crate::MetricSnapshot;
use crate::alerts::AlertManager;
use crate::config::Config;
use crate::monitors::{AlertState, evaluate_with_margin};
use crate::provider::{MetricSource, SourceError};

use super::messages::{PollOutcome, SchedulerCommand, SchedulerState, SchedulerStatus};

/// Exponential retry delay after failed polls.
///
/// The first failure waits twice the poll interval, every further failure doubles
/// the delay until `max`, where it stays. Pure value type, no clock involved.
#[derive(Debug, Clone)]
pub struct Backoff {
    interval: Duration,
    max: Duration,
    current: Option<Duration>,
    attempts: u32,
}

impl Backoff {
    pub fn new(interval: Duration, max: Duration) -> Self {
        Self {
            interval,
            max: max.max(interval),
            current: None,
            attempts: 0,
        }
    }

    /// Record a failure and return the delay before the next attempt
    pub fn on_failure(&mut self) -> Duration {
        let next = match self.current {
            None => self.interval.saturating_mul(2),
            Some(delay) => delay.saturating_mul(2),
        }
        .min(self.max);

        self.current = Some(next);
        self.attempts = self.attempts.saturating_add(1);
        next
    }

    pub fn reset(&mut self) {
        self.current = None;
        self.attempts = 0;
    }

    /// Delay chosen by the last failure, `None` after a success
    pub fn current(&self) -> Option<Duration> {
        self.current
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// `now + delay`, falling back to roughly thirty years out when that overflows
fn deadline_after(delay: Duration) -> Instant {
    const FAR_FUTURE: Duration = Duration::from_secs(30 * 365 * 24 * 60 * 60);

    let now = Instant::now();
    now.checked_add(delay)
        .unwrap_or_else(|| now + FAR_FUTURE)
}

/// Spread `delay` by up to `±jitter × delay`
pub fn jittered(delay: Duration, jitter: f64) -> Duration {
    if jitter <= 0.0 {
        return delay;
    }
    let factor = 1.0 + rand::thread_rng().gen_range(-jitter..=jitter);
    Duration::try_from_secs_f64(delay.as_secs_f64() * factor.max(0.0)).unwrap_or(delay)
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub interval: Duration,
    pub backoff_max: Duration,
    pub jitter: f64,
    pub threshold: f64,
    pub recovery_margin: f64,

    /// A fetch still running after this long counts as a failed poll
    pub fetch_timeout: Duration,

    /// Poll immediately on start instead of waiting one interval
    pub poll_on_start: bool,
}

impl SchedulerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            interval: config.poll_interval(),
            backoff_max: config.backoff_max(),
            jitter: config.backoff_jitter,
            threshold: config.proofrate_alert_threshold,
            recovery_margin: config.recovery_margin,
            fetch_timeout: config.fetch_timeout(),
            poll_on_start: true,
        }
    }
}

pub struct Scheduler {
    settings: SchedulerSettings,
    source: Arc<dyn MetricSource>,
    alerts: AlertManager,
    command_rx: mpsc::Receiver<SchedulerCommand>,

    state: SchedulerState,
    alert: AlertState,
    last_snapshot: Option<MetricSnapshot>,
    backoff: Backoff,
    next_delay: Duration,
}

impl Scheduler {
    pub fn new(
        settings: SchedulerSettings,
        source: Arc<dyn MetricSource>,
        alerts: AlertManager,
        command_rx: mpsc::Receiver<SchedulerCommand>,
    ) -> Self {
        Self {
            alert: AlertState::new(settings.threshold),
            backoff: Backoff::new(settings.interval, settings.backoff_max),
            next_delay: settings.interval,
            state: SchedulerState::Idle,
            last_snapshot: None,
            settings,
            source,
            alerts,
            command_rx,
        }
    }

    /// Run until a Shutdown command arrives or every handle is dropped
    #[instrument(skip(self), fields(interval = ?self.settings.interval))]
    pub async fn run(mut self) {
        info!(
            "scheduler started, threshold {} MP/s",
            self.settings.threshold
        );

        let mut deadline = if self.settings.poll_on_start {
            Instant::now()
        } else {
            deadline_after(self.settings.interval)
        };

        loop {
            tokio::select! {
                _ = sleep_until(deadline) => {
                    self.poll_cycle().await;
                    deadline = deadline_after(self.sleep_duration());
                }

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(SchedulerCommand::PollNow { respond_to }) => {
                            debug!("received PollNow command");
                            let outcome = self.poll_cycle().await;
                            deadline = deadline_after(self.sleep_duration());
                            let _ = respond_to.send(outcome);
                        }

                        Some(SchedulerCommand::GetStatus { respond_to }) => {
                            let _ = respond_to.send(self.status());
                        }

                        Some(SchedulerCommand::Shutdown { respond_to }) => {
                            debug!("received shutdown command");
                            let _ = respond_to.send(());
                            break;
                        }

                        None => {
                            warn!("command channel closed, shutting down");
                            break;
                        }
                    }
                }
            }
        }

        info!("scheduler stopped");
    }

    fn sleep_duration(&self) -> Duration {
        match self.state {
            SchedulerState::Backoff { .. } => jittered(self.next_delay, self.settings.jitter),
            _ => self.next_delay,
        }
    }

    fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            state: self.state,
            alert: self.alert,
            last_snapshot: self.last_snapshot.clone(),
            next_delay: self.next_delay,
            consecutive_failures: self.backoff.attempts(),
        }
    }

    /// Fetch, evaluate and (on a transition) broadcast. Never fails.
    #[instrument(skip(self))]
    async fn poll_cycle(&mut self) -> PollOutcome {
        self.state = SchedulerState::Polling;

        let fetched = match timeout(self.settings.fetch_timeout, self.source.fetch()).await {
            Ok(result) => result,
            Err(_) => Err(SourceError::Transport(format!(
                "fetch timed out after {:?}",
                self.settings.fetch_timeout
            ))),
        };

        let snapshot = match fetched {
            Ok(snapshot) => snapshot,
            Err(error) => {
                let retry_in = self.backoff.on_failure();
                self.state = SchedulerState::Backoff {
                    attempt: self.backoff.attempts(),
                };
                self.next_delay = retry_in;
                warn!(
                    "poll failed ({} in a row), retrying in {:?}: {error}",
                    self.backoff.attempts(),
                    retry_in
                );
                return PollOutcome::Failed { error, retry_in };
            }
        };

        let threshold = self.settings.threshold;
        let (next, transition) = evaluate_with_margin(
            &snapshot,
            threshold,
            self.settings.recovery_margin,
            self.alert,
        );
        self.alert = next;
        debug!(
            "proofrate {:.3} MP/s, alert state {:?}",
            snapshot.proofrate, self.alert.status
        );

        let report = match transition {
            Some(transition) => Some(
                self.alerts
                    .send_transition(transition, &snapshot, threshold)
                    .await,
            ),
            None => None,
        };

        if self.backoff.attempts() > 0 {
            info!(
                "metric source reachable again after {} failed polls",
                self.backoff.attempts()
            );
        }
        self.backoff.reset();
        self.state = SchedulerState::Idle;
        self.next_delay = self.settings.interval;
        self.last_snapshot = Some(snapshot.clone());

        PollOutcome::Completed {
            snapshot,
            transition,
            report,
        }
    }
}

/// Handle for controlling the Scheduler
///
/// Cheap to clone; every clone talks to the same actor.
#[derive(Clone)]
pub struct SchedulerHandle {
    sender: mpsc::Sender<SchedulerCommand>,
}

impl SchedulerHandle {
    pub fn spawn(
        settings: SchedulerSettings,
        source: Arc<dyn MetricSource>,
        alerts: AlertManager,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let actor = Scheduler::new(settings, source, alerts, cmd_rx);

        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    /// Run one poll cycle immediately
    pub async fn poll_now(&self) -> Result<PollOutcome> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::PollNow { respond_to: tx })
            .await
            .context("failed to send PollNow command")?;

        rx.await.context("failed to receive poll outcome")
    }

    pub async fn status(&self) -> Result<SchedulerStatus> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::GetStatus { respond_to: tx })
            .await
            .context("failed to send GetStatus command")?;

        rx.await.context("failed to receive scheduler status")
    }

    /// Stop the scheduler, waiting for an in-flight poll to finish
    pub async fn shutdown(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::Shutdown { respond_to: tx })
            .await
            .context("failed to send Shutdown command")?;

        rx.await.context("scheduler exited before acknowledging shutdown")
    }
}
