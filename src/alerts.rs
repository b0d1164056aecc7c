use tracing::{error, info, instrument, warn};

use crate::MetricSnapshot;
use crate::format::alert_message;
use crate::monitors::Transition;
use crate::notifier::{DeliveryReport, Notifier};

/// Turns state-machine transitions into broadcasts
pub struct AlertManager {
    notifier: Notifier,
}

impl AlertManager {
    pub fn new(notifier: Notifier) -> Self {
        Self { notifier }
    }

    #[instrument(skip(self, snapshot))]
    pub async fn send_transition(
        &self,
        transition: Transition,
        snapshot: &MetricSnapshot,
        threshold: f64,
    ) -> DeliveryReport {
        let message = alert_message(transition, snapshot, threshold);
        let report = self.notifier.broadcast(&message).await;

        match (report.delivered, report.failed) {
            (0, 0) => info!("{transition:?} alert fired but nobody is subscribed"),
            (_, 0) => info!(
                "{transition:?} alert delivered to {} subscribers",
                report.delivered
            ),
            (0, failed) => error!("{transition:?} alert failed for all {failed} subscribers"),
            (delivered, failed) => warn!(
                "{transition:?} alert delivered to {delivered}, failed for {failed}: {:?}",
                report.failed_recipients
            ),
        }

        report
    }
}
