//! End-to-end tests: scheduler → state machine → notifier → delivery channel

use std::sync::Arc;

use nockbot::{
    RecipientId,
    actors::{messages::PollOutcome, scheduler::SchedulerHandle},
    alerts::AlertManager,
    monitors::Transition,
    notifier::Notifier,
};
use pretty_assertions::assert_eq;

use crate::helpers::*;

#[tokio::test]
async fn test_documented_sequence_alerts_twice() {
    let store = memory_store(&[1, 2]).await;
    let channel = Arc::new(MockChannel::default());
    let source = Arc::new(ScriptedSource::rates(&[1.5, 0.8, 0.9, 1.2]));

    let handle = SchedulerHandle::spawn(
        test_settings(1.0, false),
        source,
        AlertManager::new(Notifier::new(store, channel.clone())),
    );

    let mut transitions = Vec::new();
    for _ in 0..4 {
        transitions.push(handle.poll_now().await.unwrap().transition());
    }

    assert_eq!(
        transitions,
        vec![
            None,
            Some(Transition::Degraded),
            None,
            Some(Transition::Recovered)
        ]
    );

    let messages = channel.messages_for(1);
    assert_eq!(messages.len(), 2);
    assert!(messages[0].contains("Low Proofrate Alert"));
    assert!(messages[0].contains("0.80 MP/s"));
    assert!(messages[1].contains("Proofrate Recovered"));
    assert_eq!(channel.messages_for(2).len(), 2);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_report_counts_partial_failure() {
    let store = memory_store(&[1, 2, 3, 4, 5]).await;
    let channel = Arc::new(MockChannel::rejecting(&[3, 5]));
    let source = Arc::new(ScriptedSource::rates(&[0.2]));

    let handle = SchedulerHandle::spawn(
        test_settings(1.0, false),
        source,
        AlertManager::new(Notifier::new(store.clone(), channel.clone())),
    );

    let PollOutcome::Completed { report, .. } = handle.poll_now().await.unwrap() else {
        panic!("poll should succeed");
    };
    let report = report.expect("a transition was broadcast");

    assert_eq!(report.delivered, 3);
    assert_eq!(report.failed, 2);
    assert_eq!(
        report.failed_recipients,
        vec![RecipientId::from(3), RecipientId::from(5)]
    );

    // failing recipients are kept
    assert_eq!(store.len().await, 5);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_subscriber_added_between_alerts_gets_recovery() {
    let store = memory_store(&[1]).await;
    let channel = Arc::new(MockChannel::default());
    let source = Arc::new(ScriptedSource::rates(&[0.5, 1.5]));

    let handle = SchedulerHandle::spawn(
        test_settings(1.0, false),
        source,
        AlertManager::new(Notifier::new(store.clone(), channel.clone())),
    );

    handle.poll_now().await.unwrap();
    store.add(RecipientId::from(2)).await.unwrap();
    handle.poll_now().await.unwrap();

    assert_eq!(channel.messages_for(1).len(), 2);
    let late = channel.messages_for(2);
    assert_eq!(late.len(), 1);
    assert!(late[0].contains("Proofrate Recovered"));

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_recovery_margin_delays_recovery() {
    let store = memory_store(&[1]).await;
    let channel = Arc::new(MockChannel::default());
    let source = Arc::new(ScriptedSource::rates(&[0.9, 1.05, 1.2]));

    let mut settings = test_settings(1.0, false);
    settings.recovery_margin = 0.1;

    let handle = SchedulerHandle::spawn(
        settings,
        source,
        AlertManager::new(Notifier::new(store, channel.clone())),
    );

    let mut transitions = Vec::new();
    for _ in 0..3 {
        transitions.push(handle.poll_now().await.unwrap().transition());
    }

    assert_eq!(
        transitions,
        vec![
            Some(Transition::Degraded),
            None,
            Some(Transition::Recovered)
        ]
    );

    handle.shutdown().await.unwrap();
}
