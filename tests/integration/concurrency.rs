//! Concurrency tests
//!
//! Subscriptions change while broadcasts are in flight; neither side may lose
//! updates or block the other indefinitely.

use std::sync::Arc;
use std::time::Duration;

use nockbot::{
    RecipientId,
    actors::scheduler::SchedulerHandle,
    alerts::AlertManager,
    notifier::Notifier,
};

use crate::helpers::*;

#[tokio::test]
async fn test_concurrent_subscribe_and_unsubscribe() {
    let store = memory_store(&[]).await;

    let mut tasks = vec![];
    for i in 0..40 {
        let store = store.clone();
        tasks.push(tokio::spawn(async move {
            store.add(RecipientId::from(i)).await.unwrap();
            if i % 2 == 0 {
                store.remove(&RecipientId::from(i)).await.unwrap();
            }
        }));
    }

    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(store.len().await, 20);
    for i in (1..40).step_by(2) {
        assert!(store.contains(&RecipientId::from(i)).await);
    }
}

#[tokio::test]
async fn test_subscribe_during_slow_broadcast() {
    let store = memory_store(&(1..=10).collect::<Vec<_>>()).await;
    let channel = Arc::new(MockChannel::default().with_delay(Duration::from_millis(50)));
    let notifier = Arc::new(Notifier::new(store.clone(), channel.clone()).with_fanout(2));

    let broadcast = {
        let notifier = notifier.clone();
        tokio::spawn(async move { notifier.broadcast("slow").await })
    };

    // the broadcast works on a snapshot, so mutations go through without waiting for it
    tokio::time::sleep(Duration::from_millis(10)).await;
    let added = tokio::time::timeout(
        Duration::from_millis(100),
        store.add(RecipientId::from(99)),
    )
    .await
    .expect("add must not wait for the broadcast")
    .unwrap();
    assert!(added);

    let report = broadcast.await.unwrap();
    assert_eq!(report.delivered, 10);
    assert!(channel.messages_for(99).is_empty());
}

#[tokio::test]
async fn test_concurrent_poll_now_from_many_handles() {
    let store = memory_store(&[1]).await;
    let channel = Arc::new(MockChannel::default());
    let source = Arc::new(ScriptedSource::rates(&[
        1.5, 0.5, 0.5, 1.5, 1.5, 0.5, 0.5, 1.5,
    ]));

    let handle = SchedulerHandle::spawn(
        test_settings(1.0, false),
        source.clone(),
        AlertManager::new(Notifier::new(store, channel.clone())),
    );

    let mut tasks = vec![];
    for _ in 0..8 {
        let handle = handle.clone();
        tasks.push(tokio::spawn(async move { handle.poll_now().await.unwrap() }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    // cycles are serialized by the actor, so the script is consumed in order
    assert_eq!(source.calls(), 8);
    let messages = channel.messages_for(1);
    assert_eq!(messages.len(), 4);
    assert!(messages[0].contains("Low Proofrate Alert"));
    assert!(messages[1].contains("Proofrate Recovered"));
    assert!(messages[2].contains("Low Proofrate Alert"));
    assert!(messages[3].contains("Proofrate Recovered"));

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_status_queries_while_polling() {
    let store = memory_store(&[]).await;
    let source = Arc::new(ScriptedSource::rates(&[1.5; 20]));

    let handle = SchedulerHandle::spawn(
        test_settings(1.0, false),
        source,
        AlertManager::new(Notifier::new(store, Arc::new(MockChannel::default()))),
    );

    let poller = {
        let handle = handle.clone();
        tokio::spawn(async move {
            for _ in 0..20 {
                handle.poll_now().await.unwrap();
            }
        })
    };

    for _ in 0..20 {
        let status = handle.status().await.unwrap();
        assert!(!status.alert.is_below());
    }

    poller.await.unwrap();
    handle.shutdown().await.unwrap();
}
