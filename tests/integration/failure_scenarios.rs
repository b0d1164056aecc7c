//! Failure tests: unreachable provider, malformed data, backoff behaviour
//!
//! None of these may stop the scheduler or corrupt the alert state.

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use nockbot::{
    actors::{
        messages::{PollOutcome, SchedulerState},
        scheduler::SchedulerHandle,
    },
    alerts::AlertManager,
    config::ProviderConfig,
    monitors::Transition,
    notifier::Notifier,
    provider::{NockBlocksClient, SourceError},
};
use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use crate::helpers::*;

fn provider_for(server: &MockServer) -> NockBlocksClient {
    NockBlocksClient::new(&ProviderConfig {
        url: server.uri(),
        api_key: "test-key".to_string(),
        height_hint: 1_000,
    })
    .unwrap()
}

/// Answers `getBlocksByHeight` with `block` for every height that `exists`
fn chain_responder(
    exists: impl Fn(u64) -> bool + Send + Sync + 'static,
    block: impl Fn(u64) -> Value + Send + Sync + 'static,
) -> impl Fn(&Request) -> ResponseTemplate + Send + Sync + 'static {
    move |req: &Request| {
        let body: Value = serde_json::from_slice(&req.body).unwrap();
        let blocks: Vec<Value> = body["params"][0]["heights"]
            .as_array()
            .unwrap()
            .iter()
            .map(|h| {
                let h = h.as_u64().unwrap();
                if exists(h) { block(h) } else { Value::Null }
            })
            .collect();
        ResponseTemplate::new(200)
            .set_body_json(json!({ "jsonrpc": "2.0", "id": body["id"], "result": blocks }))
    }
}

fn regular_block(height: u64) -> Value {
    json!({
        "timestamp": 1_700_000_000u64 + height * 600,
        "accumulatedWork": (height * 1_000_000_000).to_string(),
        "epochCounter": height,
    })
}

/// Poll once against `server` and check the actor is still answering, in backoff
async fn assert_poll_fails_into_backoff(server: &MockServer) -> SourceError {
    let handle = SchedulerHandle::spawn(
        test_settings(1.0, false),
        Arc::new(provider_for(server)),
        AlertManager::new(Notifier::new(
            memory_store(&[1]).await,
            Arc::new(MockChannel::default()),
        )),
    );

    let error = match handle.poll_now().await.unwrap() {
        PollOutcome::Failed { error, .. } => error,
        other => panic!("expected a failed poll, got {other:?}"),
    };

    let status = handle.status().await.unwrap();
    assert_eq!(status.state, SchedulerState::Backoff { attempt: 1 });
    assert!(!status.alert.is_below());

    // a later poll is still served by the same actor
    assert!(handle.poll_now().await.unwrap().is_failure());
    assert_eq!(
        handle.status().await.unwrap().state,
        SchedulerState::Backoff { attempt: 2 }
    );

    handle.shutdown().await.unwrap();
    error
}

#[tokio::test]
async fn test_out_of_range_block_times_keep_scheduler_alive() {
    const TIP: u64 = 1_200;
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/rpc/v1"))
        .respond_with(chain_responder(
            |h| (1..=TIP).contains(&h),
            |h| {
                let mut block = regular_block(h);
                if h == TIP {
                    block["timestamp"] = json!(1e300);
                }
                block
            },
        ))
        .mount(&mock_server)
        .await;

    let error = assert_poll_fails_into_backoff(&mock_server).await;
    assert_matches!(error, SourceError::MalformedResponse(_));
}

#[tokio::test]
async fn test_chain_without_tip_keeps_scheduler_alive() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/rpc/v1"))
        .respond_with(chain_responder(|_| true, regular_block))
        .mount(&mock_server)
        .await;

    let error = assert_poll_fails_into_backoff(&mock_server).await;
    assert_matches!(error, SourceError::MalformedResponse(_));
}

#[tokio::test]
async fn test_unreachable_provider_enters_backoff() {
    let provider = NockBlocksClient::new(&ProviderConfig {
        url: "http://127.0.0.1:9".to_string(),
        api_key: "test-key".to_string(),
        height_hint: 1_000,
    })
    .unwrap();

    let channel = Arc::new(MockChannel::default());
    let handle = SchedulerHandle::spawn(
        test_settings(1.0, false),
        Arc::new(provider),
        AlertManager::new(Notifier::new(memory_store(&[1]).await, channel.clone())),
    );

    let outcome = handle.poll_now().await.unwrap();
    assert_matches!(
        outcome,
        PollOutcome::Failed { error: SourceError::Transport(_), .. }
    );

    let status = handle.status().await.unwrap();
    assert_eq!(status.state, SchedulerState::Backoff { attempt: 1 });
    assert!(!status.alert.is_below(), "a failed poll must not alert");
    assert!(channel.sent().is_empty());

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_provider_500_is_transport_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/rpc/v1"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;

    let handle = SchedulerHandle::spawn(
        test_settings(1.0, false),
        Arc::new(provider_for(&mock_server)),
        AlertManager::new(Notifier::new(
            memory_store(&[]).await,
            Arc::new(MockChannel::default()),
        )),
    );

    assert_matches!(
        handle.poll_now().await.unwrap(),
        PollOutcome::Failed { error: SourceError::Transport(_), .. }
    );

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_provider_malformed_json() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/rpc/v1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{invalid json"))
        .mount(&mock_server)
        .await;

    let handle = SchedulerHandle::spawn(
        test_settings(1.0, false),
        Arc::new(provider_for(&mock_server)),
        AlertManager::new(Notifier::new(
            memory_store(&[]).await,
            Arc::new(MockChannel::default()),
        )),
    );

    assert_matches!(
        handle.poll_now().await.unwrap(),
        PollOutcome::Failed { error: SourceError::MalformedResponse(_), .. }
    );

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_empty_chain_is_malformed() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/rpc/v1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": [null]
        })))
        .mount(&mock_server)
        .await;

    let handle = SchedulerHandle::spawn(
        test_settings(1.0, false),
        Arc::new(provider_for(&mock_server)),
        AlertManager::new(Notifier::new(
            memory_store(&[]).await,
            Arc::new(MockChannel::default()),
        )),
    );

    assert_matches!(
        handle.poll_now().await.unwrap(),
        PollOutcome::Failed { error: SourceError::MalformedResponse(_), .. }
    );

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_alert_state_survives_outage() {
    let channel = Arc::new(MockChannel::default());
    let source = Arc::new(ScriptedSource::new(vec![
        Ok(snapshot(0.5)),
        Err(SourceError::Transport("timeout".to_string())),
        Err(SourceError::Transport("timeout".to_string())),
        Ok(snapshot(0.6)),
        Ok(snapshot(1.1)),
    ]));

    let handle = SchedulerHandle::spawn(
        test_settings(1.0, false),
        source,
        AlertManager::new(Notifier::new(memory_store(&[1]).await, channel.clone())),
    );

    let mut transitions = Vec::new();
    for _ in 0..5 {
        transitions.push(handle.poll_now().await.unwrap().transition());
    }

    // still below after the outage, so no second low alert
    assert_eq!(
        transitions,
        vec![
            Some(Transition::Degraded),
            None,
            None,
            None,
            Some(Transition::Recovered)
        ]
    );
    assert_eq!(channel.sent().len(), 2);

    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_backoff_delay_grows_then_holds() {
    let source = Arc::new(ScriptedSource::new(Vec::new()));
    let alerts = AlertManager::new(Notifier::new(
        memory_store(&[]).await,
        Arc::new(MockChannel::default()),
    ));

    let start = tokio::time::Instant::now();
    let handle = SchedulerHandle::spawn(test_settings(1.0, true), source.clone(), alerts);

    // failures at t = 0, 20, 60, 140, 220, 300
    let mut delays = Vec::new();
    for checkpoint in [1, 21, 61, 141, 221, 301] {
        tokio::time::sleep_until(start + Duration::from_secs(checkpoint)).await;
        delays.push(handle.status().await.unwrap().next_delay.as_secs());
    }

    assert_eq!(delays, vec![20, 40, 80, 80, 80, 80]);
    assert_eq!(source.calls(), 6);

    handle.shutdown().await.unwrap();
}
