//! Retry and liveness behaviour of `ResilientRequester` over a scripted
//! transport.

mod common;

use baitguard::{Action, ChannelError, RequestPolicy, ResilientRequester, TransportError};
use common::{LiveFlag, ScriptedTransport, Step};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn policy() -> RequestPolicy {
    RequestPolicy::new(1_000, 2, 100)
}

fn requester(transport: &Arc<ScriptedTransport>, flag: &LiveFlag) -> ResilientRequester {
    ResilientRequester::new(transport.clone(), flag.guard()).with_policy(policy())
}

#[tokio::test(start_paused = true)]
async fn dead_channel_makes_no_attempt() {
    let transport = Arc::new(ScriptedTransport::always(Step::Reply(json!({}))));
    let flag = LiveFlag::dead();

    let err = requester(&transport, &flag).send(Action::Ping).await.unwrap_err();
    assert!(matches!(err, ChannelError::ChannelDead));
    assert_eq!(transport.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn closed_on_every_attempt_exhausts_the_budget() {
    let transport = Arc::new(ScriptedTransport::always(Step::Fail(TransportError::Closed)));
    let flag = LiveFlag::live();

    let err = requester(&transport, &flag).send(Action::Ping).await.unwrap_err();
    assert!(matches!(err, ChannelError::ChannelClosed { attempts: 3 }));
    assert!(err.is_transient());
    assert_eq!(transport.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn stalled_transport_times_out_each_attempt() {
    let transport = Arc::new(ScriptedTransport::always(Step::Stall));
    let flag = LiveFlag::live();

    let started = Instant::now();
    let err = requester(&transport, &flag).send(Action::Ping).await.unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, ChannelError::RequestTimeout { attempts: 3, .. }));
    assert_eq!(transport.calls(), 3);
    // 3 attempts of 1s plus 2 pauses of 100ms
    assert!(elapsed >= Duration::from_millis(3_200), "{:?}", elapsed);
    assert!(elapsed < Duration::from_millis(3_300), "{:?}", elapsed);
}

#[tokio::test(start_paused = true)]
async fn death_between_attempts_stops_retrying() {
    let flag = LiveFlag::live();
    let transport = Arc::new(
        ScriptedTransport::always(Step::Fail(TransportError::Closed)).killing_after(1, flag.clone()),
    );

    let err = requester(&transport, &flag).send(Action::Ping).await.unwrap_err();
    assert!(matches!(err, ChannelError::ChannelDead));
    assert_eq!(transport.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn last_failure_decides_the_error_kind() {
    let transport = Arc::new(ScriptedTransport::new(vec![
        Step::Fail(TransportError::Closed),
        Step::Fail(TransportError::Closed),
        Step::Stall,
    ]));
    let flag = LiveFlag::live();

    let err = requester(&transport, &flag).send(Action::Ping).await.unwrap_err();
    assert!(matches!(err, ChannelError::RequestTimeout { .. }));
}

#[tokio::test(start_paused = true)]
async fn success_after_stall_returns_value() {
    let transport = Arc::new(ScriptedTransport::new(vec![
        Step::Stall,
        Step::Reply(json!({ "pong": true, "generation": 4 })),
    ]));
    let flag = LiveFlag::live();

    let value = requester(&transport, &flag).send(Action::Ping).await.unwrap();
    assert_eq!(value["generation"], 4);
    assert_eq!(transport.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn every_attempt_gets_a_fresh_correlation_id() {
    let transport = Arc::new(ScriptedTransport::always(Step::Fail(TransportError::Closed)));
    let flag = LiveFlag::live();

    let _ = requester(&transport, &flag)
        .send(Action::ClassifyBatch {
            items: vec!["a".into()],
        })
        .await;

    let requests = transport.requests();
    let ids: HashSet<_> = requests.iter().map(|r| r.correlation_id).collect();
    assert_eq!(ids.len(), requests.len());
    assert!(requests.iter().all(|r| r.action.name() == "classifyBatch"));
}

#[tokio::test(start_paused = true)]
async fn unknown_failures_are_returned_unretried() {
    let transport = Arc::new(ScriptedTransport::always(Step::Fail(TransportError::Other(
        "port disconnected oddly".into(),
    ))));
    let flag = LiveFlag::live();

    let err = requester(&transport, &flag).send(Action::Ping).await.unwrap_err();
    assert!(matches!(err, ChannelError::Transport(TransportError::Other(_))));
    assert!(!err.is_transient() && !err.is_permanent());
    assert_eq!(transport.calls(), 1);
}
