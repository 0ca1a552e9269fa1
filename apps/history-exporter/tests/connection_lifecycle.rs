//! Connection Lifecycle Integration Tests
//!
//! Drives a `StreamConnection` against a local WebSocket server: handshake,
//! multiplexed subscriptions, frame states, and teardown.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::time::{Duration, Instant};

use bytes::Bytes;
use history_exporter::infrastructure::stream::ClientFrame;
use history_exporter::{ConnectionState, StreamError, SubscriptionError, SubscriptionRequest};
use tokio::time::timeout;
use tokio_test::{assert_err, assert_ok};

use common::{Reply, TestServer};

const WAIT: Duration = Duration::from_secs(2);

fn detail(id: &str) -> SubscriptionRequest {
    SubscriptionRequest::transaction_detail("tok", id)
}

fn echo_id(frame: &ClientFrame) -> Vec<Reply> {
    match frame {
        ClientFrame::Subscribe { id, .. } => vec![Reply::text(format!("{id} A payload-{id}"))],
        _ => Vec::new(),
    }
}

#[tokio::test]
async fn connect_sends_handshake_and_is_idempotent() {
    let server = TestServer::start(|_: &ClientFrame| Vec::new()).await;
    let (connection, _cancel) = server.connection();

    assert_ok!(connection.connect().await);
    assert_ok!(connection.connect().await);

    assert_eq!(connection.state(), ConnectionState::Connected);
    assert_eq!(server.dials(), 1);

    let handshake = &server.frames()[0];
    assert!(handshake.starts_with("connect 31 {"), "{handshake}");
    assert!(handshake.contains("\"locale\":\"en\""));
}

#[tokio::test]
async fn concurrent_connects_dial_once() {
    let server = TestServer::start(|_: &ClientFrame| Vec::new()).await;
    let (connection, _cancel) = server.connection();

    let (a, b) = tokio::join!(connection.connect(), connection.connect());

    assert!(a.is_ok() && b.is_ok());
    assert_eq!(server.dials(), 1);
}

#[tokio::test]
async fn subscribe_before_connect_is_rejected() {
    let server = TestServer::start(|_: &ClientFrame| Vec::new()).await;
    let (connection, _cancel) = server.connection();

    let err = connection.subscribe(detail("tx-1")).await.unwrap_err();

    assert!(matches!(err, StreamError::NotConnected));
    assert_eq!(server.dials(), 0);
}

#[tokio::test]
async fn data_frame_is_delivered_to_its_subscription() {
    let server = TestServer::start(|frame: &ClientFrame| match frame {
        ClientFrame::Subscribe { id: 3, .. } => vec![Reply::text("3 A hello")],
        ClientFrame::Subscribe { id, .. } => vec![Reply::text(format!("{id} C"))],
        _ => Vec::new(),
    })
    .await;
    let (connection, _cancel) = server.connection();
    connection.connect().await.unwrap();

    let _first = connection.subscribe(detail("tx-1")).await.unwrap();
    let _second = connection.subscribe(detail("tx-2")).await.unwrap();
    let third = connection.subscribe(detail("tx-3")).await.unwrap();
    assert_eq!(third.id(), 3);

    let payload = third.recv_timeout(WAIT).await.unwrap();

    assert_eq!(payload, Bytes::from_static(b"hello"));
    assert!(server.wait_for_frame("unsub 3").await);
    assert_eq!(connection.open_subscriptions(), 2);
}

#[tokio::test]
async fn payload_tokens_are_rejoined_with_single_spaces() {
    let server = TestServer::start(|frame: &ClientFrame| match frame {
        ClientFrame::Subscribe { id, .. } => vec![Reply::text(format!("{id} A {{\"a\":  1,   \"b\": 2}}"))],
        _ => Vec::new(),
    })
    .await;
    let (connection, _cancel) = server.connection();
    connection.connect().await.unwrap();

    let payload = connection
        .subscribe(detail("tx-1"))
        .await
        .unwrap()
        .recv_timeout(WAIT)
        .await
        .unwrap();

    assert_eq!(payload, Bytes::from_static(b"{\"a\": 1, \"b\": 2}"));
}

#[tokio::test]
async fn subscription_frames_carry_increasing_ids_and_request_body() {
    let server = TestServer::start(echo_id).await;
    let (connection, _cancel) = server.connection();
    connection.connect().await.unwrap();

    for id in ["tx-1", "tx-2"] {
        connection
            .subscribe(detail(id))
            .await
            .unwrap()
            .recv_timeout(WAIT)
            .await
            .unwrap();
    }

    let subs: Vec<_> = server
        .frames()
        .into_iter()
        .filter(|f| f.starts_with("sub "))
        .collect();
    assert_eq!(
        subs,
        vec![
            r#"sub 1 {"type":"timelineDetailV2","token":"tok","id":"tx-1"}"#,
            r#"sub 2 {"type":"timelineDetailV2","token":"tok","id":"tx-2"}"#,
        ]
    );
}

#[tokio::test]
async fn concurrent_subscriptions_are_multiplexed() {
    let server = TestServer::start(echo_id).await;
    let (connection, _cancel) = server.connection();
    connection.connect().await.unwrap();

    let tasks: Vec<_> = (0..20)
        .map(|i| {
            let connection = connection.clone();
            tokio::spawn(async move {
                let pending = connection.subscribe(detail(&format!("tx-{i}"))).await.unwrap();
                let id = pending.id();
                let payload = pending.recv_timeout(WAIT).await.unwrap();
                (id, payload)
            })
        })
        .collect();

    let mut ids = Vec::new();
    for task in tasks {
        let (id, payload) = task.await.unwrap();
        assert_eq!(payload, Bytes::from(format!("payload-{id}")));
        ids.push(id);
    }
    ids.sort_unstable();
    assert_eq!(ids, (1..=20).collect::<Vec<_>>());
}

#[tokio::test]
async fn error_frame_closes_subscription_without_payload() {
    let server = TestServer::start(|frame: &ClientFrame| match frame {
        ClientFrame::Subscribe { id, .. } => vec![Reply::text(format!(
            "{id} E {{\"errors\":[{{\"errorCode\":\"AUTHENTICATION_ERROR\"}}]}}"
        ))],
        _ => Vec::new(),
    })
    .await;
    let (connection, _cancel) = server.connection();
    connection.connect().await.unwrap();

    let pending = connection.subscribe(detail("tx-1")).await.unwrap();

    assert_eq!(
        pending.recv_timeout(WAIT).await,
        Err(SubscriptionError::Closed(1))
    );
    assert!(server.wait_for_frame("unsub 1").await);
    assert_eq!(connection.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn malformed_and_stray_frames_do_not_stop_the_read_loop() {
    let server = TestServer::start(|frame: &ClientFrame| match frame {
        ClientFrame::Subscribe { id, .. } => vec![
            Reply::text("garbage"),
            Reply::text("notanumber A x"),
            Reply::text(format!("{id} X unknown-state")),
            Reply::text("99 A stray"),
            Reply::text(format!("{id} C")),
            Reply::text(format!("{id} A ok")),
        ],
        _ => Vec::new(),
    })
    .await;
    let (connection, _cancel) = server.connection();
    connection.connect().await.unwrap();

    let payload = connection
        .subscribe(detail("tx-1"))
        .await
        .unwrap()
        .recv_timeout(WAIT)
        .await
        .unwrap();

    assert_eq!(payload, Bytes::from_static(b"ok"));
    assert_eq!(connection.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn server_close_fails_open_subscriptions() {
    let server = TestServer::start(|frame: &ClientFrame| match frame {
        ClientFrame::Subscribe { .. } => vec![Reply::Close],
        _ => Vec::new(),
    })
    .await;
    let (connection, _cancel) = server.connection();
    connection.connect().await.unwrap();

    let pending = connection.subscribe(detail("tx-1")).await.unwrap();

    assert_eq!(
        pending.recv_timeout(WAIT).await,
        Err(SubscriptionError::Closed(1))
    );
    timeout(WAIT, connection.closed()).await.unwrap();
    assert_eq!(connection.state(), ConnectionState::Closed);

    let err = connection.subscribe(detail("tx-2")).await.unwrap_err();
    assert!(matches!(err, StreamError::ConnectionClosed));
}

#[tokio::test]
async fn close_wakes_waiters_and_rejects_later_calls() {
    let server = TestServer::start(|_: &ClientFrame| Vec::new()).await;
    let (connection, _cancel) = server.connection();
    connection.connect().await.unwrap();

    let pending = connection.subscribe(detail("tx-1")).await.unwrap();
    connection.close().await.unwrap();
    connection.close().await.unwrap();

    assert_eq!(
        pending.recv_timeout(WAIT).await,
        Err(SubscriptionError::Closed(1))
    );
    assert!(matches!(
        connection.subscribe(detail("tx-2")).await,
        Err(StreamError::ConnectionClosed)
    ));
    assert!(matches!(
        connection.connect().await,
        Err(StreamError::ConnectionClosed)
    ));
    assert_eq!(server.dials(), 1);
}

#[tokio::test]
async fn cancellation_tears_the_connection_down() {
    let server = TestServer::start(|_: &ClientFrame| Vec::new()).await;
    let (connection, cancel) = server.connection();
    connection.connect().await.unwrap();

    let pending = connection.subscribe(detail("tx-1")).await.unwrap();
    cancel.cancel();

    assert_eq!(
        pending.recv_timeout(WAIT).await,
        Err(SubscriptionError::Closed(1))
    );
    timeout(WAIT, connection.closed()).await.unwrap();
    assert_eq!(connection.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn rejected_handshake_fails_connect() {
    let server = TestServer::rejecting_handshake().await;
    let (connection, _cancel) = server.connection();

    let err = assert_err!(connection.connect().await);

    assert!(matches!(err, StreamError::HandshakeFailed(_)));
    assert_eq!(connection.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn unanswered_handshake_times_out() {
    let server = TestServer::silent_handshake().await;
    let connect_timeout = Duration::from_millis(300);
    let (connection, _cancel) = server.connection_with_timeout(connect_timeout);

    let started = Instant::now();
    let err = assert_err!(connection.connect().await);
    let elapsed = started.elapsed();

    assert!(matches!(err, StreamError::HandshakeFailed(_)));
    assert!(elapsed >= connect_timeout, "{elapsed:?}");
    assert!(elapsed < WAIT, "{elapsed:?}");
    assert_eq!(connection.state(), ConnectionState::Disconnected);
    assert!(server.frames()[0].starts_with("connect 31 "));

    let err = connection.subscribe(detail("tx-1")).await.unwrap_err();
    assert!(matches!(err, StreamError::NotConnected));
}

#[tokio::test]
async fn timed_out_subscription_is_forgotten_and_unsubscribed() {
    let server = TestServer::start(|_: &ClientFrame| Vec::new()).await;
    let (connection, _cancel) = server.connection();
    connection.connect().await.unwrap();

    let pending = connection.subscribe(detail("tx-1")).await.unwrap();
    assert_eq!(connection.open_subscriptions(), 1);

    let err = pending
        .recv_timeout(Duration::from_millis(100))
        .await
        .unwrap_err();

    assert!(matches!(err, SubscriptionError::Timeout { id: 1, .. }));
    assert_eq!(connection.open_subscriptions(), 0);
    assert!(server.wait_for_frame("unsub 1").await);
    assert_eq!(connection.state(), ConnectionState::Connected);
}
