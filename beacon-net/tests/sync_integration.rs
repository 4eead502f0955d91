//! End-to-end sync tests: two nodes converge on the same dense alert log
//! over in-memory streams, and over real TCP through the engine.

mod common;

use beacon_model::SyncMessage;
use beacon_net::{
    run_session, MessageSink, MessageStream, NetError, SessionConfig, SyncEngine,
    SyncEngineConfig,
};
use common::*;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn fast_session() -> SessionConfig {
    SessionConfig {
        poll_interval: Duration::from_millis(100),
        response_timeout: Duration::from_secs(2),
    }
}

fn spawn_session(
    stream: tokio::io::DuplexStream,
    node: &TestNode,
    token: &CancellationToken,
) -> tokio::task::JoinHandle<Result<(), NetError>> {
    let processor = node.processor.clone();
    let store = node.store.clone();
    let token = token.clone();
    tokio::spawn(async move {
        run_session(
            stream,
            "test-peer",
            processor,
            store,
            Arc::new(beacon_net::NullObserver),
            fast_session(),
            token,
        )
        .await
    })
}

#[tokio::test]
async fn test_sync_from_zero() {
    let seeded = make_node().await;
    seed_alerts(&seeded, 10).await;
    let empty = make_node().await;

    let (a, b) = tokio::io::duplex(64 * 1024);
    let token = CancellationToken::new();
    let seeded_task = spawn_session(a, &seeded, &token);
    let empty_task = spawn_session(b, &empty, &token);

    // The empty node pulls 1..=10 with no gaps.
    wait_for_full_log(&empty, 10).await;

    token.cancel();
    let _ = seeded_task.await;
    let _ = empty_task.await;
}

#[tokio::test]
async fn test_lagging_peer_catches_up() {
    let ahead = make_node().await;
    seed_alerts(&ahead, 6).await;
    let lagging = make_node().await;
    seed_alerts(&lagging, 3).await;

    let (a, b) = tokio::io::duplex(64 * 1024);
    let token = CancellationToken::new();
    let ahead_task = spawn_session(a, &ahead, &token);
    let lagging_task = spawn_session(b, &lagging, &token);

    wait_for_full_log(&lagging, 6).await;
    // The ahead node saw nothing new and is unchanged.
    assert!(log_is_complete(&ahead, 6).await);

    token.cancel();
    let _ = ahead_task.await;
    let _ = lagging_task.await;
}

#[tokio::test]
async fn test_duplicate_delivery_from_two_peers_is_safe() {
    let seeded_one = make_node().await;
    seed_alerts(&seeded_one, 5).await;
    let seeded_two = make_node().await;
    seed_alerts(&seeded_two, 5).await;
    let empty = make_node().await;

    let token = CancellationToken::new();
    let (a1, b1) = tokio::io::duplex(64 * 1024);
    let (a2, b2) = tokio::io::duplex(64 * 1024);
    let tasks = vec![
        spawn_session(a1, &seeded_one, &token),
        spawn_session(b1, &empty, &token),
        spawn_session(a2, &seeded_two, &token),
        spawn_session(b2, &empty, &token),
    ];

    // Both peers race to deliver the same alerts; the processor
    // deduplicates by sequence number.
    wait_for_full_log(&empty, 5).await;

    token.cancel();
    for task in tasks {
        let _ = task.await;
    }
}

#[tokio::test]
async fn test_misbehaving_peer_closes_session() {
    let node = make_node().await;
    let (ours, theirs) = tokio::io::duplex(64 * 1024);
    let token = CancellationToken::new();
    let session = spawn_session(ours, &node, &token);

    let (read_half, write_half) = tokio::io::split(theirs);
    let mut sink = MessageSink::new(write_half);
    let mut stream = MessageStream::new(read_half);

    // The session polls us for our latest; claim a one-alert log.
    loop {
        let msg = stream.recv().await.unwrap().unwrap();
        if msg.kind == SyncMessage::I_WANT_LATEST {
            break;
        }
    }
    sink.send(&SyncMessage::got_latest(2, signed_alert(2, "tip")))
        .await
        .unwrap();

    // It asks for sequence 1; answer with the wrong sequence.
    let msg = stream.recv().await.unwrap().unwrap();
    assert_eq!(msg.kind, SyncMessage::I_WANT_SEQUENCE);
    assert_eq!(msg.sequence_number, 1);
    sink.send(&SyncMessage::got_sequence(2, signed_alert(2, "tip")))
        .await
        .unwrap();

    let result = session.await.unwrap();
    assert!(matches!(result, Err(NetError::Misbehaving(_))));
}

#[tokio::test]
async fn test_garbage_tip_closes_session() {
    let node = make_node().await;
    let (ours, theirs) = tokio::io::duplex(64 * 1024);
    let token = CancellationToken::new();
    let session = spawn_session(ours, &node, &token);

    let (read_half, write_half) = tokio::io::split(theirs);
    let mut sink = MessageSink::new(write_half);
    let mut stream = MessageStream::new(read_half);

    loop {
        let msg = stream.recv().await.unwrap().unwrap();
        if msg.kind == SyncMessage::I_WANT_LATEST {
            break;
        }
    }
    // Tip bytes that are not a parseable envelope.
    sink.send(&SyncMessage::got_latest(3, vec![0xff; 40]))
        .await
        .unwrap();

    let result = session.await.unwrap();
    assert!(matches!(result, Err(NetError::Rejected(_))));
}

#[tokio::test]
async fn test_engine_tcp_end_to_end() {
    let seeded = make_node().await;
    seed_alerts(&seeded, 10).await;
    let empty = make_node().await;

    let token_a = CancellationToken::new();
    let engine_a = SyncEngine::new(
        SyncEngineConfig {
            listen: Some("127.0.0.1:0".parse().unwrap()),
            peers: vec![],
            session: fast_session(),
        },
        seeded.processor.clone(),
        seeded.store.clone(),
        token_a.clone(),
    );
    let addr = engine_a.start().await.unwrap().unwrap();

    let token_b = CancellationToken::new();
    let engine_b = SyncEngine::new(
        SyncEngineConfig {
            listen: None,
            peers: vec![addr.to_string()],
            session: fast_session(),
        },
        empty.processor.clone(),
        empty.store.clone(),
        token_b.clone(),
    );
    let status = engine_b.status();
    engine_b.start().await.unwrap();

    wait_for_full_log(&empty, 10).await;
    assert_eq!(status.active_peers(), 1);
    assert!(status.synced(10));

    engine_a.shutdown();
    engine_b.shutdown();
}
