use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chanlink_client::{Client, ClientBuilder, ClientConfig, ClientError, ConnectionState, Router};
use chanlink_frame::FrameError;
use chanlink_schema::{ApiDocument, ChannelSchema};
use chanlink_transport::memory::{
    self, MemoryConnector, MemoryPeer, MemoryServer, MemorySink, MemorySource,
};
use chanlink_transport::{Connector, FrameSink, MessageKind, WireMessage};
use futures_util::FutureExt;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;

async fn next_text(peer: &mut MemoryPeer) -> String {
    match peer.recv().await {
        Some(WireMessage::Text(text)) => text,
        other => panic!("expected text frame, got {other:?}"),
    }
}

async fn next_json(peer: &mut MemoryPeer) -> Value {
    serde_json::from_str(&next_text(peer).await).expect("frame should be JSON")
}

/// Accept one connection and consume its token and metadata frames.
async fn accept_handshake(server: &mut MemoryServer) -> MemoryPeer {
    let mut peer = server.accept().await.expect("client should connect");
    next_text(&mut peer).await;
    next_text(&mut peer).await;
    peer
}

async fn connected(
    connector: &MemoryConnector,
    server: &mut MemoryServer,
) -> (Client<MemoryConnector>, MemoryPeer) {
    let client = ClientBuilder::new(connector.clone()).token("t").start();
    let peer = accept_handshake(server).await;
    client
        .wait_for_state(ConnectionState::Connected)
        .await
        .unwrap();
    (client, peer)
}

fn error_counter<C: chanlink_transport::Connector>(client: &Client<C>) -> Arc<AtomicUsize> {
    let errors = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&errors);
    client.on_error(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    errors
}

/// Loopback connector whose sinks never finish closing.
#[derive(Clone)]
struct StalledClose(MemoryConnector);

struct StalledCloseSink(MemorySink);

impl FrameSink for StalledCloseSink {
    async fn send(&mut self, message: WireMessage) -> chanlink_transport::Result<()> {
        self.0.send(message).await
    }

    async fn close(&mut self) -> chanlink_transport::Result<()> {
        std::future::pending().await
    }
}

impl Connector for StalledClose {
    type Sink = StalledCloseSink;
    type Source = MemorySource;

    async fn connect(&self) -> chanlink_transport::Result<(StalledCloseSink, MemorySource)> {
        let (sink, source) = self.0.connect().await?;
        Ok((StalledCloseSink(sink), source))
    }

    fn endpoint(&self) -> String {
        self.0.endpoint()
    }
}

#[tokio::test(start_paused = true)]
async fn handshake_frames_arrive_in_order() {
    let (connector, mut server) = memory::channel();
    let document = ApiDocument::new().with_channel("player/health", ChannelSchema::new("Health"));
    let client = ClientBuilder::new(connector.clone())
        .token("secret-token")
        .metadata("device", "rig-7")
        .metadata("build", "42")
        .schema_source(Arc::new(document))
        .start();
    assert_eq!(client.state(), ConnectionState::Waiting);

    let mut peer = server.accept().await.unwrap();
    assert_eq!(next_text(&mut peer).await, "secret-token");
    assert_eq!(next_json(&mut peer).await, json!({"build": "42", "device": "rig-7"}));

    let schema = next_json(&mut peer).await;
    assert_eq!(schema["channel"], "__internal/api");
    assert_eq!(schema["payload"]["debugMenuApi"], "1.0.0");
    assert_eq!(
        schema["payload"]["channels"]["player/health"]["name"],
        "Health"
    );

    client
        .wait_for_state(ConnectionState::Connected)
        .await
        .unwrap();
    assert_eq!(connector.connect_attempts(), 1);
    client.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn connected_waits_for_hook() {
    let (connector, mut server) = memory::channel();
    let release = Arc::new(Notify::new());
    let gate = Arc::clone(&release);
    let client = ClientBuilder::new(connector.clone())
        .token("t")
        .on_connected(move |session| {
            let gate = Arc::clone(&gate);
            async move {
                gate.notified().await;
                session.send_json("init", &json!({"ready": true})).await
            }
            .boxed()
        })
        .start();

    let mut peer = accept_handshake(&mut server).await;
    tokio::task::yield_now().await;
    assert_eq!(client.state(), ConnectionState::PerformingHandshake);

    release.notify_one();
    assert_eq!(
        next_json(&mut peer).await,
        json!({"channel": "init", "payload": {"ready": true}})
    );
    client
        .wait_for_state(ConnectionState::Connected)
        .await
        .unwrap();
    client.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn connect_failure_retries_once_after_delay() {
    let (connector, mut server) = memory::channel();
    connector.fail_next(1);
    let started = Instant::now();
    let client = ClientBuilder::new(connector.clone()).token("t").start();
    let errors = error_counter(&client);

    client
        .wait_for_state(ConnectionState::Disconnected)
        .await
        .unwrap();
    assert_eq!(connector.connect_attempts(), 1);
    assert_eq!(errors.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_millis(1999)).await;
    assert_eq!(connector.connect_attempts(), 1);

    let _peer = accept_handshake(&mut server).await;
    assert!(started.elapsed() >= Duration::from_millis(2000));
    client
        .wait_for_state(ConnectionState::Connected)
        .await
        .unwrap();
    assert_eq!(connector.connect_attempts(), 2);
    assert_eq!(errors.load(Ordering::SeqCst), 1);
    client.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn hook_failure_drops_connection() {
    let (connector, mut server) = memory::channel();
    let calls = Arc::new(AtomicUsize::new(0));
    let hook_calls = Arc::clone(&calls);
    let client = ClientBuilder::new(connector.clone())
        .token("t")
        .on_connected(move |_session| {
            let first = hook_calls.fetch_add(1, Ordering::SeqCst) == 0;
            async move {
                if first {
                    Err(ClientError::Handshake("snapshot not ready".into()))
                } else {
                    Ok(())
                }
            }
            .boxed()
        })
        .start();
    let (error_tx, mut error_rx) = mpsc::unbounded_channel();
    client.on_error(move |err| {
        let _ = error_tx.send(err.to_string());
    });

    let mut first = accept_handshake(&mut server).await;
    client
        .wait_for_state(ConnectionState::Disconnected)
        .await
        .unwrap();
    assert_eq!(first.recv().await, None);
    let message = error_rx.recv().await.unwrap();
    assert!(message.contains("connected hook failed"), "{message}");

    let _second = accept_handshake(&mut server).await;
    client
        .wait_for_state(ConnectionState::Connected)
        .await
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    client.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn sends_while_disconnected_are_dropped() {
    let (connector, _server) = memory::channel();
    connector.fail_next(1000);
    let client = ClientBuilder::new(connector.clone()).token("t").start();

    client.send_json("early", &json!(1)).await.unwrap();
    client
        .wait_for_state(ConnectionState::Disconnected)
        .await
        .unwrap();
    client.send_json("a", &json!({"x": 1})).await.unwrap();
    client.send_binary("b", &[1, 2, 3]).await.unwrap();

    assert_eq!(connector.frames_written(), 0);
    client.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn invalid_sends_fail_without_writing() {
    let (connector, mut server) = memory::channel();
    let (client, _peer) = connected(&connector, &mut server).await;
    let written = connector.frames_written();

    let long = "c".repeat(256);
    assert!(matches!(
        client.send_binary(&long, b"payload").await,
        Err(ClientError::Frame(FrameError::ChannelNameTooLong { len: 256, max: 255 }))
    ));
    assert!(matches!(
        client.send_binary_range("ok", b"abc", 2, 5).await,
        Err(ClientError::Frame(FrameError::RangeOutOfBounds { .. }))
    ));
    assert_eq!(connector.frames_written(), written);
    client.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn outbound_frames_match_wire_format() {
    let (connector, mut server) = memory::channel();
    let (client, mut peer) = connected(&connector, &mut server).await;

    client
        .send_json("player/health", &json!({"hp": 3}))
        .await
        .unwrap();
    client
        .send_binary_range("cam", b"xxABCDyy", 2, 4)
        .await
        .unwrap();

    assert_eq!(
        next_json(&mut peer).await,
        json!({"channel": "player/health", "payload": {"hp": 3}})
    );
    assert_eq!(
        peer.recv().await,
        Some(WireMessage::Binary(Bytes::from_static(b"\x03camABCD")))
    );
    client.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn concurrent_sends_stay_intact() {
    let (connector, mut server) = memory::channel();
    let (client, mut peer) = connected(&connector, &mut server).await;
    let client = Arc::new(client);

    let mut tasks = Vec::new();
    for i in 0..32u32 {
        let client = Arc::clone(&client);
        tasks.push(tokio::spawn(async move {
            client.send_json("bulk", &json!({"i": i})).await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let mut seen = BTreeSet::new();
    for _ in 0..32 {
        let frame = next_json(&mut peer).await;
        assert_eq!(frame["channel"], "bulk");
        seen.insert(frame["payload"]["i"].as_u64().unwrap());
    }
    assert_eq!(seen, (0..32).collect::<BTreeSet<u64>>());
    client.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn malformed_frame_reports_one_error_and_loop_continues() {
    let (connector, mut server) = memory::channel();
    let (client, peer) = connected(&connector, &mut server).await;
    let errors = error_counter(&client);
    let (tx, mut rx) = mpsc::unbounded_channel();
    client.on_json_received(move |message| {
        let _ = tx.send(message.clone());
    });

    peer.send_text("not json").unwrap();
    peer.send_text(r#"{"channel":"a","payload":[1,2]}"#).unwrap();

    let message = rx.recv().await.unwrap();
    assert_eq!(message.channel, "a");
    assert_eq!(message.payload, json!([1, 2]));
    assert_eq!(errors.load(Ordering::SeqCst), 1);
    assert_eq!(client.state(), ConnectionState::Connected);
    client.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn array_frame_is_dropped_not_delivered() {
    let (connector, mut server) = memory::channel();
    let (client, peer) = connected(&connector, &mut server).await;
    let errors = error_counter(&client);
    let (tx, mut rx) = mpsc::unbounded_channel();
    client.on_json_received(move |message| {
        let _ = tx.send(message.clone());
    });

    peer.send_text(r#"["player/health", {"hp": 1}]"#).unwrap();
    peer.send_text(r#"{"channel":"player/health","payload":{"hp":2}}"#)
        .unwrap();

    let message = rx.recv().await.unwrap();
    assert_eq!(message.payload, json!({"hp": 2}));
    assert_eq!(errors.load(Ordering::SeqCst), 1);
    client.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn fragmented_messages_are_delivered_once() {
    let (connector, mut server) = memory::channel();
    let client = ClientBuilder::new(connector.clone())
        .config(ClientConfig {
            receive_buffer_size: 16,
            ..ClientConfig::default()
        })
        .token("t")
        .start();
    let peer = accept_handshake(&mut server).await;
    client
        .wait_for_state(ConnectionState::Connected)
        .await
        .unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    client.on_binary_received(move |frame| {
        let _ = tx.send(frame.to_owned());
    });

    let payload: Vec<u8> = (0..100u8).collect();
    let mut frame = vec![5u8];
    frame.extend_from_slice(b"video");
    frame.extend_from_slice(&payload);
    let pieces: Vec<Bytes> = frame.chunks(30).map(Bytes::copy_from_slice).collect();
    peer.send_fragments(MessageKind::Binary, pieces).unwrap();
    peer.send_binary(Bytes::from_static(b"\x01zend")).unwrap();

    let first = rx.recv().await.unwrap();
    assert_eq!(first.channel, "video");
    assert_eq!(&first.payload[..], payload.as_slice());
    let second = rx.recv().await.unwrap();
    assert_eq!(second.channel, "z");
    assert_eq!(&second.payload[..], b"end");
    client.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn peer_close_triggers_reconnect() {
    let (connector, mut server) = memory::channel();
    let (client, first) = connected(&connector, &mut server).await;

    first.close().unwrap();
    client
        .wait_for_state(ConnectionState::Disconnected)
        .await
        .unwrap();
    let before = Instant::now();

    let _second = accept_handshake(&mut server).await;
    assert!(before.elapsed() >= Duration::from_millis(2000));
    client
        .wait_for_state(ConnectionState::Connected)
        .await
        .unwrap();
    assert_eq!(connector.connect_attempts(), 2);
    client.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn dispose_stops_all_activity() {
    let (connector, _server) = memory::channel();
    connector.fail_next(1000);
    let client = ClientBuilder::new(connector.clone()).token("t").start();
    client
        .wait_for_state(ConnectionState::Disconnected)
        .await
        .unwrap();

    client.dispose().await;
    client.dispose().await;
    let attempts = connector.connect_attempts();
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(connector.connect_attempts(), attempts);
    assert!(client.is_disposed());
    assert_eq!(client.state(), ConnectionState::Disconnected);
    client.send_json("late", &json!(null)).await.unwrap();
    assert_eq!(connector.frames_written(), 0);
}

#[tokio::test(start_paused = true)]
async fn dispose_mid_receive_closes_connection() {
    let (connector, mut server) = memory::channel();
    let (client, mut peer) = connected(&connector, &mut server).await;
    let written = connector.frames_written();

    client.dispose().await;
    assert_eq!(peer.recv().await, None);
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(client
        .wait_for_state(ConnectionState::Connected)
        .await
        .is_err());

    client.send_json("after", &json!(1)).await.unwrap();
    assert_eq!(connector.frames_written(), written);
    assert_eq!(connector.connect_attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn update_schema_uses_internal_channel() {
    let (connector, mut server) = memory::channel();
    let (client, mut peer) = connected(&connector, &mut server).await;

    let document =
        ApiDocument::new().with_channel("light", ChannelSchema::new("Light").kind("toggle"));
    client.update_schema(&document).await;

    let frame = next_json(&mut peer).await;
    assert_eq!(frame["channel"], "__internal/api");
    assert_eq!(frame["payload"]["channels"]["light"]["type"], "toggle");
    client.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn router_receives_and_republishes() {
    let (connector, mut server) = memory::channel();
    let router = Arc::new(Router::new());
    let (tx, mut rx) = mpsc::unbounded_channel();
    router
        .json("player/health", ChannelSchema::new("Health"), move |payload| {
            let _ = tx.send(payload.clone());
        })
        .unwrap();

    let client = ClientBuilder::new(connector.clone())
        .token("t")
        .schema_source(router.clone())
        .start();
    router.attach(&client);

    let mut peer = accept_handshake(&mut server).await;
    let schema = next_json(&mut peer).await;
    assert!(schema["payload"]["channels"]["player/health"].is_object());
    client
        .wait_for_state(ConnectionState::Connected)
        .await
        .unwrap();

    peer.send_text(r#"{"channel":"player/health","payload":{"hp":9}}"#)
        .unwrap();
    assert_eq!(rx.recv().await.unwrap(), json!({"hp": 9}));

    router
        .json("player/name", ChannelSchema::new("Name"), |_| {})
        .unwrap();
    let update = next_json(&mut peer).await;
    assert_eq!(update["channel"], "__internal/api");
    assert!(update["payload"]["channels"]["player/name"].is_object());
    client.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn failed_send_reports_once_and_reconnects() {
    let (connector, mut server) = memory::channel();
    let (client, mut first) = connected(&connector, &mut server).await;
    let errors = error_counter(&client);

    first.close_inbound();
    let before = Instant::now();
    client
        .send_json("telemetry", &json!({"rpm": 900}))
        .await
        .unwrap();
    assert_eq!(errors.load(Ordering::SeqCst), 1);

    // The peer stays silent, so only the failed write can end the read.
    let _second = accept_handshake(&mut server).await;
    assert!(before.elapsed() >= Duration::from_millis(2000));
    client
        .wait_for_state(ConnectionState::Connected)
        .await
        .unwrap();
    assert_eq!(connector.connect_attempts(), 2);
    assert_eq!(errors.load(Ordering::SeqCst), 1);
    client.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn stalled_close_does_not_block_reconnect() {
    let (connector, mut server) = memory::channel();
    let client = ClientBuilder::new(StalledClose(connector.clone()))
        .token("t")
        .start();
    let first = accept_handshake(&mut server).await;
    client
        .wait_for_state(ConnectionState::Connected)
        .await
        .unwrap();

    first.close().unwrap();
    let _second = accept_handshake(&mut server).await;
    client
        .wait_for_state(ConnectionState::Connected)
        .await
        .unwrap();
    assert_eq!(connector.connect_attempts(), 2);

    let disposed = tokio::time::timeout(Duration::from_secs(60), client.dispose()).await;
    assert!(disposed.is_ok(), "dispose should not wait on a stalled close");
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn dispose_cancels_stalled_teardown() {
    let (connector, mut server) = memory::channel();
    let client = ClientBuilder::new(StalledClose(connector.clone()))
        .config(ClientConfig {
            close_timeout: Duration::from_secs(3600),
            ..ClientConfig::default()
        })
        .token("t")
        .start();
    let first = accept_handshake(&mut server).await;
    client
        .wait_for_state(ConnectionState::Connected)
        .await
        .unwrap();

    first.close().unwrap();
    client
        .wait_for_state(ConnectionState::Disconnected)
        .await
        .unwrap();
    // Past the reconnect delay: the loop is now closing the old sink.
    tokio::time::sleep(Duration::from_millis(2100)).await;

    let disposed = tokio::time::timeout(Duration::from_secs(60), client.dispose()).await;
    assert!(disposed.is_ok(), "dispose should cancel the teardown");
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(connector.connect_attempts(), 1);
}
