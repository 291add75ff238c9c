//! End-to-end session behaviour against an in-process gateway.

mod common;

use std::io::Write;

use cordial_events::{ChannelRef, EventBus, GatewayEvent};
use cordial_gateway::{GatewayClient, SessionPhase};
use flate2::Compression;
use flate2::write::ZlibEncoder;
use serde_json::json;

use common::{FakeGateway, StaticBootstrap, config, next_event};

#[tokio::test]
async fn identify_ready_dispatch_and_heartbeat() {
    let gateway = FakeGateway::bind().await;
    let bus = EventBus::new();
    let mut events = bus.subscribe();

    let login = tokio::spawn(
        GatewayClient::builder(config())
            .event_bus(bus.clone())
            .bootstrap(StaticBootstrap(gateway.url.clone()))
            .login(),
    );
    let mut conn = gateway.accept().await;
    let client = login.await.unwrap().unwrap();
    assert_eq!(client.phase(), SessionPhase::Identifying);
    let handle = client.handle();
    let run = tokio::spawn(client.run());

    let identify = conn.expect_op(2).await;
    assert_eq!(identify["d"]["token"], "test-token");
    assert_eq!(identify["d"]["v"], 4);

    conn.hello_and_ready("sess-1", 1).await;
    next_event(&mut events, "ready").await;

    let heartbeat = conn.expect_op(1).await;
    assert_eq!(heartbeat["d"], 1);

    // A compressed frame is handled exactly like a text frame.
    let text = json!({
        "op": 0, "t": "MESSAGE_CREATE", "s": 2,
        "d": {"id": "m1", "channel_id": "c1", "author": {"id": "u1"}, "content": "hi"},
    })
    .to_string();
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(text.as_bytes()).unwrap();
    conn.send_binary(encoder.finish().unwrap()).await;

    let event = next_event(&mut events, "message_received").await;
    match &*event {
        GatewayEvent::MessageReceived {
            content, metadata, ..
        } => {
            assert_eq!(content, "hi");
            assert_eq!(metadata.sequence, Some(2));
        },
        other => panic!("unexpected event {other:?}"),
    }

    handle.shutdown();
    assert_eq!(conn.expect_close().await, Some(1000));
    next_event(&mut events, "shutdown").await;
    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn server_close_resumes_session() {
    let gateway = FakeGateway::bind().await;
    let bus = EventBus::new();
    let mut events = bus.subscribe();

    let login = tokio::spawn(
        GatewayClient::builder(config())
            .event_bus(bus.clone())
            .bootstrap(StaticBootstrap(gateway.url.clone()))
            .login(),
    );
    let mut conn = gateway.accept().await;
    let client = login.await.unwrap().unwrap();
    let handle = client.handle();
    let run = tokio::spawn(client.run());

    conn.expect_op(2).await;
    conn.hello_and_ready("sess-42", 7).await;
    next_event(&mut events, "ready").await;
    conn.dispatch("TYPING_START", 9, json!({"user_id": "u", "channel_id": "c"}))
        .await;
    next_event(&mut events, "user_typing").await;

    conn.close(4000).await;
    let event = next_event(&mut events, "disconnected").await;
    match &*event {
        GatewayEvent::Disconnected {
            closed_by_server,
            close_code,
            channels,
            ..
        } => {
            assert!(*closed_by_server);
            assert_eq!(*close_code, Some(4000));
            assert!(channels.is_empty());
        },
        other => panic!("unexpected event {other:?}"),
    }

    let mut conn = gateway.accept().await;
    let resume = conn.expect_op(6).await;
    assert_eq!(resume["d"]["session_id"], "sess-42");
    assert_eq!(resume["d"]["seq"], 9);
    assert_eq!(resume["d"]["token"], "test-token");

    conn.dispatch("RESUMED", 10, json!({"heartbeat_interval": 30000}))
        .await;
    next_event(&mut events, "resumed").await;
    assert!(handle.is_connected());

    handle.shutdown();
    conn.expect_close().await;
    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn invalid_session_reidentifies_and_reconnects() {
    let gateway = FakeGateway::bind().await;
    let bus = EventBus::new();
    let mut events = bus.subscribe();

    let login = tokio::spawn(
        GatewayClient::builder(config())
            .event_bus(bus.clone())
            .bootstrap(StaticBootstrap(gateway.url.clone()))
            .login(),
    );
    let mut conn = gateway.accept().await;
    let client = login.await.unwrap().unwrap();
    let handle = client.handle();
    let run = tokio::spawn(client.run());

    conn.expect_op(2).await;
    conn.hello_and_ready("first", 3).await;
    next_event(&mut events, "ready").await;

    conn.send_json(json!({"op": 9, "d": false})).await;
    let identify = conn.expect_op(2).await;
    assert_eq!(identify["d"]["token"], "test-token");

    conn.hello_and_ready("second", 1).await;
    next_event(&mut events, "reconnected").await;

    handle.shutdown();
    conn.expect_close().await;
    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn server_reconnect_request_closes_and_resumes() {
    let gateway = FakeGateway::bind().await;
    let bus = EventBus::new();
    let mut events = bus.subscribe();

    let login = tokio::spawn(
        GatewayClient::builder(config())
            .event_bus(bus.clone())
            .bootstrap(StaticBootstrap(gateway.url.clone()))
            .login(),
    );
    let mut conn = gateway.accept().await;
    let client = login.await.unwrap().unwrap();
    let handle = client.handle();
    let run = tokio::spawn(client.run());

    conn.expect_op(2).await;
    conn.hello_and_ready("sess", 1).await;
    next_event(&mut events, "ready").await;

    conn.send_json(json!({"op": 7})).await;
    assert_eq!(conn.expect_close().await, Some(1000));

    let event = next_event(&mut events, "disconnected").await;
    assert!(matches!(
        &*event,
        GatewayEvent::Disconnected {
            closed_by_server: false,
            ..
        }
    ));

    let mut conn = gateway.accept().await;
    conn.expect_op(6).await;

    handle.shutdown();
    conn.expect_close().await;
    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn no_reconnect_emits_shutdown() {
    let gateway = FakeGateway::bind().await;
    let bus = EventBus::new();
    let mut events = bus.subscribe();
    let mut cfg = config();
    cfg.auto_reconnect = false;

    let login = tokio::spawn(
        GatewayClient::builder(cfg)
            .event_bus(bus.clone())
            .bootstrap(StaticBootstrap(gateway.url.clone()))
            .login(),
    );
    let mut conn = gateway.accept().await;
    let client = login.await.unwrap().unwrap();
    let run = tokio::spawn(client.run());

    conn.expect_op(2).await;
    conn.hello_and_ready("sess", 1).await;
    next_event(&mut events, "ready").await;

    conn.close(1001).await;
    let event = next_event(&mut events, "shutdown").await;
    assert!(matches!(
        &*event,
        GatewayEvent::Shutdown { channels, .. } if channels.is_empty()
    ));
    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn voice_channel_rejoined_after_resume() {
    let gateway = FakeGateway::bind().await;
    let bus = EventBus::new();
    let mut events = bus.subscribe();

    let login = tokio::spawn(
        GatewayClient::builder(config())
            .event_bus(bus.clone())
            .bootstrap(StaticBootstrap(gateway.url.clone()))
            .login(),
    );
    let mut conn = gateway.accept().await;
    let client = login.await.unwrap().unwrap();
    let handle = client.handle();
    let run = tokio::spawn(client.run());

    conn.expect_op(2).await;
    conn.send_json(json!({"op": 10, "d": {"heartbeat_interval": 30000}}))
        .await;
    conn.dispatch(
        "READY",
        1,
        json!({
            "session_id": "sess",
            "user": {"id": "me", "username": "cordial"},
            "guilds": [{
                "id": "g1",
                "name": "Guild",
                "member_count": 1,
                "members": [{"user": {"id": "me", "username": "cordial"}, "roles": []}],
                "channels": [{"id": "v1", "type": "voice", "name": "Lounge"}],
            }],
        }),
    )
    .await;
    next_event(&mut events, "ready").await;

    let manager = handle.audio_manager("g1").unwrap();
    let channel = handle.registry().voice_channel("v1").unwrap();
    manager.open_audio_connection(&channel).unwrap();
    let join = conn.expect_op(4).await;
    assert_eq!(join["d"]["channel_id"], "v1");

    conn.close(4000).await;
    let event = next_event(&mut events, "disconnected").await;
    match &*event {
        GatewayEvent::Disconnected { channels, .. } => {
            assert_eq!(channels, &vec![ChannelRef::new("g1", "v1")]);
        },
        other => panic!("unexpected event {other:?}"),
    }

    let mut conn = gateway.accept().await;
    conn.expect_op(6).await;
    conn.dispatch("RESUMED", 2, json!({})).await;

    let leave = conn.expect_op(4).await;
    assert!(leave["d"]["channel_id"].is_null());
    let rejoin = conn.expect_op(4).await;
    assert_eq!(rejoin["d"]["channel_id"], "v1");
    next_event(&mut events, "resumed").await;

    handle.shutdown();
    // Shutdown leaves voice before closing.
    let leave = conn.expect_op(4).await;
    assert!(leave["d"]["channel_id"].is_null());
    conn.expect_close().await;

    let event = next_event(&mut events, "shutdown").await;
    assert!(matches!(
        &*event,
        GatewayEvent::Shutdown { channels, .. } if channels.len() == 1
    ));
    run.await.unwrap().unwrap();
}
