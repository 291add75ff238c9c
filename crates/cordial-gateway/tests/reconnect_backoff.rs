//! Reconnect timing on a paused clock.

mod common;

use std::time::Duration;

use cordial_events::{EventBus, GatewayEvent};
use cordial_gateway::{GatewayClient, GatewayConfig};
use tokio::time::Instant;

use common::{FakeGateway, StaticBootstrap, wait_for_event};

const SLACK: Duration = Duration::from_millis(100);

fn assert_near(actual: Duration, expected: Duration) {
    assert!(
        actual >= expected && actual < expected.saturating_add(SLACK),
        "expected about {expected:?}, got {actual:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn failed_reconnects_double_the_delay() {
    let gateway = FakeGateway::bind().await;
    let bus = EventBus::new();
    let mut events = bus.subscribe();

    let login = tokio::spawn(
        GatewayClient::builder(GatewayConfig::new("test-token"))
            .event_bus(bus.clone())
            .bootstrap(StaticBootstrap(gateway.url.clone()))
            .login(),
    );
    let mut conn = gateway.accept_without_deadline().await;
    let client = login.await.unwrap().unwrap();
    let handle = client.handle();
    let run = tokio::spawn(client.run());

    conn.close(4000).await;
    let disconnected = wait_for_event(&mut events, "disconnected").await;
    assert!(matches!(
        &*disconnected,
        GatewayEvent::Disconnected {
            closed_by_server: true,
            close_code: Some(4000),
            ..
        }
    ));
    let start = Instant::now();
    drop(conn);

    let mut attempts = Vec::new();
    for _ in 0..3 {
        attempts.push(gateway.refuse_next().await.saturating_duration_since(start));
    }
    assert_near(attempts[0], Duration::from_secs(2));
    assert_near(attempts[1], Duration::from_secs(6));
    assert_near(attempts[2], Duration::from_secs(14));

    handle.shutdown();
    wait_for_event(&mut events, "shutdown").await;
    run.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn shutdown_interrupts_backoff_wait() {
    let gateway = FakeGateway::bind().await;
    let bus = EventBus::new();
    let mut events = bus.subscribe();

    let mut config = GatewayConfig::new("test-token");
    config.backoff_floor = Duration::from_secs(60);
    let login = tokio::spawn(
        GatewayClient::builder(config)
            .event_bus(bus.clone())
            .bootstrap(StaticBootstrap(gateway.url.clone()))
            .login(),
    );
    let mut conn = gateway.accept_without_deadline().await;
    let client = login.await.unwrap().unwrap();
    let handle = client.handle();
    let run = tokio::spawn(client.run());

    conn.close(4000).await;
    wait_for_event(&mut events, "disconnected").await;
    let start = Instant::now();

    handle.shutdown();
    wait_for_event(&mut events, "shutdown").await;
    run.await.unwrap().unwrap();

    assert!(handle.is_shutdown());
    assert!(start.elapsed() < Duration::from_secs(1));
}
