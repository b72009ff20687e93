//! Reconnect process metrics

use super::helpers::*;
use serial_test::serial;
use std::sync::Arc;
use std::time::Duration;

use redis_heimdall_core::memory::MemoryServer;
use redis_heimdall_core::TransportError;
use redis_heimdall_reconnect::{ReconnectConfig, ReconnectProcess, ReconnectState};

fn process(server: &MemoryServer, config: ReconnectConfig) -> ReconnectProcess {
    ReconnectProcess::new(
        Arc::new(server.clone()),
        vec!["redis://localhost:6379".to_string()],
        config,
    )
}

#[tokio::test]
#[serial]
async fn attempts_are_counted_by_result() {
    init_recorder();

    let server = MemoryServer::new();
    server.fail_next_connect(TransportError::io(
        std::io::ErrorKind::ConnectionRefused,
        "Connection refused",
    ));
    let config = ReconnectConfig::builder()
        .name("attempts")
        .interval(Duration::from_millis(10))
        .build();

    // One refused attempt, then a verified transport
    process(&server, config)
        .start(&ReconnectState::new())
        .await
        .unwrap();

    assert_eq!(attempts("attempts", "failure"), 1);
    assert_eq!(attempts("attempts", "success"), 1);
}

#[tokio::test]
#[serial]
async fn give_up_carries_the_reason() {
    init_recorder();

    let server = MemoryServer::new();
    server.set_reachable(false);
    let config = ReconnectConfig::builder()
        .name("give_up")
        .interval(Duration::from_millis(10))
        .max_attempts(2)
        .build();

    let _ = process(&server, config).start(&ReconnectState::new()).await;

    assert_eq!(attempts("give_up", "failure"), 2);
    assert_eq!(
        counter(
            "heimdall_reconnect_give_ups_total",
            &[("client", "give_up"), ("reason", "MAX_ATTEMPTS_REACHED")],
        ),
        1
    );
}
