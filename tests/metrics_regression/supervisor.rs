//! Supervisor metrics

use super::helpers::*;
use serial_test::serial;
use std::sync::Arc;
use std::time::Duration;

use redis_heimdall::{
    create_client, Client, HeimdallContext, HeimdallError, HeimdallOptions, Reason, Supervisor,
};
use redis_heimdall_core::memory::MemoryServer;
use redis_heimdall_core::{Command, Request};

fn options(name: &str) -> HeimdallOptions {
    HeimdallOptions::builder()
        .name(name)
        .reconnect_interval(Duration::from_millis(10))
        .build()
}

fn lost() -> HeimdallError {
    HeimdallError::with_reason(Reason::ConnectionIssue, "Connection did end")
}

async fn wait_idle(supervisor: &Supervisor) {
    for _ in 0..500 {
        if !supervisor.is_reconnecting() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("episode did not finish");
}

#[tokio::test]
#[serial]
async fn successful_episode() {
    init_recorder();

    let supervisor = Supervisor::new(
        &HeimdallContext::new(),
        Arc::new(MemoryServer::new()),
        options("episode"),
    );
    supervisor.handle_connection_failure(lost());
    wait_idle(&supervisor).await;

    assert_eq!(
        counter("heimdall_reconnect_episodes_total", &[("client", "episode")]),
        1
    );
    assert_eq!(outcomes("episode", "succeeded"), 1);
    assert_eq!(gauge("heimdall_reconnecting", &[("client", "episode")]), 0.0);
}

#[tokio::test]
#[serial]
async fn disabled_reconnect_counts_as_failed() {
    init_recorder();

    let options = HeimdallOptions::builder()
        .name("failed_episode")
        .reconnect(false)
        .build();
    let supervisor = Supervisor::new(&HeimdallContext::new(), Arc::new(MemoryServer::new()), options);
    supervisor.handle_connection_failure(lost());
    wait_idle(&supervisor).await;

    assert_eq!(outcomes("failed_episode", "failed"), 1);
    assert_eq!(
        gauge("heimdall_reconnecting", &[("client", "failed_episode")]),
        0.0
    );
}

#[tokio::test]
#[serial]
async fn gauge_is_raised_while_reconnecting() {
    init_recorder();

    let server = MemoryServer::new();
    server.set_reachable(false);
    let supervisor = Supervisor::new(
        &HeimdallContext::new(),
        Arc::new(server.clone()),
        HeimdallOptions::builder()
            .name("raised")
            .reconnect_interval(Duration::from_secs(60))
            .build(),
    );
    supervisor.handle_connection_failure(lost());

    assert_eq!(gauge("heimdall_reconnecting", &[("client", "raised")]), 1.0);
    supervisor.close().await;
    assert_eq!(gauge("heimdall_reconnecting", &[("client", "raised")]), 0.0);
}

#[tokio::test]
#[serial]
async fn rejected_calls_by_reason() {
    init_recorder();

    let server = MemoryServer::new();
    server.set_reachable(false);
    let client = create_client(
        &HeimdallContext::new(),
        Arc::new(server.clone()),
        HeimdallOptions::builder()
            .name("rejected")
            .reconnect_interval(Duration::from_secs(60))
            .build(),
    );

    // First call starts the episode, the next two are rejected during it
    let _ = client.send(Request::cmd(Command::PING)).await;
    let _ = client.send(Request::cmd(Command::PING)).await;
    let _ = client.send(Request::cmd(Command::PING)).await;

    client.close().await;
    let _ = client.send(Request::cmd(Command::PING)).await;

    assert_eq!(rejections("rejected", "access_during_reconnect"), 2);
    assert_eq!(rejections("rejected", "closed"), 1);
}

#[tokio::test]
#[serial]
async fn pool_exhaustion_is_client_busy() {
    init_recorder();

    let server = MemoryServer::new();
    server.set_pool_size(1);
    let client = create_client(&HeimdallContext::new(), Arc::new(server.clone()), options("busy"));

    server.hold_responses();
    let held = tokio::spawn(client.send(Request::cmd(Command::PING)));
    tokio::task::yield_now().await;
    let _ = client.send(Request::cmd(Command::PING)).await;
    server.release_responses();
    let _ = held.await;

    assert_eq!(rejections("busy", "client_busy"), 1);
}
