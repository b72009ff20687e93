use std::sync::Arc;
use std::time::Duration;

use redis_heimdall::{
    create_client, Client, ConnectionState, HeimdallContext, Reason, DEFAULT_START_TOPIC,
    DEFAULT_SUCCEEDED_TOPIC,
};
use redis_heimdall_core::memory::MemoryServer;
use redis_heimdall_core::{Command, Request};
use tokio::time::{sleep, sleep_until, Instant};

use crate::support::{drain_topics, fast_options};

#[tokio::test(start_paused = true)]
async fn short_outage_heals_within_the_budget() {
    let server = MemoryServer::new();
    let context = HeimdallContext::new();
    let mut rx = context.subscribe_notifications();
    let options = fast_options("outage").max_reconnect_attempts(10).build();
    let client = create_client(&context, Arc::new(server.clone()), options);
    client
        .send(Request::cmd(Command::SET).args(["k", "v"]))
        .await
        .unwrap();

    let t0 = Instant::now();
    server.set_reachable(false);
    let restore = server.clone();
    tokio::spawn(async move {
        sleep(Duration::from_millis(250)).await;
        restore.set_reachable(true);
    });

    let err = client
        .send(Request::cmd(Command::GET).arg("k"))
        .await
        .unwrap_err();
    assert!(err.is_reason(Reason::ConnectionIssue));

    sleep_until(t0 + Duration::from_millis(150)).await;
    let err = client
        .send(Request::cmd(Command::GET).arg("k"))
        .await
        .unwrap_err();
    assert!(err.is_reason(Reason::AccessDuringReconnect));

    sleep_until(t0 + Duration::from_millis(400)).await;
    let reply = client
        .send(Request::cmd(Command::GET).arg("k"))
        .await
        .unwrap();
    assert_eq!(reply.as_string().as_deref(), Some("v"));

    assert_eq!(client.state(), ConnectionState::Connected);
    assert_eq!(client.supervisor().reconnect_state().episodes(), 1);
    assert_eq!(client.supervisor().reconnect_state().attempts(), 3);
    assert_eq!(
        drain_topics(&mut rx),
        vec![DEFAULT_START_TOPIC, DEFAULT_SUCCEEDED_TOPIC]
    );
}
