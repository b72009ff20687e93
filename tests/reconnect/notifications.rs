use std::sync::Arc;

use redis_heimdall::{
    ConnectionState, HeimdallContext, HeimdallError, Reason, Supervisor, DEFAULT_START_TOPIC,
    DEFAULT_SUCCEEDED_TOPIC,
};
use redis_heimdall_core::memory::MemoryServer;

use crate::support::{drain_topics, eventually, fast_options, next_on, reconnect_started};

fn connection_lost() -> HeimdallError {
    HeimdallError::with_reason(Reason::ConnectionIssue, "Connection did end")
}

#[tokio::test(start_paused = true)]
async fn start_and_success_are_published_in_order() {
    let server = MemoryServer::new();
    let context = HeimdallContext::new();
    let mut rx = context.subscribe_notifications();
    let supervisor = Supervisor::new(&context, Arc::new(server), fast_options("ordered").build());

    supervisor.handle_connection_failure(connection_lost());

    let start = reconnect_started(&mut rx).await;
    assert_eq!(
        start.payload.as_deref(),
        Some("CONNECTION_ISSUE: Connection did end")
    );
    let done = next_on(&mut rx, DEFAULT_SUCCEEDED_TOPIC).await;
    assert_eq!(done.payload, None);
    assert!(drain_topics(&mut rx).is_empty());
}

#[tokio::test(start_paused = true)]
async fn custom_topics_replace_the_defaults() {
    let server = MemoryServer::new();
    let context = HeimdallContext::new();
    let mut rx = context.subscribe_notifications();
    let options = fast_options("custom")
        .reconnect(false)
        .reconnecting_start_topic("cache/down")
        .reconnecting_succeeded_topic("cache/up")
        .reconnecting_failed_topic("cache/lost")
        .build();
    let supervisor = Supervisor::new(&context, Arc::new(server), options);

    supervisor.handle_connection_failure(connection_lost());

    next_on(&mut rx, "cache/down").await;
    let failed = next_on(&mut rx, "cache/lost").await;
    assert!(failed.payload.unwrap().starts_with("RECONNECT_DISABLED"));
    assert_eq!(supervisor.state(), ConnectionState::Disconnected);
    assert!(!drain_topics(&mut rx).iter().any(|t| t == DEFAULT_START_TOPIC));
}

#[tokio::test(start_paused = true)]
async fn disabled_notifications_publish_nothing() {
    let server = MemoryServer::new();
    let context = HeimdallContext::new();
    let mut rx = context.subscribe_notifications();
    let options = fast_options("quiet")
        .reconnecting_notifications(false)
        .build();
    let supervisor = Supervisor::new(&context, Arc::new(server), options);

    supervisor.handle_connection_failure(connection_lost());
    eventually(|| supervisor.state() == ConnectionState::Connected).await;

    assert_eq!(supervisor.reconnect_state().reconnects(), 1);
    assert!(drain_topics(&mut rx).is_empty());
}

#[tokio::test(start_paused = true)]
async fn clients_on_one_context_share_the_bus() {
    let context = HeimdallContext::new();
    let mut rx = context.subscribe_notifications();
    let first = Supervisor::new(&context, Arc::new(MemoryServer::new()), fast_options("first").build());
    let second = Supervisor::new(&context, Arc::new(MemoryServer::new()), fast_options("second").build());

    first.handle_connection_failure(connection_lost());
    second.handle_connection_failure(connection_lost());
    eventually(|| {
        first.state() == ConnectionState::Connected && second.state() == ConnectionState::Connected
    })
    .await;

    let topics = drain_topics(&mut rx);
    assert_eq!(topics.iter().filter(|t| *t == DEFAULT_START_TOPIC).count(), 2);
    assert_eq!(
        topics.iter().filter(|t| *t == DEFAULT_SUCCEEDED_TOPIC).count(),
        2
    );
}
