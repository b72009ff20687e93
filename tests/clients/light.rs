use std::sync::Arc;

use futures::future::join_all;
use redis_heimdall::{create_light_client, Client, ConnectionState, HeimdallContext, Reason};
use redis_heimdall_core::memory::MemoryServer;
use redis_heimdall_core::{Command, Request};

use crate::support::{fast_options, reconnect_succeeded};

fn echo(i: usize) -> Request {
    Request::cmd(Command::ECHO).arg(i.to_string())
}

#[tokio::test]
async fn queued_sends_and_batches_keep_issue_order() {
    let server = MemoryServer::new();
    let client = create_light_client(
        &HeimdallContext::new(),
        Arc::new(server.clone()),
        fast_options("ordered").build(),
    );

    let head: Vec<_> = (0..5).map(|i| client.send(echo(i))).collect();
    let batch = client.batch(vec![echo(5), echo(6)]);
    let tail: Vec<_> = (7..10).map(|i| client.send(echo(i))).collect();
    assert_eq!(client.queued(), 9);

    let (head, batch, tail) = tokio::join!(join_all(head), batch, join_all(tail));
    assert!(head.iter().chain(tail.iter()).all(Result::is_ok));
    assert_eq!(batch.unwrap().len(), 2);

    let expected: Vec<String> = (0..10).map(|i| format!("ECHO {i}")).collect();
    assert_eq!(server.command_log(), expected);
    assert_eq!(server.live_connections(), 1);
}

#[tokio::test]
async fn commands_after_start_follow_the_queued_ones() {
    let server = MemoryServer::new();
    let client = create_light_client(
        &HeimdallContext::new(),
        Arc::new(server.clone()),
        fast_options("late").build(),
    );

    let queued = client.send(Request::cmd(Command::RPUSH).args(["order", "queued"]));
    queued.await.unwrap();
    let reply = client
        .send(Request::cmd(Command::RPUSH).args(["order", "later"]))
        .await
        .unwrap();

    assert_eq!(reply.as_integer(), Some(2));
    assert!(client.is_started());
}

#[tokio::test(start_paused = true)]
async fn lost_connection_is_replaced_after_reconnect() {
    let server = MemoryServer::new();
    let context = HeimdallContext::new();
    let mut rx = context.subscribe_notifications();
    let client = create_light_client(&context, Arc::new(server.clone()), fast_options("light").build());
    client.send(Request::cmd(Command::PING)).await.unwrap();

    server.drop_connections();
    assert_eq!(client.state(), ConnectionState::Reconnecting);
    let err = client.send(Request::cmd(Command::PING)).await.unwrap_err();
    assert!(err.is_reason(Reason::AccessDuringReconnect));

    reconnect_succeeded(&mut rx).await;
    let reply = client
        .send(Request::cmd(Command::ECHO).arg("again"))
        .await
        .unwrap();
    assert_eq!(reply.as_string().as_deref(), Some("again"));
    assert_eq!(server.live_connections(), 1);
    assert_eq!(server.closed_clients(), vec![0]);
    assert_eq!(client.queued(), 0);
}

#[tokio::test(start_paused = true)]
async fn commands_queued_while_unreachable_run_once_reconnected() {
    let server = MemoryServer::new();
    server.set_reachable(false);
    let context = HeimdallContext::new();
    let mut rx = context.subscribe_notifications();
    let client = create_light_client(&context, Arc::new(server.clone()), fast_options("patient").build());

    let first = client.send(Request::cmd(Command::SET).args(["k", "1"]));
    let second = client.send(Request::cmd(Command::GET).arg("k"));
    tokio::task::yield_now().await;
    assert_eq!(client.state(), ConnectionState::Reconnecting);
    assert!(!client.is_started());

    server.set_reachable(true);
    reconnect_succeeded(&mut rx).await;

    first.await.unwrap();
    let value = second.await.unwrap();
    assert_eq!(value.as_string().as_deref(), Some("1"));
    assert!(client.is_started());
}

#[tokio::test]
async fn queued_commands_fail_when_start_fails_without_reconnect() {
    let server = MemoryServer::new();
    server.set_reachable(false);
    let options = fast_options("no-retry").reconnect(false).build();
    let client = create_light_client(&HeimdallContext::new(), Arc::new(server.clone()), options);

    let err = client.send(Request::cmd(Command::PING)).await.unwrap_err();
    assert!(err.is_reason(Reason::ConnectionIssue));
    assert_eq!(client.queued(), 0);
    assert!(!client.is_started());
}
