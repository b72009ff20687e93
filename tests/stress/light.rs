//! Light client stress tests

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use redis_heimdall::{create_light_client, Client, HeimdallContext, HeimdallOptions};
use redis_heimdall_core::memory::MemoryServer;
use redis_heimdall_core::{Command, Request};

fn options(name: &str) -> HeimdallOptions {
    HeimdallOptions::builder()
        .name(name)
        .reconnect_interval(Duration::from_millis(5))
        .build()
}

/// Test: A deep startup queue drains in issue order
#[tokio::test]
#[ignore]
async fn stress_10k_queued_commands_keep_order() {
    println!("\n=== Light: 10k queued commands ===");

    let server = MemoryServer::new();
    let client = create_light_client(&HeimdallContext::new(), Arc::new(server.clone()), options("queue"));

    let start = Instant::now();
    let count = 10_000;
    let calls: Vec<_> = (0..count)
        .map(|i| client.send(Request::cmd(Command::RPUSH).args(["order".to_string(), i.to_string()])))
        .collect();
    assert_eq!(client.queued(), count);

    let results = join_all(calls).await;
    println!("Drained {} commands in {:?}", count, start.elapsed());
    assert!(results.iter().all(Result::is_ok));

    let list = client
        .send(Request::cmd(Command::LRANGE).args(["order", "0", "-1"]))
        .await
        .unwrap();
    let items: Vec<String> = list
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|item| item.as_string())
        .collect();
    let expected: Vec<String> = (0..count).map(|i| i.to_string()).collect();
    assert_eq!(items, expected);
}

/// Test: Back-to-back connection losses
#[tokio::test]
#[ignore]
async fn stress_50_consecutive_failovers() {
    println!("\n=== Light: 50 consecutive failovers ===");

    let server = MemoryServer::new();
    let client = create_light_client(&HeimdallContext::new(), Arc::new(server.clone()), options("failover"));
    client.send(Request::cmd(Command::PING)).await.unwrap();

    let start = Instant::now();
    let rounds = 50;
    for round in 0..rounds {
        server.drop_connections();
        for _ in 0..500 {
            if !client.supervisor().is_reconnecting() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        let reply = client
            .send(Request::cmd(Command::ECHO).arg(round.to_string()))
            .await
            .unwrap();
        assert_eq!(reply.as_string(), Some(round.to_string()));
    }
    println!("Completed {} failovers in {:?}", rounds, start.elapsed());

    assert_eq!(client.supervisor().reconnect_state().episodes(), rounds);
    assert_eq!(server.clients_created(), rounds + 1);
    assert_eq!(server.closed_clients().len() as u64, rounds);
    assert_eq!(server.live_connections(), 1);
}
