//! Pooled client stress tests

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use redis_heimdall::{create_client, Client, ConnectionState, HeimdallContext, HeimdallOptions};
use redis_heimdall_core::memory::MemoryServer;
use redis_heimdall_core::{Command, RedisError, Request};

use super::{ConcurrencyTracker, Outcomes};

fn options(name: &str) -> HeimdallOptions {
    HeimdallOptions::builder()
        .name(name)
        .reconnect_interval(Duration::from_millis(5))
        .build()
}

/// Test: High volume of commands on a healthy server
#[tokio::test]
#[ignore]
async fn stress_100k_sequential_commands() {
    println!("\n=== Pooled: 100k sequential commands ===");

    let server = MemoryServer::new();
    let client = create_client(&HeimdallContext::new(), Arc::new(server.clone()), options("volume"));

    let start = Instant::now();
    let count = 100_000;
    for _ in 0..count {
        client
            .send(Request::cmd(Command::INCR).arg("counter"))
            .await
            .unwrap();
    }
    let elapsed = start.elapsed();

    println!("Completed {} commands in {:?}", count, elapsed);
    println!("Throughput: {:.0} cmd/sec", count as f64 / elapsed.as_secs_f64());

    assert_eq!(server.value("counter").as_deref(), Some("100000"));
    assert_eq!(server.live_connections(), 0);
    assert_eq!(client.supervisor().reconnect_state().episodes(), 0);
}

/// Test: Many concurrent callers while connections keep failing
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
#[ignore]
async fn stress_concurrent_callers_during_failover() {
    println!("\n=== Pooled: 1000 callers across 10 connection losses ===");

    let server = MemoryServer::new();
    let client = create_client(&HeimdallContext::new(), Arc::new(server.clone()), options("failover"));
    let outcomes = Arc::new(Outcomes::default());
    let tracker = ConcurrencyTracker::new();

    let breaker = {
        let server = server.clone();
        tokio::spawn(async move {
            for _ in 0..10 {
                tokio::time::sleep(Duration::from_millis(20)).await;
                server.fail_next(RedisError::connection_closed().into());
            }
        })
    };

    let start = Instant::now();
    let callers: Vec<_> = (0..1000)
        .map(|_| {
            let client = client.clone();
            let outcomes = Arc::clone(&outcomes);
            let tracker = Arc::clone(&tracker);
            tokio::spawn(async move {
                for _ in 0..20 {
                    tracker.enter();
                    let result = client.send(Request::cmd(Command::INCR).arg("n")).await;
                    tracker.exit();
                    outcomes.record(&result);
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();
    for caller in callers {
        caller.await.unwrap();
    }
    breaker.await.unwrap();

    println!("Completed in {:?}", start.elapsed());
    println!(
        "ok={} connection_issue={} during_reconnect={} other={} peak={}",
        outcomes.ok.load(Ordering::SeqCst),
        outcomes.connection_issue.load(Ordering::SeqCst),
        outcomes.during_reconnect.load(Ordering::SeqCst),
        outcomes.other.load(Ordering::SeqCst),
        tracker.peak()
    );

    assert_eq!(outcomes.total(), 20_000);
    assert_eq!(outcomes.other.load(Ordering::SeqCst), 0);
    let episodes = client.supervisor().reconnect_state().episodes();
    assert!(episodes <= 10, "episodes={episodes}");

    for _ in 0..500 {
        if !client.supervisor().is_reconnecting() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let reply = client.send(Request::cmd(Command::PING)).await.unwrap();
    assert_eq!(reply.as_string().as_deref(), Some("PONG"));
    assert_eq!(client.state(), ConnectionState::Connected);
}
