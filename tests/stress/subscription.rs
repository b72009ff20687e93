//! Subscription client stress tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use redis_heimdall::{
    create_subscription_client, HeimdallContext, HeimdallError, HeimdallOptions, Reason,
    SubscriptionOptions,
};
use redis_heimdall_core::memory::MemoryServer;

fn options(name: &str) -> SubscriptionOptions {
    SubscriptionOptions::new(
        HeimdallOptions::builder()
            .name(name)
            .reconnect_interval(Duration::from_millis(5))
            .build(),
    )
}

/// Test: A large registry is replayed with one command per kind
#[tokio::test]
#[ignore]
async fn stress_1000_channels_replayed() {
    println!("\n=== Subscription: replay 1000 channels ===");

    let server = MemoryServer::new();
    let context = HeimdallContext::new();
    let client = create_subscription_client(&context, Arc::new(server.clone()), options("wide"), |_| {})
        .await
        .unwrap();

    for chunk in (0..1000).collect::<Vec<_>>().chunks(100) {
        client
            .add_channels(chunk.iter().map(|i| format!("channel-{i}")))
            .await
            .unwrap();
    }
    assert_eq!(client.registry().channels().len(), 1000);

    server.clear_command_log();
    let start = Instant::now();
    client.supervisor().handle_connection_failure(HeimdallError::with_reason(
        Reason::ConnectionIssue,
        "Connection did end",
    ));
    for _ in 0..500 {
        if server.subscribed_channels().len() == 1000 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    println!("Replayed in {:?}", start.elapsed());

    assert_eq!(server.subscribed_channels().len(), 1000);
    assert_eq!(server.count_commands("SUBSCRIBE"), 1);
}

/// Test: Message flood reaches the callback
#[tokio::test]
#[ignore]
async fn stress_100k_messages() {
    println!("\n=== Subscription: 100k messages ===");

    let server = MemoryServer::new();
    let received = Arc::new(AtomicUsize::new(0));
    let sink = Arc::clone(&received);
    let _client = create_subscription_client(
        &HeimdallContext::new(),
        Arc::new(server.clone()),
        options("flood").channel_name("firehose"),
        move |_| {
            sink.fetch_add(1, Ordering::Relaxed);
        },
    )
    .await
    .unwrap();

    let start = Instant::now();
    let count = 100_000;
    for i in 0..count {
        server.publish("firehose", &i.to_string());
    }
    let elapsed = start.elapsed();

    println!("Delivered {} messages in {:?}", count, elapsed);
    println!("Throughput: {:.0} msg/sec", count as f64 / elapsed.as_secs_f64());
    assert_eq!(received.load(Ordering::Relaxed), count);
}
