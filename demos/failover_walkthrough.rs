//! Walks a pooled, a light and a subscription client through a server outage.
//!
//! Run with:
//!
//! ```bash
//! RUST_LOG=redis_heimdall=debug,redis_heimdall_reconnect=debug \
//!     cargo run --example failover_walkthrough
//! ```

use std::sync::Arc;
use std::time::Duration;

use redis_heimdall::{
    create_client, create_light_client, create_subscription_client, Client, HeimdallContext,
    HeimdallOptions, SubscriptionOptions,
};
use redis_heimdall_core::memory::MemoryServer;
use redis_heimdall_core::{Command, Request};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let server = MemoryServer::new();
    let context = HeimdallContext::new();

    let mut notifications = context.subscribe_notifications();
    tokio::spawn(async move {
        while let Ok(notification) = notifications.recv().await {
            println!(
                "[bus] {} {}",
                notification.topic,
                notification.payload.unwrap_or_default()
            );
        }
    });

    let options = |name: &str| {
        HeimdallOptions::builder()
            .name(name)
            .endpoint("redis://cache:6379")
            .reconnect_interval(Duration::from_millis(200))
            .max_reconnect_attempts(25)
            .build()
    };

    let pooled = create_client(&context, Arc::new(server.clone()), options("pooled"));
    let light = create_light_client(&context, Arc::new(server.clone()), options("light"));
    let subscriber = create_subscription_client(
        &context,
        Arc::new(server.clone()),
        SubscriptionOptions::new(options("subscriber"))
            .channel_name("orders")
            .channel_pattern("alerts.*"),
        |message| {
            println!(
                "[sub] {} ({}) {}",
                message.channel,
                message.pattern.as_deref().unwrap_or("-"),
                message.message
            );
        },
    )
    .await?;

    pooled
        .send(Request::cmd(Command::SET).args(["greeting", "hello"]))
        .await?;
    light
        .send(Request::cmd(Command::RPUSH).args(["log", "started"]))
        .await?;
    server.publish("orders", "order #1");

    println!("--- taking the server down for one second ---");
    server.set_reachable(false);

    for client in [("pooled", &pooled as &dyn Client), ("light", &light as &dyn Client)] {
        match client.1.send(Request::cmd(Command::GET).arg("greeting")).await {
            Ok(reply) => println!("[{}] unexpected reply {reply}", client.0),
            Err(e) => println!("[{}] failed fast: {e}", client.0),
        }
    }

    tokio::time::sleep(Duration::from_secs(1)).await;
    server.set_reachable(true);
    println!("--- server is back ---");

    while pooled.supervisor().is_reconnecting()
        || light.supervisor().is_reconnecting()
        || subscriber.supervisor().is_reconnecting()
    {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let greeting = pooled
        .send(Request::cmd(Command::GET).arg("greeting"))
        .await?;
    println!("[pooled] greeting = {}", greeting.as_string().unwrap_or_default());
    let length = light
        .send(Request::cmd(Command::RPUSH).args(["log", "recovered"]))
        .await?;
    println!("[light] log length = {}", length.as_integer().unwrap_or_default());

    server.publish("orders", "order #2");
    server.publish("alerts.disk", "disk at 91%");

    println!(
        "[sub] resubscribed channels={:?} patterns={:?}",
        server.subscribed_channels(),
        server.subscribed_patterns()
    );

    subscriber.close().await;
    light.close().await;
    pooled.close().await;
    Ok(())
}
