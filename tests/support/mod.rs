//! Helpers shared by the integration test binaries.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use redis_heimdall::{
    HeimdallOptions, HeimdallOptionsBuilder, Notification, SubscriptionMessage,
    DEFAULT_FAILED_TOPIC, DEFAULT_START_TOPIC, DEFAULT_SUCCEEDED_TOPIC,
};
use tokio::sync::broadcast;

pub const ENDPOINT: &str = "redis://localhost:6379";

/// Builder preset with a short fixed reconnect interval.
pub fn fast_options(name: &str) -> HeimdallOptionsBuilder {
    HeimdallOptions::builder()
        .name(name)
        .endpoint(ENDPOINT)
        .reconnect_interval(Duration::from_millis(100))
}

/// Waits for the next notification on `topic`, skipping the others.
pub async fn next_on(rx: &mut broadcast::Receiver<Notification>, topic: &str) -> Notification {
    loop {
        let notification = tokio::time::timeout(Duration::from_secs(30), rx.recv())
            .await
            .expect("no notification within 30s")
            .expect("notification bus closed");
        if notification.topic == topic {
            return notification;
        }
    }
}

pub async fn reconnect_started(rx: &mut broadcast::Receiver<Notification>) -> Notification {
    next_on(rx, DEFAULT_START_TOPIC).await
}

pub async fn reconnect_succeeded(rx: &mut broadcast::Receiver<Notification>) -> Notification {
    next_on(rx, DEFAULT_SUCCEEDED_TOPIC).await
}

pub async fn reconnect_failed(rx: &mut broadcast::Receiver<Notification>) -> Notification {
    next_on(rx, DEFAULT_FAILED_TOPIC).await
}

/// Drains whatever is buffered and returns the topics, in order.
pub fn drain_topics(rx: &mut broadcast::Receiver<Notification>) -> Vec<String> {
    let mut topics = Vec::new();
    while let Ok(notification) = rx.try_recv() {
        topics.push(notification.topic);
    }
    topics
}

/// Polls `condition` every 10ms until it holds.
pub async fn eventually<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    for _ in 0..1_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within 10s");
}

/// Collects the messages handed to a subscription callback.
#[derive(Clone, Default)]
pub struct Inbox {
    messages: Arc<Mutex<Vec<SubscriptionMessage>>>,
}

impl Inbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn callback(&self) -> impl Fn(SubscriptionMessage) + Send + Sync + 'static {
        let messages = Arc::clone(&self.messages);
        move |message| messages.lock().unwrap().push(message)
    }

    pub fn messages(&self) -> Vec<SubscriptionMessage> {
        self.messages.lock().unwrap().clone()
    }

    pub fn payloads(&self) -> Vec<String> {
        self.messages().into_iter().map(|m| m.message).collect()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().unwrap().len()
    }
}

/// Current-thread runtime on a paused clock, for proptest bodies.
pub fn paused_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .unwrap()
}
