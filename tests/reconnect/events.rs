use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use redis_heimdall::{
    HeimdallContext, HeimdallError, Reason, ReconnectEvent, ReconnectPolicy, Supervisor,
};
use redis_heimdall_core::memory::MemoryServer;
use redis_heimdall_core::{FnListener, TransportError};

use crate::support::{fast_options, reconnect_failed, reconnect_succeeded};

fn refused() -> TransportError {
    TransportError::io(io::ErrorKind::ConnectionRefused, "Connection refused")
}

#[derive(Debug, PartialEq)]
enum Seen {
    Failed(u32, Duration),
    Restored(u32),
    GaveUp(Reason, u32),
}

type Recorded = Arc<Mutex<Vec<Seen>>>;

fn recorder() -> (
    Recorded,
    FnListener<ReconnectEvent, impl Fn(&ReconnectEvent) + Send + Sync>,
) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let listener = FnListener::new(move |event: &ReconnectEvent| {
        let entry = match event {
            ReconnectEvent::AttemptFailed { attempt, delay, .. } => Seen::Failed(*attempt, *delay),
            ReconnectEvent::Restored { attempts, .. } => Seen::Restored(*attempts),
            ReconnectEvent::GaveUp {
                reason, attempts, ..
            } => Seen::GaveUp(*reason, *attempts),
        };
        sink.lock().unwrap().push(entry);
    });
    (seen, listener)
}

#[tokio::test(start_paused = true)]
async fn attempts_are_reported_until_restored() {
    let server = MemoryServer::new();
    server.fail_next_connect(refused());
    server.fail_next_connect(refused());
    let context = HeimdallContext::new();
    let mut rx = context.subscribe_notifications();
    let (seen, listener) = recorder();
    let options = fast_options("events").on_reconnect_event(listener).build();
    let supervisor = Supervisor::new(&context, Arc::new(server.clone()), options);

    supervisor.handle_connection_failure(HeimdallError::with_reason(
        Reason::ConnectionIssue,
        "Connection did end",
    ));
    reconnect_succeeded(&mut rx).await;

    let step = Duration::from_millis(100);
    assert_eq!(
        *seen.lock().unwrap(),
        vec![Seen::Failed(1, step), Seen::Failed(2, step), Seen::Restored(3)]
    );
    assert_eq!(supervisor.reconnect_state().attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn exponential_policy_grows_the_delay_and_gives_up() {
    let server = MemoryServer::new();
    server.set_reachable(false);
    let context = HeimdallContext::new();
    let mut rx = context.subscribe_notifications();
    let (seen, listener) = recorder();
    let options = fast_options("backoff")
        .reconnect_policy(ReconnectPolicy::exponential(
            Duration::from_millis(100),
            Duration::from_millis(250),
        ))
        .max_reconnect_attempts(4)
        .on_reconnect_event(listener)
        .build();
    let supervisor = Supervisor::new(&context, Arc::new(server.clone()), options);

    supervisor.handle_connection_failure(HeimdallError::with_reason(
        Reason::ConnectionIssue,
        "Connection did end",
    ));
    reconnect_failed(&mut rx).await;

    let seen = seen.lock().unwrap();
    let delays: Vec<Duration> = seen
        .iter()
        .filter_map(|s| match s {
            Seen::Failed(_, delay) => Some(*delay),
            _ => None,
        })
        .collect();
    assert_eq!(delays.len(), 4);
    assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    assert!(delays.iter().all(|d| *d <= Duration::from_millis(250)));
    assert_eq!(
        seen.last(),
        Some(&Seen::GaveUp(Reason::MaxAttemptsReached, 4))
    );
}
