use std::sync::Arc;
use std::time::Duration;

use redis_heimdall::{
    create_subscription_client, Client, ConnectionState, HeimdallContext, Reason,
    SubscriptionOptions,
};
use redis_heimdall_core::memory::MemoryServer;
use redis_heimdall_core::{Command, Request};

use crate::support::{eventually, fast_options, reconnect_succeeded, Inbox};

#[tokio::test(start_paused = true)]
async fn reconnect_replays_exactly_the_recorded_subscriptions() {
    let server = MemoryServer::new();
    let context = HeimdallContext::new();
    let mut rx = context.subscribe_notifications();
    let inbox = Inbox::new();
    let options = SubscriptionOptions::new(fast_options("replay").build())
        .channel_names(["a", "b"])
        .channel_pattern("x*");
    let client =
        create_subscription_client(&context, Arc::new(server.clone()), options, inbox.callback())
            .await
            .unwrap();

    client.add_channels(["c"]).await.unwrap();
    client.remove_channels(["b"]).await.unwrap();
    assert_eq!(client.registry().channels(), vec!["a", "c"]);

    server.clear_command_log();
    server.drop_connections();
    reconnect_succeeded(&mut rx).await;

    assert_eq!(server.subscribed_channels(), vec!["a", "c"]);
    assert_eq!(server.subscribed_patterns(), vec!["x*"]);
    assert_eq!(server.count_commands("SUBSCRIBE"), 1);
    assert_eq!(server.count_commands("PSUBSCRIBE"), 1);
    assert!(server.command_log().contains(&"SUBSCRIBE a c".to_string()));
    assert_eq!(client.registry().channels(), vec!["a", "c"]);
}

#[tokio::test(start_paused = true)]
async fn changes_are_rejected_while_reconnecting() {
    let server = MemoryServer::new();
    let context = HeimdallContext::new();
    let base = fast_options("busy")
        .reconnect_interval(Duration::from_secs(5))
        .build();
    let client = create_subscription_client(
        &context,
        Arc::new(server.clone()),
        SubscriptionOptions::new(base).channel_name("a"),
        |_| {},
    )
    .await
    .unwrap();

    server.set_reachable(false);
    assert_eq!(client.state(), ConnectionState::Reconnecting);

    let err = client.add_channels(["b"]).await.unwrap_err();
    assert!(err.is_reason(Reason::AccessDuringReconnect));
    let err = client.remove_channel_patterns(["x*"]).await.unwrap_err();
    assert!(err.is_reason(Reason::AccessDuringReconnect));
    assert_eq!(client.registry().channels(), vec!["a"]);
}

#[tokio::test]
async fn empty_changes_send_nothing() {
    let server = MemoryServer::new();
    let client = create_subscription_client(
        &HeimdallContext::new(),
        Arc::new(server.clone()),
        SubscriptionOptions::new(fast_options("idle").build()),
        |_| {},
    )
    .await
    .unwrap();

    client.add_channels(Vec::<String>::new()).await.unwrap();
    client.remove_channel_patterns(Vec::<String>::new()).await.unwrap();

    assert!(server.command_log().is_empty());
    assert_eq!(server.connect_attempts(), 0);
}

#[tokio::test]
async fn regular_commands_are_refused() {
    let server = MemoryServer::new();
    let client = create_subscription_client(
        &HeimdallContext::new(),
        Arc::new(server.clone()),
        SubscriptionOptions::new(fast_options("strict").build()).channel_name("a"),
        |_| {},
    )
    .await
    .unwrap();

    let err = client
        .send(Request::cmd(Command::GET).arg("k"))
        .await
        .unwrap_err();
    assert!(err.is_reason(Reason::UnsupportedAction));
    assert_eq!(
        err.as_heimdall().and_then(|e| e.message()),
        Some("Command GET not supported in subscription mode")
    );

    let err = client
        .batch(vec![
            Request::cmd(Command::SUBSCRIBE).arg("b"),
            Request::cmd(Command::SET).args(["k", "v"]),
        ])
        .await
        .unwrap_err();
    assert!(err.is_reason(Reason::UnsupportedAction));
    assert_eq!(server.count_commands("SET"), 0);
}

#[tokio::test]
async fn clients_sharing_a_context_keep_separate_registries() {
    let server = MemoryServer::new();
    let context = HeimdallContext::new();
    let first_inbox = Inbox::new();
    let second_inbox = Inbox::new();

    let first = create_subscription_client(
        &context,
        Arc::new(server.clone()),
        SubscriptionOptions::new(fast_options("first").build()).channel_name("one"),
        first_inbox.callback(),
    )
    .await
    .unwrap();
    let second = create_subscription_client(
        &context,
        Arc::new(server.clone()),
        SubscriptionOptions::new(fast_options("second").build()).channel_name("two"),
        second_inbox.callback(),
    )
    .await
    .unwrap();

    assert_ne!(first.id(), second.id());
    assert_eq!(first.registry().channels(), vec!["one"]);
    assert_eq!(second.registry().channels(), vec!["two"]);
    assert_eq!(context.subscription_store().len(), 2);

    server.publish("one", "for first");
    server.publish("two", "for second");
    eventually(|| first_inbox.len() == 1 && second_inbox.len() == 1).await;
    assert_eq!(first_inbox.payloads(), vec!["for first"]);
    assert_eq!(second_inbox.payloads(), vec!["for second"]);

    first.close().await;
    assert_eq!(context.subscription_store().len(), 1);
    assert!(context.subscription_store().lookup(&first.id()).is_none());
    assert!(context.subscription_store().lookup(&second.id()).is_some());

    let err = first.add_channels(["three"]).await.unwrap_err();
    assert!(err.is_reason(Reason::ConnectionIssue));
}

#[tokio::test]
async fn pattern_messages_carry_the_pattern() {
    let server = MemoryServer::new();
    let inbox = Inbox::new();
    let _client = create_subscription_client(
        &HeimdallContext::new(),
        Arc::new(server.clone()),
        SubscriptionOptions::new(fast_options("patterns").build()).channel_pattern("news.*"),
        inbox.callback(),
    )
    .await
    .unwrap();

    assert_eq!(server.publish("news.sport", "goal"), 1);

    let messages = inbox.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].channel, "news.sport");
    assert_eq!(messages[0].pattern.as_deref(), Some("news.*"));
    assert_eq!(messages[0].message, "goal");
}
