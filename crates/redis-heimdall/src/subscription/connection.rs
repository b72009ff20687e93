use std::sync::Arc;

use futures::future::BoxFuture;
use redis_heimdall_core::{
    Error, HeimdallError, MessageHandler, Reason, Request, Response, TransportConnection,
};
use tracing::warn;

use super::{MessageCallback, SubscriptionMessage, SubscriptionRegistry};
use crate::guard::{fail, FailureHandler, HeimdallConnection};

/// Guard of a connection in subscription mode.
///
/// Only the subscribe family of commands may be sent. Pushed acknowledgements
/// update the registry, pushed messages go to the client callback.
#[derive(Clone, Debug)]
pub struct SubscriptionConnection {
    guard: HeimdallConnection,
}

impl SubscriptionConnection {
    pub(crate) fn new(
        delegate: Arc<dyn TransportConnection>,
        on_failure: FailureHandler,
        registry: SubscriptionRegistry,
        on_message: MessageCallback,
    ) -> Self {
        let guard = HeimdallConnection::new(Arc::clone(&delegate), on_failure);
        delegate.message_handler(Box::new(move |push| {
            dispatch(&registry, &on_message, push);
        }));
        Self { guard }
    }

    pub fn send(&self, request: Request) -> BoxFuture<'static, Result<Response, Error>> {
        if !request.command().is_pub_sub() {
            return fail(unsupported(format!(
                "Command {} not supported in subscription mode",
                request.command()
            )));
        }
        self.guard.send(request)
    }

    pub fn batch(&self, requests: Vec<Request>) -> BoxFuture<'static, Result<Vec<Response>, Error>> {
        if requests.iter().any(|r| !r.command().is_pub_sub()) {
            let names: Vec<&str> = requests.iter().map(|r| r.command().name()).collect();
            return fail(unsupported(format!(
                "At least one Command [{}] not supported in subscription mode",
                names.join(", ")
            )));
        }
        self.guard.batch(requests)
    }

    pub fn close(&self) -> BoxFuture<'static, ()> {
        self.guard.close()
    }

    pub fn message_handler(&self, _handler: MessageHandler) -> Result<(), Error> {
        Err(unsupported("Message handler is not supported on a subscription connection").into())
    }

    pub(crate) fn guard(&self) -> &HeimdallConnection {
        &self.guard
    }
}

fn unsupported(message: impl Into<String>) -> HeimdallError {
    HeimdallError::with_reason(Reason::UnsupportedAction, message)
}

fn dispatch(registry: &SubscriptionRegistry, on_message: &MessageCallback, push: Response) {
    let Some(items) = push.as_array() else {
        warn!(push = %push, "unexpected push on subscription connection");
        return;
    };
    let field = |i: usize| items.get(i).and_then(Response::as_string);

    match (field(0).as_deref(), field(1), field(2), field(3)) {
        (Some("subscribe"), Some(channel), ..) => registry.add_channel(&channel),
        (Some("unsubscribe"), Some(channel), ..) => registry.remove_channel(&channel),
        (Some("psubscribe"), Some(pattern), ..) => registry.add_pattern(&pattern),
        (Some("punsubscribe"), Some(pattern), ..) => registry.remove_pattern(&pattern),
        (Some("message"), Some(channel), Some(message), _) => {
            on_message(SubscriptionMessage::new(channel, message));
        }
        (Some("pmessage"), Some(pattern), Some(channel), Some(message)) => {
            on_message(SubscriptionMessage::new(channel, message).with_pattern(pattern));
        }
        _ => warn!(push = %push, "unexpected push on subscription connection"),
    }
}
