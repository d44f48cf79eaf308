//! Adapter events
//!
//! Each adapter owns an [`EventHub`]. Subscribers are async callbacks; one
//! failing or panicking subscriber is logged and never stops the others or
//! the exchange that published the event.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::RwLock;
use tracing::warn;

use crate::adapters::forward::ForwardingVerdict;
use crate::frame::{ErrorCode, RequestId};
use crate::messages::OcppResult;
use crate::network::{NetworkPath, SourceRouting};
use crate::transport::SentMessageResult;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

type Subscriber<E> = Arc<dyn Fn(E) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

/// Handle returned by [`EventHub::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Publish/subscribe registry for one event type
pub struct EventHub<E> {
    name: &'static str,
    next_id: AtomicU64,
    subscribers: RwLock<Vec<(SubscriptionId, Subscriber<E>)>>,
}

impl<E: Clone + Send + Sync + 'static> EventHub<E> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            next_id: AtomicU64::new(1),
            subscribers: RwLock::new(Vec::new()),
        }
    }

    pub fn subscribe<F, Fut>(&self, subscriber: F) -> SubscriptionId
    where
        F: Fn(E) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let subscriber: Subscriber<E> = Arc::new(move |event| subscriber(event).boxed());
        self.subscribers.write().push((id, subscriber));
        id
    }

    /// Returns whether the subscription existed
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|(sub, _)| *sub != id);
        subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Deliver `event` to every subscriber in registration order
    pub async fn publish(&self, event: &E) {
        // snapshot so subscribers may (un)subscribe while running
        let subscribers: Vec<_> = self
            .subscribers
            .read()
            .iter()
            .map(|(id, sub)| (*id, sub.clone()))
            .collect();

        for (id, subscriber) in subscribers {
            let call = std::panic::catch_unwind(AssertUnwindSafe(|| subscriber(event.clone())));
            let outcome = match call {
                Ok(future) => AssertUnwindSafe(future).catch_unwind().await,
                Err(panic) => Err(panic),
            };

            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("{} subscriber {:?} failed: {}", self.name, id, e),
                Err(panic) => warn!(
                    "{} subscriber {:?} panicked: {}",
                    self.name,
                    id,
                    panic_message(panic.as_ref())
                ),
            }
        }
    }
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        text.to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ============================================================================
// Adapter events
// ============================================================================

#[derive(Debug, Clone)]
pub enum IncomingEvent {
    RequestReceived {
        action: String,
        request_id: RequestId,
        network_path: NetworkPath,
    },
    /// Published for every dispatched request, whatever the transport outcome;
    /// follows `RequestErrorSent` when no handler was reached
    ResponseSent {
        action: String,
        request_id: RequestId,
        result: OcppResult,
        sent: SentMessageResult,
    },
    /// A request was answered with an error before reaching a handler
    RequestErrorSent {
        request_id: RequestId,
        error_code: ErrorCode,
        description: String,
        sent: SentMessageResult,
    },
    SendReceived {
        action: String,
        network_path: NetworkPath,
    },
}

#[derive(Debug, Clone)]
pub enum OutgoingEvent {
    RequestSent {
        action: String,
        request_id: RequestId,
        destination: SourceRouting,
    },
    ResponseReceived {
        action: String,
        request_id: RequestId,
        result: OcppResult,
        runtime: Duration,
    },
    SendSent {
        action: String,
        destination: SourceRouting,
        sent: SentMessageResult,
    },
}

#[derive(Debug, Clone)]
pub enum ForwardingEvent {
    Filtered {
        action: String,
        request_id: Option<RequestId>,
        verdict: ForwardingVerdict,
        reason: String,
    },
}
