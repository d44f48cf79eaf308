//! Message adapters
//!
//! - `incoming` (IN): answers requests addressed to this node
//! - `outgoing` (OUT): originates requests and waits for their answers
//! - `forward` (FORWARD): decides what happens to requests passing through

pub mod forward;
pub mod incoming;
pub mod outgoing;

use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use thiserror::Error;

use crate::events::panic_message;

pub use forward::{
    FilterResult, ForwardingAdapter, ForwardingAdapterBuilder, ForwardingDecision,
    ForwardingVerdict,
};
pub use incoming::{Answer, IncomingAdapter, IncomingAdapterBuilder};
pub use outgoing::OutgoingAdapter;

/// Errors while building an adapter's dispatch table
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    #[error("a handler for {action} is already registered")]
    DuplicateHandler { action: &'static str },

    #[error("action {action} is already registered with a different message type")]
    ActionConflict { action: &'static str },
}

/// Run user code; a panic in the call or in the returned future becomes
/// `Err` with the panic message
pub(crate) async fn call_isolated<F, Fut>(call: F) -> Result<Fut::Output, String>
where
    F: FnOnce() -> Fut,
    Fut: Future,
{
    let future = std::panic::catch_unwind(AssertUnwindSafe(call))
        .map_err(|panic| panic_message(panic.as_ref()))?;
    AssertUnwindSafe(future)
        .catch_unwind()
        .await
        .map_err(|panic| panic_message(panic.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_call_isolated() {
        assert_eq!(call_isolated(|| async { 5 }).await, Ok(5));

        let panicked: Result<(), String> = call_isolated(|| async {
            if true {
                panic!("handler exploded");
            }
        })
        .await;
        assert_eq!(panicked, Err("handler exploded".to_string()));
    }
}
