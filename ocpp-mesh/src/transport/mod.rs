//! Transport seam
//!
//! A [`Transport`] takes a frame, encodes it and hands it to the connection
//! leading to the frame's next hop. Sockets and TLS live behind this trait;
//! the crate ships only the in-memory [`mesh`] transport.

pub mod mesh;

use std::fmt;

use async_trait::async_trait;

use crate::frame::{Frame, WireMessage};
use crate::network::NetworkingNodeId;

pub use mesh::{MeshNetwork, MeshTransport};

/// Result of one transport attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Success,
    /// No connection leads towards the destination
    NoRoute,
    TransportError(String),
    /// The frame could not be encoded
    NotSent(String),
}

impl fmt::Display for SendOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendOutcome::Success => f.write_str("sent"),
            SendOutcome::NoRoute => f.write_str("no route"),
            SendOutcome::TransportError(e) => write!(f, "transport error: {}", e),
            SendOutcome::NotSent(e) => write!(f, "not sent: {}", e),
        }
    }
}

/// Outcome of handing a frame to the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessageResult {
    /// Next hop the frame was handed to
    pub connection: Option<NetworkingNodeId>,
    pub outcome: SendOutcome,
}

impl SentMessageResult {
    pub fn success(connection: NetworkingNodeId) -> Self {
        Self {
            connection: Some(connection),
            outcome: SendOutcome::Success,
        }
    }

    pub fn no_route() -> Self {
        Self {
            connection: None,
            outcome: SendOutcome::NoRoute,
        }
    }

    pub fn failed(connection: Option<NetworkingNodeId>, outcome: SendOutcome) -> Self {
        Self {
            connection,
            outcome,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == SendOutcome::Success
    }
}

impl fmt::Display for SentMessageResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.connection {
            Some(hop) => write!(f, "{} via {}", self.outcome, hop),
            None => write!(f, "{}", self.outcome),
        }
    }
}

/// Wire message received from a connected peer
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// The directly connected peer that delivered the message
    pub from: NetworkingNodeId,
    pub message: WireMessage,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, frame: &Frame) -> SentMessageResult;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;

    /// Records every frame and answers with a fixed outcome
    pub(crate) struct RecordingTransport {
        pub(crate) sent: Mutex<Vec<Frame>>,
        outcome: SendOutcome,
    }

    impl RecordingTransport {
        pub(crate) fn new() -> Self {
            Self::with_outcome(SendOutcome::Success)
        }

        pub(crate) fn with_outcome(outcome: SendOutcome) -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                outcome,
            }
        }

        pub(crate) fn frames(&self) -> Vec<Frame> {
            self.sent.lock().clone()
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send(&self, frame: &Frame) -> SentMessageResult {
            self.sent.lock().push(frame.clone());
            SentMessageResult::failed(
                Some(frame.destination().destination().clone()),
                self.outcome.clone(),
            )
        }
    }
}
