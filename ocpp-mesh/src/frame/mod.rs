//! OCPP message envelope and framing
//!
//! Five frame kinds travel between networking nodes:
//!
//! | Kind          | Id | JSON array (networked)                                       |
//! |---------------|----|--------------------------------------------------------------|
//! | Request       | 2  | `[2, destination, path, requestId, action, payload]`         |
//! | Response      | 3  | `[3, destination, path, requestId, payload]`                 |
//! | RequestError  | 4  | `[4, destination, path, requestId, code, description, details]` |
//! | ResponseError | 5  | `[5, destination, path, requestId, code, description, details]` |
//! | Send          | 6  | `[6, destination, path, action, payload]`                    |
//!
//! Plain OCPP 2.0.1 arrays without `destination` and `path` are accepted from
//! direct peers. Binary frames carry the same fields, bincode-encoded.
//!
//! Parsing never fails outward with a panic or an opaque error: a frame that
//! cannot be decoded becomes a [`CouldNotParse`] value that keeps the raw
//! message, a diagnostic and whatever could be salvaged from it.

pub mod binary;
pub mod error;
pub mod json;

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::network::{NetworkPath, NetworkingNodeId, SourceRouting};

pub use error::{ErrorCode, FrameError};

/// OCPP message type identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    Request = 2,
    Response = 3,
    RequestError = 4,
    ResponseError = 5,
    Send = 6,
}

impl MessageType {
    pub fn from_id(id: i64) -> Option<Self> {
        match id {
            2 => Some(MessageType::Request),
            3 => Some(MessageType::Response),
            4 => Some(MessageType::RequestError),
            5 => Some(MessageType::ResponseError),
            6 => Some(MessageType::Send),
            _ => None,
        }
    }

    pub fn id(self) -> u8 {
        self as u8
    }
}

/// Correlation token of one request
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// A fresh random request id
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RequestId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Message payload: JSON for text frames, raw bytes for binary frames
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(Value),
    Binary(Vec<u8>),
}

impl Payload {
    pub fn is_binary(&self) -> bool {
        matches!(self, Payload::Binary(_))
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Payload::Json(value) => Some(value),
            Payload::Binary(_) => None,
        }
    }

    pub fn as_binary(&self) -> Option<&[u8]> {
        match self {
            Payload::Json(_) => None,
            Payload::Binary(bytes) => Some(bytes),
        }
    }
}

/// Raw message as it crosses a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    Text(String),
    Binary(Vec<u8>),
}

impl WireMessage {
    pub fn len(&self) -> usize {
        match self {
            WireMessage::Text(text) => text.len(),
            WireMessage::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Request frame (CALL)
#[derive(Debug, Clone, PartialEq)]
pub struct RequestFrame {
    pub destination: SourceRouting,
    pub network_path: NetworkPath,
    pub request_id: RequestId,
    pub action: String,
    pub payload: Payload,
}

/// Response frame (CALLRESULT)
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseFrame {
    pub destination: SourceRouting,
    pub network_path: NetworkPath,
    pub request_id: RequestId,
    pub payload: Payload,
}

/// Error frame, used for both RequestError (CALLERROR) and
/// ResponseError (CALLRESULTERROR)
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorFrame {
    pub destination: SourceRouting,
    pub network_path: NetworkPath,
    pub request_id: RequestId,
    pub error_code: ErrorCode,
    pub error_description: String,
    pub error_details: Value,
}

impl ErrorFrame {
    /// Error answer to `request`, routed back along the request's path
    pub fn for_request(
        request: &RequestFrame,
        local: &NetworkingNodeId,
        error_code: ErrorCode,
        error_description: impl Into<String>,
    ) -> Self {
        Self {
            destination: SourceRouting::return_to(&request.network_path),
            network_path: NetworkPath::from_node(local.clone()),
            request_id: request.request_id.clone(),
            error_code,
            error_description: error_description.into(),
            error_details: Value::Object(serde_json::Map::new()),
        }
    }
}

/// Fire-and-forget frame (SEND)
#[derive(Debug, Clone, PartialEq)]
pub struct SendFrame {
    pub destination: SourceRouting,
    pub network_path: NetworkPath,
    pub action: String,
    pub payload: Payload,
}

/// Any parsed frame
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Request(RequestFrame),
    Response(ResponseFrame),
    RequestError(ErrorFrame),
    ResponseError(ErrorFrame),
    Send(SendFrame),
}

/// A message that could not be decoded into a [`Frame`]
#[derive(Debug, Clone, PartialEq)]
pub struct CouldNotParse {
    pub raw: WireMessage,
    pub error: String,
    pub message_type: Option<MessageType>,
    pub request_id: Option<RequestId>,
}

impl fmt::Display for CouldNotParse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "could not parse {} byte message: {}", self.raw.len(), self.error)
    }
}

impl Frame {
    /// Decode a wire message; failures are returned as [`CouldNotParse`]
    pub fn parse(message: &WireMessage) -> Result<Frame, CouldNotParse> {
        match message {
            WireMessage::Text(text) => json::decode(text),
            WireMessage::Binary(bytes) => binary::decode(bytes),
        }
    }

    /// Encode for the wire: frames with a binary payload become binary
    /// messages, everything else JSON text
    pub fn encode(&self) -> Result<WireMessage, FrameError> {
        let binary_payload = match self {
            Frame::Request(f) => f.payload.is_binary(),
            Frame::Response(f) => f.payload.is_binary(),
            Frame::Send(f) => f.payload.is_binary(),
            Frame::RequestError(_) | Frame::ResponseError(_) => false,
        };

        if binary_payload {
            Ok(WireMessage::Binary(binary::encode(self)?))
        } else {
            Ok(WireMessage::Text(json::encode(self)?))
        }
    }

    pub fn to_json_text(&self) -> Result<String, FrameError> {
        json::encode(self)
    }

    pub fn to_binary(&self) -> Result<Vec<u8>, FrameError> {
        binary::encode(self)
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Frame::Request(_) => MessageType::Request,
            Frame::Response(_) => MessageType::Response,
            Frame::RequestError(_) => MessageType::RequestError,
            Frame::ResponseError(_) => MessageType::ResponseError,
            Frame::Send(_) => MessageType::Send,
        }
    }

    /// Request id; `None` for Send frames
    pub fn request_id(&self) -> Option<&RequestId> {
        match self {
            Frame::Request(f) => Some(&f.request_id),
            Frame::Response(f) => Some(&f.request_id),
            Frame::RequestError(f) | Frame::ResponseError(f) => Some(&f.request_id),
            Frame::Send(_) => None,
        }
    }

    pub fn action(&self) -> Option<&str> {
        match self {
            Frame::Request(f) => Some(&f.action),
            Frame::Send(f) => Some(&f.action),
            _ => None,
        }
    }

    pub fn destination(&self) -> &SourceRouting {
        match self {
            Frame::Request(f) => &f.destination,
            Frame::Response(f) => &f.destination,
            Frame::RequestError(f) | Frame::ResponseError(f) => &f.destination,
            Frame::Send(f) => &f.destination,
        }
    }

    pub fn network_path(&self) -> &NetworkPath {
        match self {
            Frame::Request(f) => &f.network_path,
            Frame::Response(f) => &f.network_path,
            Frame::RequestError(f) | Frame::ResponseError(f) => &f.network_path,
            Frame::Send(f) => &f.network_path,
        }
    }

    fn network_path_mut(&mut self) -> &mut NetworkPath {
        match self {
            Frame::Request(f) => &mut f.network_path,
            Frame::Response(f) => &mut f.network_path,
            Frame::RequestError(f) | Frame::ResponseError(f) => &mut f.network_path,
            Frame::Send(f) => &mut f.network_path,
        }
    }

    fn destination_mut(&mut self) -> &mut SourceRouting {
        match self {
            Frame::Request(f) => &mut f.destination,
            Frame::Response(f) => &mut f.destination,
            Frame::RequestError(f) | Frame::ResponseError(f) => &mut f.destination,
            Frame::Send(f) => &mut f.destination,
        }
    }

    /// The same frame with `hop` recorded on its path
    pub fn forwarded_by(mut self, hop: &NetworkingNodeId) -> Frame {
        let path = self.network_path().append(hop.clone());
        *self.network_path_mut() = path;
        self
    }

    /// Fill in addressing for frames from plain OCPP peers: an empty path
    /// starts at the connected peer, a zero destination means this node
    pub fn assume_direct_peer(mut self, peer: &NetworkingNodeId, local: &NetworkingNodeId) -> Frame {
        if self.network_path().is_empty() && !peer.is_zero() {
            *self.network_path_mut() = NetworkPath::from_node(peer.clone());
        }
        if self.destination().is_zero() {
            *self.destination_mut() = SourceRouting::to(local.clone());
        }
        self
    }
}
