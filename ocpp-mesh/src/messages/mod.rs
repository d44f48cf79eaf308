//! Typed OCPP messages
//!
//! A message is a header (request id, addressing, signatures) plus a typed
//! body. Body types implement [`RequestBody`], [`ResponseBody`] or
//! [`SendBody`]; the envelopes [`OcppRequest`], [`OcppResponse`] and
//! [`OcppSend`] convert them to and from frames through the body's
//! [`BodyCodec`].
//!
//! Bundled message types:
//! - ChangeConfiguration (JSON)
//! - Heartbeat (JSON)
//! - DataTransfer (JSON)
//! - BinaryDataTransfer (binary)
//! - NotifyPeriodicEventStream (Send)

pub mod binary_data_transfer;
pub mod change_configuration;
pub mod codec;
pub mod data_transfer;
pub mod envelope;
pub mod heartbeat;
pub mod notify_periodic_event_stream;
pub mod result;

use std::fmt::Debug;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

pub use codec::{BinaryCodec, BodyCodec, Decoded, JsonCodec};
pub use envelope::{OcppRequest, OcppResponse, OcppSend, RequestHeader, ResponseHeader, SendHeader};
pub use result::{OcppResult, ResultCode};

/// Body of a request message
pub trait RequestBody: Debug + Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// OCPP action name
    const ACTION: &'static str;

    type Response: ResponseBody;

    type Codec: BodyCodec;

    /// Constraints the type system cannot express (string lengths and the like)
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Body of a response message
pub trait ResponseBody: Debug + Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Body to report for a synthetic result such as a timeout or a filtered
    /// request
    fn from_result(result: &OcppResult) -> Self;
}

/// Body of a fire-and-forget message
pub trait SendBody: Debug + Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    const ACTION: &'static str;

    type Codec: BodyCodec;

    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Errors converting between message values and frames
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("binary codec error: {0}")]
    Binary(#[from] bincode::Error),

    #[error("expected action {expected}, got {actual}")]
    ActionMismatch {
        expected: &'static str,
        actual: String,
    },

    #[error("expected a {expected} payload")]
    PayloadKind { expected: &'static str },

    #[error("payload must be a JSON object")]
    NotAnObject,

    #[error("validation failed: {0}")]
    Validation(String),
}
