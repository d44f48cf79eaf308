//! Framing errors and OCPP RPC error codes

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// OCPP RPC error codes carried by RequestError/ResponseError frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    FormatViolation,
    GenericError,
    InternalError,
    MessageTypeNotSupported,
    NotImplemented,
    NotSupported,
    OccurrenceConstraintViolation,
    PropertyConstraintViolation,
    ProtocolError,
    RpcFrameworkError,
    SecurityError,
    TypeConstraintViolation,
}

impl ErrorCode {
    /// Parse a wire error code; unknown codes become `GenericError`
    pub fn parse_lossy(text: &str) -> Self {
        serde_json::from_value(serde_json::Value::String(text.to_string()))
            .unwrap_or(ErrorCode::GenericError)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Errors in frame encoding and decoding
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("binary codec error: {0}")]
    Binary(#[from] bincode::Error),

    #[error("invalid frame format: {0}")]
    InvalidFormat(String),

    #[error("unknown message type: {0}")]
    UnknownMessageType(i64),

    #[error("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("a binary payload cannot be carried in a JSON text frame")]
    BinaryPayloadInTextFrame,
}

impl FrameError {
    pub(crate) fn field(field: &'static str, reason: impl fmt::Display) -> Self {
        FrameError::InvalidField {
            field,
            reason: reason.to_string(),
        }
    }
}
