//! Exchange results embedded in every response

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::frame::{ErrorCode, ErrorFrame};

/// Outcome class of one exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResultCode {
    Ok,
    Filtered,
    SignatureError,
    FormatViolation,
    CouldNotParse,
    NetworkError,
    Timeout,
    Canceled,
    NotImplemented,
    ExceptionOccurred,
    Rejected,
    GenericError,
    ProtocolError,
    SecurityError,
    InternalError,
}

impl ResultCode {
    /// Business outcomes travel as a regular Response frame; everything
    /// else is answered with a RequestError
    pub fn is_business(self) -> bool {
        matches!(
            self,
            ResultCode::Ok | ResultCode::Rejected | ResultCode::Filtered
        )
    }

    /// Error code used when this result goes out as a RequestError
    pub fn wire_error_code(self) -> ErrorCode {
        match self {
            ResultCode::SignatureError | ResultCode::SecurityError => ErrorCode::SecurityError,
            ResultCode::FormatViolation | ResultCode::CouldNotParse => ErrorCode::FormatViolation,
            ResultCode::NotImplemented => ErrorCode::NotImplemented,
            ResultCode::ExceptionOccurred | ResultCode::InternalError => ErrorCode::InternalError,
            _ => ErrorCode::GenericError,
        }
    }

    /// Result reported to a requester that received `code`
    pub fn from_error_code(code: ErrorCode) -> Self {
        match code {
            ErrorCode::SecurityError => ResultCode::SignatureError,
            ErrorCode::FormatViolation => ResultCode::FormatViolation,
            ErrorCode::NotImplemented => ResultCode::NotImplemented,
            _ => ResultCode::ProtocolError,
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Result of an exchange: code plus optional description and details
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcppResult {
    pub code: ResultCode,
    pub description: Option<String>,
    pub details: Option<Value>,
}

impl OcppResult {
    pub fn ok() -> Self {
        Self::new(ResultCode::Ok)
    }

    pub fn new(code: ResultCode) -> Self {
        Self {
            code,
            description: None,
            details: None,
        }
    }

    pub fn with_description(code: ResultCode, description: impl Into<String>) -> Self {
        Self {
            code,
            description: Some(description.into()),
            details: None,
        }
    }

    pub fn details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Result derived from a remote RequestError/ResponseError
    pub fn from_error_frame(frame: &ErrorFrame) -> Self {
        Self {
            code: ResultCode::from_error_code(frame.error_code),
            description: Some(frame.error_description.clone()),
            details: Some(frame.error_details.clone()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == ResultCode::Ok
    }
}

impl Default for OcppResult {
    fn default() -> Self {
        Self::ok()
    }
}

impl fmt::Display for OcppResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.description {
            Some(description) => write!(f, "{}: {}", self.code, description),
            None => write!(f, "{}", self.code),
        }
    }
}
