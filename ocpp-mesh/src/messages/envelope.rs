//! Request, response and send envelopes

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::{BodyCodec, Decoded, MessageError, OcppResult, RequestBody, ResponseBody, ResultCode, SendBody};
use crate::frame::{ErrorFrame, Frame, RequestFrame, RequestId, ResponseFrame, SendFrame};
use crate::network::{NetworkPath, NetworkingNodeId, SourceRouting};
use crate::signature::{SignableMessage, Signature};

// ============================================================================
// Requests
// ============================================================================

#[derive(Debug, Clone)]
pub struct RequestHeader {
    pub request_id: RequestId,
    pub destination: SourceRouting,
    pub network_path: NetworkPath,
    pub signatures: Vec<Signature>,
    /// Overrides the node's default timeout for this request
    pub request_timeout: Option<Duration>,
    pub request_timestamp: DateTime<Utc>,
    /// Signed bytes of a received body
    signed_bytes: Option<Vec<u8>>,
}

impl RequestHeader {
    /// Header of a request frame whose body has not been (or cannot be)
    /// parsed; enough to address and correlate an answer
    pub fn from_frame(frame: &RequestFrame) -> Self {
        Self {
            request_id: frame.request_id.clone(),
            destination: frame.destination.clone(),
            network_path: frame.network_path.clone(),
            signatures: Vec::new(),
            request_timeout: None,
            request_timestamp: Utc::now(),
            signed_bytes: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OcppRequest<B: RequestBody> {
    pub header: RequestHeader,
    pub body: B,
}

impl<B: RequestBody> OcppRequest<B> {
    /// New request with a fresh request id
    pub fn new(destination: SourceRouting, body: B) -> Self {
        Self {
            header: RequestHeader {
                request_id: RequestId::new(),
                destination,
                network_path: NetworkPath::empty(),
                signatures: Vec::new(),
                request_timeout: None,
                request_timestamp: Utc::now(),
                signed_bytes: None,
            },
            body,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<RequestId>) -> Self {
        self.header.request_id = request_id.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.header.request_timeout = Some(timeout);
        self
    }

    pub fn action(&self) -> &'static str {
        B::ACTION
    }

    pub fn request_id(&self) -> &RequestId {
        &self.header.request_id
    }

    pub fn to_request_frame(&self) -> Result<RequestFrame, MessageError> {
        Ok(RequestFrame {
            destination: self.header.destination.clone(),
            network_path: self.header.network_path.clone(),
            request_id: self.header.request_id.clone(),
            action: B::ACTION.to_string(),
            payload: B::Codec::encode(&self.body, &self.header.signatures)?,
        })
    }

    pub fn to_frame(&self) -> Result<Frame, MessageError> {
        self.to_request_frame().map(Frame::Request)
    }

    pub fn try_parse(frame: &RequestFrame) -> Result<Self, MessageError> {
        if frame.action != B::ACTION {
            return Err(MessageError::ActionMismatch {
                expected: B::ACTION,
                actual: frame.action.clone(),
            });
        }

        let decoded: Decoded<B> = B::Codec::decode(&frame.payload)?;
        decoded.body.validate().map_err(MessageError::Validation)?;

        Ok(Self {
            header: RequestHeader {
                request_id: frame.request_id.clone(),
                destination: frame.destination.clone(),
                network_path: frame.network_path.clone(),
                signatures: decoded.signatures,
                request_timeout: None,
                request_timestamp: Utc::now(),
                signed_bytes: Some(decoded.signed_bytes),
            },
            body: decoded.body,
        })
    }
}

impl<B: RequestBody> SignableMessage for OcppRequest<B> {
    fn context(&self) -> String {
        format!("{}Request", B::ACTION)
    }

    fn canonical_bytes(&self) -> Result<Vec<u8>, MessageError> {
        match &self.header.signed_bytes {
            Some(bytes) => Ok(bytes.clone()),
            None => B::Codec::canonical(&self.body),
        }
    }

    fn signatures(&self) -> &[Signature] {
        &self.header.signatures
    }

    fn signatures_mut(&mut self) -> &mut Vec<Signature> {
        &mut self.header.signatures
    }
}

// ============================================================================
// Responses
// ============================================================================

#[derive(Debug, Clone)]
pub struct ResponseHeader {
    pub request_id: RequestId,
    pub destination: SourceRouting,
    pub network_path: NetworkPath,
    pub signatures: Vec<Signature>,
    pub result: OcppResult,
    pub response_timestamp: DateTime<Utc>,
    /// Time between sending the request and resolving it, set by the
    /// requester
    pub runtime: Option<Duration>,
    /// Signed bytes of a received body
    signed_bytes: Option<Vec<u8>>,
}

/// Response to a request with body `B`
#[derive(Debug, Clone)]
pub struct OcppResponse<B: RequestBody> {
    pub header: ResponseHeader,
    pub body: B::Response,
}

impl<B: RequestBody> OcppResponse<B> {
    /// Successful answer to `request`, routed back along its path
    pub fn new(request: &RequestHeader, body: B::Response) -> Self {
        Self {
            header: Self::header_for(request, OcppResult::ok()),
            body,
        }
    }

    /// Synthetic answer carrying `result`
    pub fn from_result(request: &RequestHeader, result: OcppResult) -> Self {
        let body = B::Response::from_result(&result);
        Self {
            header: Self::header_for(request, result),
            body,
        }
    }

    fn header_for(request: &RequestHeader, result: OcppResult) -> ResponseHeader {
        ResponseHeader {
            request_id: request.request_id.clone(),
            destination: SourceRouting::return_to(&request.network_path),
            network_path: NetworkPath::empty(),
            signatures: Vec::new(),
            result,
            response_timestamp: Utc::now(),
            runtime: None,
            signed_bytes: None,
        }
    }

    pub fn failed(request: &RequestHeader, description: impl Into<String>) -> Self {
        Self::from_result(
            request,
            OcppResult::with_description(ResultCode::Rejected, description),
        )
    }

    pub fn filtered(request: &RequestHeader, reason: impl Into<String>) -> Self {
        Self::from_result(
            request,
            OcppResult::with_description(ResultCode::Filtered, reason),
        )
    }

    pub fn signature_error(request: &RequestHeader, description: impl Into<String>) -> Self {
        Self::from_result(
            request,
            OcppResult::with_description(ResultCode::SignatureError, description),
        )
    }

    pub fn format_violation(request: &RequestHeader, description: impl Into<String>) -> Self {
        Self::from_result(
            request,
            OcppResult::with_description(ResultCode::FormatViolation, description),
        )
    }

    pub fn timeout(request: &RequestHeader) -> Self {
        Self::from_result(
            request,
            OcppResult::with_description(ResultCode::Timeout, "No response within the timeout"),
        )
    }

    pub fn canceled(request: &RequestHeader) -> Self {
        Self::from_result(
            request,
            OcppResult::with_description(ResultCode::Canceled, "Request was canceled"),
        )
    }

    pub fn network_error(request: &RequestHeader, description: impl Into<String>) -> Self {
        Self::from_result(
            request,
            OcppResult::with_description(ResultCode::NetworkError, description),
        )
    }

    pub fn exception_occurred(request: &RequestHeader, description: impl Into<String>) -> Self {
        Self::from_result(
            request,
            OcppResult::with_description(ResultCode::ExceptionOccurred, description),
        )
    }

    pub fn not_implemented(request: &RequestHeader, description: impl Into<String>) -> Self {
        Self::from_result(
            request,
            OcppResult::with_description(ResultCode::NotImplemented, description),
        )
    }

    /// Record `local` as the node that produced this response
    pub fn answered_by(mut self, local: &NetworkingNodeId) -> Self {
        self.header.network_path = NetworkPath::from_node(local.clone());
        self
    }

    pub fn result(&self) -> &OcppResult {
        &self.header.result
    }

    pub fn is_ok(&self) -> bool {
        self.header.result.is_ok()
    }

    /// Wire form: business results become a Response, protocol failures a
    /// RequestError correlated to the same request id
    pub fn to_frame(&self) -> Result<Frame, MessageError> {
        let header = &self.header;
        if header.result.code.is_business() {
            return Ok(Frame::Response(ResponseFrame {
                destination: header.destination.clone(),
                network_path: header.network_path.clone(),
                request_id: header.request_id.clone(),
                payload: B::Codec::encode(&self.body, &header.signatures)?,
            }));
        }

        Ok(Frame::RequestError(ErrorFrame {
            destination: header.destination.clone(),
            network_path: header.network_path.clone(),
            request_id: header.request_id.clone(),
            error_code: header.result.code.wire_error_code(),
            error_description: header
                .result
                .description
                .clone()
                .unwrap_or_else(|| header.result.code.to_string()),
            error_details: header
                .result
                .details
                .clone()
                .unwrap_or_else(|| Value::Object(serde_json::Map::new())),
        }))
    }

    /// Parse the Response frame answering `request`
    pub fn try_parse(request: &RequestHeader, frame: &ResponseFrame) -> Result<Self, MessageError> {
        let decoded: Decoded<B::Response> = B::Codec::decode(&frame.payload)?;

        Ok(Self {
            header: ResponseHeader {
                request_id: request.request_id.clone(),
                destination: frame.destination.clone(),
                network_path: frame.network_path.clone(),
                signatures: decoded.signatures,
                result: OcppResult::ok(),
                response_timestamp: Utc::now(),
                runtime: None,
                signed_bytes: Some(decoded.signed_bytes),
            },
            body: decoded.body,
        })
    }
}

impl<B: RequestBody> SignableMessage for OcppResponse<B> {
    fn context(&self) -> String {
        format!("{}Response", B::ACTION)
    }

    fn canonical_bytes(&self) -> Result<Vec<u8>, MessageError> {
        match &self.header.signed_bytes {
            Some(bytes) => Ok(bytes.clone()),
            None => B::Codec::canonical(&self.body),
        }
    }

    fn signatures(&self) -> &[Signature] {
        &self.header.signatures
    }

    fn signatures_mut(&mut self) -> &mut Vec<Signature> {
        &mut self.header.signatures
    }
}

// ============================================================================
// Send messages
// ============================================================================

#[derive(Debug, Clone)]
pub struct SendHeader {
    pub destination: SourceRouting,
    pub network_path: NetworkPath,
    pub signatures: Vec<Signature>,
    pub timestamp: DateTime<Utc>,
    /// Signed bytes of a received body
    signed_bytes: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct OcppSend<B: SendBody> {
    pub header: SendHeader,
    pub body: B,
}

impl<B: SendBody> OcppSend<B> {
    pub fn new(destination: SourceRouting, body: B) -> Self {
        Self {
            header: SendHeader {
                destination,
                network_path: NetworkPath::empty(),
                signatures: Vec::new(),
                timestamp: Utc::now(),
                signed_bytes: None,
            },
            body,
        }
    }

    pub fn action(&self) -> &'static str {
        B::ACTION
    }

    pub fn to_frame(&self) -> Result<Frame, MessageError> {
        Ok(Frame::Send(SendFrame {
            destination: self.header.destination.clone(),
            network_path: self.header.network_path.clone(),
            action: B::ACTION.to_string(),
            payload: B::Codec::encode(&self.body, &self.header.signatures)?,
        }))
    }

    pub fn try_parse(frame: &SendFrame) -> Result<Self, MessageError> {
        if frame.action != B::ACTION {
            return Err(MessageError::ActionMismatch {
                expected: B::ACTION,
                actual: frame.action.clone(),
            });
        }

        let decoded: Decoded<B> = B::Codec::decode(&frame.payload)?;
        decoded.body.validate().map_err(MessageError::Validation)?;

        Ok(Self {
            header: SendHeader {
                destination: frame.destination.clone(),
                network_path: frame.network_path.clone(),
                signatures: decoded.signatures,
                timestamp: Utc::now(),
                signed_bytes: Some(decoded.signed_bytes),
            },
            body: decoded.body,
        })
    }
}

impl<B: SendBody> SignableMessage for OcppSend<B> {
    fn context(&self) -> String {
        B::ACTION.to_string()
    }

    fn canonical_bytes(&self) -> Result<Vec<u8>, MessageError> {
        match &self.header.signed_bytes {
            Some(bytes) => Ok(bytes.clone()),
            None => B::Codec::canonical(&self.body),
        }
    }

    fn signatures(&self) -> &[Signature] {
        &self.header.signatures
    }

    fn signatures_mut(&mut self) -> &mut Vec<Signature> {
        &mut self.header.signatures
    }
}
