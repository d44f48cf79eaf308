//! Binary framing
//!
//! A bincode-encoded tagged enum with the same fields as the JSON arrays.
//! The first four bytes hold the variant index, which lets a broken frame
//! still report its kind.

use serde::{Deserialize, Serialize};

use super::{
    CouldNotParse, ErrorCode, ErrorFrame, Frame, FrameError, MessageType, Payload, RequestFrame,
    RequestId, ResponseFrame, SendFrame, WireMessage,
};
use crate::network::{NetworkPath, SourceRouting};

#[derive(Debug, Serialize, Deserialize)]
enum BinaryPayload {
    Json(String),
    Binary(Vec<u8>),
}

#[derive(Debug, Serialize, Deserialize)]
struct BinaryError {
    destination: SourceRouting,
    network_path: NetworkPath,
    request_id: RequestId,
    error_code: String,
    error_description: String,
    error_details: String,
}

// Variant order is the wire tag: keep it in sync with `tag_kind`.
#[derive(Debug, Serialize, Deserialize)]
enum BinaryFrame {
    Request {
        destination: SourceRouting,
        network_path: NetworkPath,
        request_id: RequestId,
        action: String,
        payload: BinaryPayload,
    },
    Response {
        destination: SourceRouting,
        network_path: NetworkPath,
        request_id: RequestId,
        payload: BinaryPayload,
    },
    RequestError(BinaryError),
    ResponseError(BinaryError),
    Send {
        destination: SourceRouting,
        network_path: NetworkPath,
        action: String,
        payload: BinaryPayload,
    },
}

/// Leading fields shared by every correlated frame kind
#[derive(Deserialize)]
struct FrameHead {
    #[allow(dead_code)]
    destination: SourceRouting,
    #[allow(dead_code)]
    network_path: NetworkPath,
    request_id: RequestId,
}

fn tag_kind(tag: u32) -> Option<MessageType> {
    match tag {
        0 => Some(MessageType::Request),
        1 => Some(MessageType::Response),
        2 => Some(MessageType::RequestError),
        3 => Some(MessageType::ResponseError),
        4 => Some(MessageType::Send),
        _ => None,
    }
}

fn to_binary_payload(payload: &Payload) -> Result<BinaryPayload, FrameError> {
    Ok(match payload {
        Payload::Json(value) => BinaryPayload::Json(serde_json::to_string(value)?),
        Payload::Binary(bytes) => BinaryPayload::Binary(bytes.clone()),
    })
}

fn from_binary_payload(payload: BinaryPayload) -> Result<Payload, FrameError> {
    Ok(match payload {
        BinaryPayload::Json(text) => Payload::Json(serde_json::from_str(&text)?),
        BinaryPayload::Binary(bytes) => Payload::Binary(bytes),
    })
}

fn to_binary_error(f: &ErrorFrame) -> Result<BinaryError, FrameError> {
    Ok(BinaryError {
        destination: f.destination.clone(),
        network_path: f.network_path.clone(),
        request_id: f.request_id.clone(),
        error_code: f.error_code.to_string(),
        error_description: f.error_description.clone(),
        error_details: serde_json::to_string(&f.error_details)?,
    })
}

fn from_binary_error(e: BinaryError) -> Result<ErrorFrame, FrameError> {
    Ok(ErrorFrame {
        destination: e.destination,
        network_path: e.network_path,
        request_id: e.request_id,
        error_code: ErrorCode::parse_lossy(&e.error_code),
        error_description: e.error_description,
        error_details: serde_json::from_str(&e.error_details)
            .map_err(|err| FrameError::field("errorDetails", err))?,
    })
}

/// Encode any frame as a binary message
pub fn encode(frame: &Frame) -> Result<Vec<u8>, FrameError> {
    let binary = match frame {
        Frame::Request(f) => BinaryFrame::Request {
            destination: f.destination.clone(),
            network_path: f.network_path.clone(),
            request_id: f.request_id.clone(),
            action: f.action.clone(),
            payload: to_binary_payload(&f.payload)?,
        },
        Frame::Response(f) => BinaryFrame::Response {
            destination: f.destination.clone(),
            network_path: f.network_path.clone(),
            request_id: f.request_id.clone(),
            payload: to_binary_payload(&f.payload)?,
        },
        Frame::RequestError(f) => BinaryFrame::RequestError(to_binary_error(f)?),
        Frame::ResponseError(f) => BinaryFrame::ResponseError(to_binary_error(f)?),
        Frame::Send(f) => BinaryFrame::Send {
            destination: f.destination.clone(),
            network_path: f.network_path.clone(),
            action: f.action.clone(),
            payload: to_binary_payload(&f.payload)?,
        },
    };

    Ok(bincode::serialize(&binary)?)
}

/// Decode a binary message
pub fn decode(bytes: &[u8]) -> Result<Frame, CouldNotParse> {
    decode_frame(bytes).map_err(|error| {
        let (message_type, request_id) = salvage(bytes);
        CouldNotParse {
            raw: WireMessage::Binary(bytes.to_vec()),
            error: error.to_string(),
            message_type,
            request_id,
        }
    })
}

fn decode_frame(bytes: &[u8]) -> Result<Frame, FrameError> {
    let binary: BinaryFrame = bincode::deserialize(bytes)?;

    Ok(match binary {
        BinaryFrame::Request {
            destination,
            network_path,
            request_id,
            action,
            payload,
        } => Frame::Request(RequestFrame {
            destination,
            network_path,
            request_id,
            action,
            payload: from_binary_payload(payload)?,
        }),
        BinaryFrame::Response {
            destination,
            network_path,
            request_id,
            payload,
        } => Frame::Response(ResponseFrame {
            destination,
            network_path,
            request_id,
            payload: from_binary_payload(payload)?,
        }),
        BinaryFrame::RequestError(e) => Frame::RequestError(from_binary_error(e)?),
        BinaryFrame::ResponseError(e) => Frame::ResponseError(from_binary_error(e)?),
        BinaryFrame::Send {
            destination,
            network_path,
            action,
            payload,
        } => Frame::Send(SendFrame {
            destination,
            network_path,
            action,
            payload: from_binary_payload(payload)?,
        }),
    })
}

fn salvage(bytes: &[u8]) -> (Option<MessageType>, Option<RequestId>) {
    let Some(tag) = bytes.get(..4) else {
        return (None, None);
    };
    let tag = u32::from_le_bytes([tag[0], tag[1], tag[2], tag[3]]);
    let kind = tag_kind(tag);

    let request_id = match kind {
        Some(MessageType::Send) | None => None,
        Some(_) => bincode::deserialize::<FrameHead>(&bytes[4..])
            .ok()
            .map(|head| head.request_id),
    };

    (kind, request_id)
}
