//! JSON text framing

use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use super::{
    CouldNotParse, ErrorCode, ErrorFrame, Frame, FrameError, MessageType, Payload, RequestFrame,
    RequestId, ResponseFrame, SendFrame, WireMessage,
};
use crate::network::{NetworkPath, SourceRouting};

/// Encode a frame as a networked OCPP JSON array
pub fn encode(frame: &Frame) -> Result<String, FrameError> {
    let array = match frame {
        Frame::Request(f) => {
            let payload = json_payload(&f.payload)?;
            json!([
                MessageType::Request.id(),
                f.destination,
                f.network_path,
                f.request_id,
                f.action,
                payload,
            ])
        }
        Frame::Response(f) => {
            let payload = json_payload(&f.payload)?;
            json!([
                MessageType::Response.id(),
                f.destination,
                f.network_path,
                f.request_id,
                payload,
            ])
        }
        Frame::RequestError(f) => error_array(MessageType::RequestError, f),
        Frame::ResponseError(f) => error_array(MessageType::ResponseError, f),
        Frame::Send(f) => {
            let payload = json_payload(&f.payload)?;
            json!([
                MessageType::Send.id(),
                f.destination,
                f.network_path,
                f.action,
                payload,
            ])
        }
    };

    Ok(serde_json::to_string(&array)?)
}

fn json_payload(payload: &Payload) -> Result<&Value, FrameError> {
    payload.as_json().ok_or(FrameError::BinaryPayloadInTextFrame)
}

fn error_array(kind: MessageType, f: &ErrorFrame) -> Value {
    json!([
        kind.id(),
        f.destination,
        f.network_path,
        f.request_id,
        f.error_code.to_string(),
        f.error_description,
        f.error_details,
    ])
}

/// Decode a JSON text frame
pub fn decode(text: &str) -> Result<Frame, CouldNotParse> {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => return Err(failure(text, FrameError::Json(e), None, None)),
    };

    let Some(array) = value.as_array() else {
        return Err(failure(
            text,
            FrameError::InvalidFormat("expected a JSON array".to_string()),
            None,
            None,
        ));
    };

    let message_type = array.first().and_then(Value::as_i64);
    let kind = match message_type.map(|id| (id, MessageType::from_id(id))) {
        Some((_, Some(kind))) => kind,
        Some((id, None)) => {
            return Err(failure(text, FrameError::UnknownMessageType(id), None, None))
        }
        None => {
            return Err(failure(
                text,
                FrameError::InvalidFormat("missing message type id".to_string()),
                None,
                None,
            ))
        }
    };

    let fields = Fields::new(array);
    fields.frame(kind).map_err(|e| {
        let request_id = match kind {
            MessageType::Send => None,
            _ => fields.salvage_request_id(),
        };
        failure(text, e, Some(kind), request_id)
    })
}

fn failure(
    text: &str,
    error: FrameError,
    message_type: Option<MessageType>,
    request_id: Option<RequestId>,
) -> CouldNotParse {
    CouldNotParse {
        raw: WireMessage::Text(text.to_string()),
        error: error.to_string(),
        message_type,
        request_id,
    }
}

/// Positional view over a frame array; networked frames carry the
/// destination and path right after the type id
struct Fields<'a> {
    array: &'a [Value],
    networked: bool,
}

impl<'a> Fields<'a> {
    fn new(array: &'a [Value]) -> Self {
        let networked = array.get(1).map(Value::is_array).unwrap_or(false);
        Self { array, networked }
    }

    /// Index of the first field after the addressing block
    fn body_start(&self) -> usize {
        if self.networked {
            3
        } else {
            1
        }
    }

    fn body(&self, offset: usize) -> Option<&'a Value> {
        self.array.get(self.body_start() + offset)
    }

    fn expect_len(&self, body_fields: usize) -> Result<(), FrameError> {
        let expected = self.body_start() + body_fields;
        if self.array.len() < expected {
            return Err(FrameError::InvalidFormat(format!(
                "expected {} elements, got {}",
                expected,
                self.array.len()
            )));
        }
        Ok(())
    }

    fn addressing(&self) -> Result<(SourceRouting, NetworkPath), FrameError> {
        if !self.networked {
            return Ok((SourceRouting::zero(), NetworkPath::empty()));
        }
        let destination = typed(&self.array[1], "destination")?;
        let path = self
            .array
            .get(2)
            .ok_or_else(|| FrameError::field("networkPath", "missing"))?;
        let path = typed(path, "networkPath")?;
        Ok((destination, path))
    }

    fn string(&self, offset: usize, field: &'static str) -> Result<String, FrameError> {
        self.body(offset)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| FrameError::field(field, "expected a string"))
    }

    fn salvage_request_id(&self) -> Option<RequestId> {
        self.body(0)
            .and_then(Value::as_str)
            .map(RequestId::from)
    }

    fn frame(&self, kind: MessageType) -> Result<Frame, FrameError> {
        let (destination, network_path) = self.addressing()?;

        match kind {
            MessageType::Request => {
                self.expect_len(3)?;
                Ok(Frame::Request(RequestFrame {
                    destination,
                    network_path,
                    request_id: self.string(0, "requestId")?.into(),
                    action: self.string(1, "action")?,
                    payload: Payload::Json(self.array[self.body_start() + 2].clone()),
                }))
            }
            MessageType::Response => {
                self.expect_len(2)?;
                Ok(Frame::Response(ResponseFrame {
                    destination,
                    network_path,
                    request_id: self.string(0, "requestId")?.into(),
                    payload: Payload::Json(self.array[self.body_start() + 1].clone()),
                }))
            }
            MessageType::RequestError | MessageType::ResponseError => {
                self.expect_len(3)?;
                let error = ErrorFrame {
                    destination,
                    network_path,
                    request_id: self.string(0, "requestId")?.into(),
                    error_code: ErrorCode::parse_lossy(&self.string(1, "errorCode")?),
                    error_description: self.string(2, "errorDescription")?,
                    error_details: self
                        .body(3)
                        .cloned()
                        .unwrap_or_else(|| Value::Object(serde_json::Map::new())),
                };
                if kind == MessageType::RequestError {
                    Ok(Frame::RequestError(error))
                } else {
                    Ok(Frame::ResponseError(error))
                }
            }
            MessageType::Send => {
                self.expect_len(2)?;
                Ok(Frame::Send(SendFrame {
                    destination,
                    network_path,
                    action: self.string(0, "action")?,
                    payload: Payload::Json(self.array[self.body_start() + 1].clone()),
                }))
            }
        }
    }
}

fn typed<T: DeserializeOwned>(value: &Value, field: &'static str) -> Result<T, FrameError> {
    serde_json::from_value(value.clone()).map_err(|e| FrameError::field(field, e))
}
