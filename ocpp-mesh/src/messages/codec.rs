//! Body codecs: how a message body and its signatures map onto a payload

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::MessageError;
use crate::frame::Payload;
use crate::signature::Signature;

const SIGNATURES_KEY: &str = "signatures";

/// A payload split into its parts
#[derive(Debug, Clone)]
pub struct Decoded<B> {
    pub body: B,
    pub signatures: Vec<Signature>,
    /// Bytes the signatures cover, taken from the payload as received
    pub signed_bytes: Vec<u8>,
}

/// Encoding of a message body on the wire
pub trait BodyCodec: Send + Sync + 'static {
    /// Payload carrying `body` with `signatures` attached
    fn encode<B: Serialize>(body: &B, signatures: &[Signature]) -> Result<Payload, MessageError>;

    /// Body, attached signatures and signed bytes from a payload
    fn decode<B: Serialize + DeserializeOwned>(payload: &Payload) -> Result<Decoded<B>, MessageError>;

    /// Bytes covered by signatures for a locally built body
    fn canonical<B: Serialize>(body: &B) -> Result<Vec<u8>, MessageError>;
}

/// JSON object payloads; signatures ride along in a `signatures` member
#[derive(Debug, Clone, Copy)]
pub struct JsonCodec;

impl BodyCodec for JsonCodec {
    fn encode<B: Serialize>(body: &B, signatures: &[Signature]) -> Result<Payload, MessageError> {
        let mut value = serde_json::to_value(body)?;
        let object = value.as_object_mut().ok_or(MessageError::NotAnObject)?;
        if !signatures.is_empty() {
            object.insert(SIGNATURES_KEY.to_string(), serde_json::to_value(signatures)?);
        }
        Ok(Payload::Json(value))
    }

    // members the body type does not model stay covered by the signature
    fn decode<B: Serialize + DeserializeOwned>(payload: &Payload) -> Result<Decoded<B>, MessageError> {
        let mut value = payload
            .as_json()
            .cloned()
            .ok_or(MessageError::PayloadKind { expected: "JSON" })?;
        let object = value.as_object_mut().ok_or(MessageError::NotAnObject)?;
        let signatures = match object.remove(SIGNATURES_KEY) {
            Some(signatures) => serde_json::from_value(signatures)?,
            None => Vec::new(),
        };
        let signed_bytes = serde_json::to_vec(&value)?;
        Ok(Decoded {
            body: serde_json::from_value(value)?,
            signatures,
            signed_bytes,
        })
    }

    // serde_json maps are ordered by key, so this is the sorted-key form
    fn canonical<B: Serialize>(body: &B) -> Result<Vec<u8>, MessageError> {
        let value: Value = serde_json::to_value(body)?;
        Ok(serde_json::to_vec(&value)?)
    }
}

/// Raw bincode payloads for binary frames
#[derive(Debug, Clone, Copy)]
pub struct BinaryCodec;

#[derive(Serialize)]
struct BinaryEnvelopeRef<'a, B> {
    body: &'a B,
    signatures: &'a [Signature],
}

#[derive(Deserialize)]
struct BinaryEnvelope<B> {
    body: B,
    signatures: Vec<Signature>,
}

impl BodyCodec for BinaryCodec {
    fn encode<B: Serialize>(body: &B, signatures: &[Signature]) -> Result<Payload, MessageError> {
        let envelope = BinaryEnvelopeRef { body, signatures };
        Ok(Payload::Binary(bincode::serialize(&envelope)?))
    }

    // bincode has a single encoding per value, so re-encoding the body
    // reproduces the signed bytes
    fn decode<B: Serialize + DeserializeOwned>(payload: &Payload) -> Result<Decoded<B>, MessageError> {
        let bytes = payload
            .as_binary()
            .ok_or(MessageError::PayloadKind { expected: "binary" })?;
        let envelope: BinaryEnvelope<B> = bincode::deserialize(bytes)?;
        Ok(Decoded {
            signed_bytes: bincode::serialize(&envelope.body)?,
            body: envelope.body,
            signatures: envelope.signatures,
        })
    }

    fn canonical<B: Serialize>(body: &B) -> Result<Vec<u8>, MessageError> {
        Ok(bincode::serialize(body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Body {
        zeta: u32,
        alpha: String,
    }

    fn signature() -> Signature {
        Signature {
            key_id: "a2V5".to_string(),
            value: "c2ln".to_string(),
            signing_method: "Ed25519".to_string(),
            signer_name: "CSMS".to_string(),
            description: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_json_signatures_member() {
        let body = Body {
            zeta: 1,
            alpha: "a".to_string(),
        };
        let payload = JsonCodec::encode(&body, &[signature()]).unwrap();
        assert!(payload.as_json().unwrap().get("signatures").is_some());

        let decoded: Decoded<Body> = JsonCodec::decode(&payload).unwrap();
        assert_eq!(decoded.body, body);
        assert_eq!(decoded.signatures.len(), 1);
        assert_eq!(decoded.signed_bytes, JsonCodec::canonical(&body).unwrap());

        let unsigned = JsonCodec::encode(&body, &[]).unwrap();
        assert_eq!(unsigned, Payload::Json(json!({"zeta": 1, "alpha": "a"})));
    }

    #[test]
    fn test_json_canonical_form_sorts_keys() {
        let body = Body {
            zeta: 1,
            alpha: "a".to_string(),
        };
        let canonical = JsonCodec::canonical(&body).unwrap();
        assert_eq!(canonical, br#"{"alpha":"a","zeta":1}"#.to_vec());
    }

    #[test]
    fn test_payload_kind_mismatch() {
        let err = JsonCodec::decode::<Body>(&Payload::Binary(vec![1])).unwrap_err();
        assert!(matches!(err, MessageError::PayloadKind { expected: "JSON" }));

        let err = BinaryCodec::decode::<Body>(&Payload::Json(json!({}))).unwrap_err();
        assert!(matches!(err, MessageError::PayloadKind { expected: "binary" }));
    }

    #[test]
    fn test_binary_envelope() {
        let body = Body {
            zeta: 9,
            alpha: "bin".to_string(),
        };
        let payload = BinaryCodec::encode(&body, &[signature()]).unwrap();
        let decoded: Decoded<Body> = BinaryCodec::decode(&payload).unwrap();

        assert_eq!(decoded.body, body);
        assert_eq!(decoded.signatures[0].signer_name, "CSMS");
        assert_eq!(decoded.signed_bytes, BinaryCodec::canonical(&body).unwrap());
    }

    #[test]
    fn test_json_signed_bytes_keep_unknown_members() {
        let payload = Payload::Json(json!({"zeta": 1, "alpha": "a", "extra": true}));
        let decoded: Decoded<Body> = JsonCodec::decode(&payload).unwrap();

        assert_eq!(decoded.signed_bytes, br#"{"alpha":"a","extra":true,"zeta":1}"#.to_vec());
        assert_ne!(decoded.signed_bytes, JsonCodec::canonical(&decoded.body).unwrap());
    }
}
