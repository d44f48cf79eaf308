//! Message signatures
//!
//! Every exchanged message carries a collection of Ed25519 signatures over
//! a canonical encoding of its body. [`SignaturePolicy`] decides per message
//! type which key signs outgoing messages and which keys are trusted when
//! checking incoming ones.

pub mod keys;
pub mod policy;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::messages::MessageError;

pub use keys::{KeyPair, PublicKey};
pub use policy::{MessageContext, SignaturePolicy, SigningRule, VerificationRule};

/// Only supported signing method
pub const ED25519: &str = "Ed25519";

/// One signature attached to a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signature {
    /// Base64 public key of the signer
    pub key_id: String,
    /// Base64 signature value
    pub value: String,
    pub signing_method: String,
    pub signer_name: String,
    pub description: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// A message value that can be signed and verified
pub trait SignableMessage {
    /// Rule lookup key, e.g. `ChangeConfigurationRequest`
    fn context(&self) -> String;

    /// Bytes covered by signatures: the body without its signatures
    fn canonical_bytes(&self) -> Result<Vec<u8>, MessageError>;

    fn signatures(&self) -> &[Signature];

    fn signatures_mut(&mut self) -> &mut Vec<Signature>;
}

/// Signing and verification failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("{context} requires a signature but none is attached")]
    Missing { context: String },

    #[error("signature by untrusted key {key_id}")]
    UntrustedKey { key_id: String },

    #[error("signature by {key_id} does not match the message")]
    Invalid { key_id: String },

    #[error("malformed signature: {0}")]
    Malformed(String),

    #[error("unsupported signing method: {0}")]
    UnsupportedAlgorithm(String),

    #[error("cannot canonicalize message: {0}")]
    Canonicalization(String),
}

impl From<MessageError> for SignatureError {
    fn from(err: MessageError) -> Self {
        SignatureError::Canonicalization(err.to_string())
    }
}
