//! Per-message-type signing and verification rules

use std::fmt;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::debug;

use super::{KeyPair, PublicKey, Signature, SignableMessage, SignatureError, ED25519};
use crate::messages::{OcppRequest, OcppResponse, OcppSend, RequestBody, SendBody};

/// Which messages a rule applies to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageContext {
    /// Wildcard `*`
    Any,
    /// A message type name such as `ChangeConfigurationRequest`
    Exact(String),
}

impl MessageContext {
    pub fn matches(&self, context: &str) -> bool {
        match self {
            MessageContext::Any => true,
            MessageContext::Exact(name) => name == context,
        }
    }
}

impl From<&str> for MessageContext {
    fn from(text: &str) -> Self {
        if text == "*" {
            MessageContext::Any
        } else {
            MessageContext::Exact(text.to_string())
        }
    }
}

impl From<String> for MessageContext {
    fn from(text: String) -> Self {
        MessageContext::from(text.as_str())
    }
}

type NameGenerator = Arc<dyn Fn(&str) -> String + Send + Sync>;
type DescriptionGenerator = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;
type TimestampGenerator = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// How to sign messages of one context
#[derive(Clone)]
pub struct SigningRule {
    key: Arc<KeyPair>,
    signer_name: NameGenerator,
    description: DescriptionGenerator,
    timestamp: TimestampGenerator,
}

impl SigningRule {
    /// Sign with `key` under a fixed signer name, stamped with the current time
    pub fn new(key: Arc<KeyPair>, signer_name: impl Into<String>) -> Self {
        let signer_name = signer_name.into();
        Self {
            key,
            signer_name: Arc::new(move |_: &str| signer_name.clone()),
            description: Arc::new(|_: &str| None),
            timestamp: Arc::new(Utc::now),
        }
    }

    pub fn with_signer_name(
        mut self,
        generator: impl Fn(&str) -> String + Send + Sync + 'static,
    ) -> Self {
        self.signer_name = Arc::new(generator);
        self
    }

    pub fn with_description(
        mut self,
        generator: impl Fn(&str) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.description = Arc::new(generator);
        self
    }

    pub fn with_timestamp(
        mut self,
        generator: impl Fn() -> DateTime<Utc> + Send + Sync + 'static,
    ) -> Self {
        self.timestamp = Arc::new(generator);
        self
    }

    pub fn public_key(&self) -> PublicKey {
        self.key.public_key()
    }

    fn sign<M: SignableMessage + ?Sized>(&self, message: &mut M) -> Result<(), SignatureError> {
        let context = message.context();
        let canonical = message.canonical_bytes()?;
        let value = self.key.sign(&canonical);

        message.signatures_mut().push(Signature {
            key_id: self.key.public_key().to_base64(),
            value: STANDARD.encode(value),
            signing_method: ED25519.to_string(),
            signer_name: (self.signer_name)(&context),
            description: (self.description)(&context),
            timestamp: (self.timestamp)(),
        });
        Ok(())
    }
}

impl fmt::Debug for SigningRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningRule")
            .field("key", &self.key.public_key())
            .finish_non_exhaustive()
    }
}

/// How to check messages of one context
#[derive(Debug, Clone)]
pub struct VerificationRule {
    trusted_keys: Vec<PublicKey>,
    require_signature: bool,
}

impl VerificationRule {
    /// Signatures are optional, but any attached one must come from a
    /// trusted key and verify
    pub fn trusting(keys: impl IntoIterator<Item = PublicKey>) -> Self {
        Self {
            trusted_keys: keys.into_iter().collect(),
            require_signature: false,
        }
    }

    /// At least one signature must be attached
    pub fn required(mut self) -> Self {
        self.require_signature = true;
        self
    }

    pub fn trusted_keys(&self) -> &[PublicKey] {
        &self.trusted_keys
    }

    pub fn requires_signature(&self) -> bool {
        self.require_signature
    }

    fn verify<M: SignableMessage + ?Sized>(&self, message: &M) -> Result<(), SignatureError> {
        let signatures = message.signatures();
        if signatures.is_empty() {
            if self.require_signature {
                return Err(SignatureError::Missing {
                    context: message.context(),
                });
            }
            return Ok(());
        }

        let canonical = message.canonical_bytes()?;
        for signature in signatures {
            if signature.signing_method != ED25519 {
                return Err(SignatureError::UnsupportedAlgorithm(
                    signature.signing_method.clone(),
                ));
            }

            let key = PublicKey::from_base64(&signature.key_id)?;
            if !self.trusted_keys.contains(&key) {
                return Err(SignatureError::UntrustedKey {
                    key_id: signature.key_id.clone(),
                });
            }

            let value = STANDARD
                .decode(&signature.value)
                .map_err(|e| SignatureError::Malformed(format!("value is not base64: {e}")))?;
            key.verify(&canonical, &value)?;
        }
        Ok(())
    }
}

/// Ordered signing and verification rule sets; the first matching rule wins
#[derive(Debug, Default)]
pub struct SignaturePolicy {
    signing: RwLock<Vec<(MessageContext, SigningRule)>>,
    verification: RwLock<Vec<(MessageContext, VerificationRule)>>,
}

impl SignaturePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_signing_rule(&self, context: impl Into<MessageContext>, rule: SigningRule) {
        self.signing.write().push((context.into(), rule));
    }

    pub fn add_verification_rule(
        &self,
        context: impl Into<MessageContext>,
        rule: VerificationRule,
    ) {
        self.verification.write().push((context.into(), rule));
    }

    /// Drop every rule
    pub fn clear(&self) {
        self.signing.write().clear();
        self.verification.write().clear();
    }

    /// Append a signature when a signing rule matches; no-op otherwise
    pub fn sign<M: SignableMessage + ?Sized>(&self, message: &mut M) -> Result<(), SignatureError> {
        let context = message.context();
        let rules = self.signing.read();
        match rules.iter().find(|(ctx, _)| ctx.matches(&context)) {
            Some((_, rule)) => {
                rule.sign(message)?;
                debug!("Signed {}", context);
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Check attached signatures when a verification rule matches
    pub fn verify<M: SignableMessage + ?Sized>(&self, message: &M) -> Result<(), SignatureError> {
        let context = message.context();
        let rules = self.verification.read();
        match rules.iter().find(|(ctx, _)| ctx.matches(&context)) {
            Some((_, rule)) => rule.verify(message),
            None => Ok(()),
        }
    }

    pub fn sign_request<B: RequestBody>(
        &self,
        request: &mut OcppRequest<B>,
    ) -> Result<(), SignatureError> {
        self.sign(request)
    }

    pub fn sign_response<B: RequestBody>(
        &self,
        response: &mut OcppResponse<B>,
    ) -> Result<(), SignatureError> {
        self.sign(response)
    }

    pub fn sign_send<B: SendBody>(&self, message: &mut OcppSend<B>) -> Result<(), SignatureError> {
        self.sign(message)
    }

    pub fn verify_request<B: RequestBody>(
        &self,
        request: &OcppRequest<B>,
    ) -> Result<(), SignatureError> {
        self.verify(request)
    }

    pub fn verify_response<B: RequestBody>(
        &self,
        response: &OcppResponse<B>,
    ) -> Result<(), SignatureError> {
        self.verify(response)
    }

    pub fn verify_send<B: SendBody>(&self, message: &OcppSend<B>) -> Result<(), SignatureError> {
        self.verify(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Frame, Payload};
    use crate::messages::change_configuration::ChangeConfigurationRequest;
    use crate::messages::data_transfer::DataTransferRequest;
    use crate::network::{NetworkingNodeId, SourceRouting};
    use serde_json::Value;

    fn request() -> OcppRequest<ChangeConfigurationRequest> {
        OcppRequest::new(
            SourceRouting::to(NetworkingNodeId::parse("CS001").unwrap()),
            ChangeConfigurationRequest::new("k", "v"),
        )
    }

    #[test]
    fn test_sign_then_verify() {
        let keys = Arc::new(KeyPair::generate());
        let policy = SignaturePolicy::new();
        policy.add_signing_rule("ChangeConfigurationRequest", SigningRule::new(keys.clone(), "CSMS"));
        policy.add_verification_rule(
            "*",
            VerificationRule::trusting([keys.public_key()]).required(),
        );

        let mut req = request();
        policy.sign_request(&mut req).unwrap();

        assert_eq!(req.header.signatures.len(), 1);
        assert_eq!(req.header.signatures[0].signer_name, "CSMS");
        assert_eq!(req.header.signatures[0].signing_method, "Ed25519");
        assert!(policy.verify_request(&req).is_ok());
    }

    #[test]
    fn test_unrelated_key_fails() {
        let signer = Arc::new(KeyPair::generate());
        let policy = SignaturePolicy::new();
        policy.add_signing_rule("*", SigningRule::new(signer, "CSMS"));
        policy.add_verification_rule(
            "*",
            VerificationRule::trusting([KeyPair::generate().public_key()]),
        );

        let mut req = request();
        policy.sign_request(&mut req).unwrap();

        let err = policy.verify_request(&req).unwrap_err();
        assert!(matches!(err, SignatureError::UntrustedKey { .. }));
        assert!(!err.to_string().is_empty());
    }

    #[test]
    fn test_tampered_body_fails() {
        let keys = Arc::new(KeyPair::generate());
        let policy = SignaturePolicy::new();
        policy.add_signing_rule("*", SigningRule::new(keys.clone(), "CSMS"));
        policy.add_verification_rule("*", VerificationRule::trusting([keys.public_key()]));

        let mut req = request();
        policy.sign_request(&mut req).unwrap();
        req.body.value = "tampered".to_string();

        assert!(matches!(
            policy.verify_request(&req),
            Err(SignatureError::Invalid { .. })
        ));
    }

    #[test]
    fn test_signing_without_rule_is_noop() {
        let policy = SignaturePolicy::new();
        let mut req = request();

        policy.sign_request(&mut req).unwrap();
        assert!(req.header.signatures.is_empty());
        assert!(policy.verify_request(&req).is_ok());
    }

    #[test]
    fn test_required_signature_missing() {
        let policy = SignaturePolicy::new();
        policy.add_verification_rule(
            "ChangeConfigurationRequest",
            VerificationRule::trusting(Vec::new()).required(),
        );

        let err = policy.verify_request(&request()).unwrap_err();
        assert_eq!(
            err,
            SignatureError::Missing {
                context: "ChangeConfigurationRequest".to_string()
            }
        );
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let first = Arc::new(KeyPair::from_seed(&[1u8; 32]));
        let second = Arc::new(KeyPair::from_seed(&[2u8; 32]));
        let policy = SignaturePolicy::new();
        policy.add_signing_rule("ChangeConfigurationRequest", SigningRule::new(first.clone(), "first"));
        policy.add_signing_rule("*", SigningRule::new(second, "second"));

        let mut req = request();
        policy.sign_request(&mut req).unwrap();
        assert_eq!(req.header.signatures.len(), 1);
        assert_eq!(req.header.signatures[0].key_id, first.public_key().to_base64());

        policy.clear();
        let mut unsigned = request();
        policy.sign_request(&mut unsigned).unwrap();
        assert!(unsigned.header.signatures.is_empty());
    }

    #[test]
    fn test_generators() {
        let keys = Arc::new(KeyPair::generate());
        let fixed = Utc::now();
        let policy = SignaturePolicy::new();
        policy.add_signing_rule(
            "*",
            SigningRule::new(keys, "ignored")
                .with_signer_name(|ctx| format!("signer-of-{ctx}"))
                .with_description(|_| Some("test".to_string()))
                .with_timestamp(move || fixed),
        );

        let mut req = request();
        policy.sign_request(&mut req).unwrap();
        let signature = &req.header.signatures[0];
        assert_eq!(signature.signer_name, "signer-of-ChangeConfigurationRequest");
        assert_eq!(signature.description.as_deref(), Some("test"));
        assert_eq!(signature.timestamp, fixed);
    }

    fn framed_data_transfer(policy: &SignaturePolicy, data: Value) -> crate::frame::RequestFrame {
        let mut req = OcppRequest::new(
            SourceRouting::to(NetworkingNodeId::parse("CS001").unwrap()),
            DataTransferRequest::new("org.example").with_data(data),
        );
        policy.sign_request(&mut req).unwrap();
        match Frame::parse(&req.to_frame().unwrap().encode().unwrap()).unwrap() {
            Frame::Request(frame) => frame,
            other => panic!("Expected Request, got {:?}", other),
        }
    }

    #[test]
    fn test_null_data_verifies_after_framing() {
        let keys = Arc::new(KeyPair::generate());
        let policy = SignaturePolicy::new();
        policy.add_signing_rule("*", SigningRule::new(keys.clone(), "CSMS"));
        policy.add_verification_rule("*", VerificationRule::trusting([keys.public_key()]).required());

        let frame = framed_data_transfer(&policy, Value::Null);
        let parsed = OcppRequest::<DataTransferRequest>::try_parse(&frame).unwrap();

        assert_eq!(parsed.body.data, Some(Value::Null));
        assert!(policy.verify_request(&parsed).is_ok());
    }

    #[test]
    fn test_unmodeled_member_is_covered() {
        let keys = Arc::new(KeyPair::generate());
        let policy = SignaturePolicy::new();
        policy.add_signing_rule("*", SigningRule::new(keys.clone(), "CSMS"));
        policy.add_verification_rule("*", VerificationRule::trusting([keys.public_key()]));

        let mut frame = framed_data_transfer(&policy, serde_json::json!({"meter": 1}));
        if let Payload::Json(Value::Object(members)) = &mut frame.payload {
            members.insert("injected".to_string(), Value::Bool(true));
        }
        let parsed = OcppRequest::<DataTransferRequest>::try_parse(&frame).unwrap();

        assert!(matches!(
            policy.verify_request(&parsed),
            Err(SignatureError::Invalid { .. })
        ));
    }
}
