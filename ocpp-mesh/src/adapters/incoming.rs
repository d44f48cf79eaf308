//! Incoming adapter (IN)
//!
//! Answers requests addressed to this node. Per request:
//! parse, verify signatures, dispatch to the one registered handler, sign
//! the answer and hand it to the transport. Failures at any step become a
//! correlated answer; nothing escapes to the caller.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tracing::{debug, error, warn};

use super::{call_isolated, RegistrationError};
use crate::events::{BoxError, EventHub, IncomingEvent};
use crate::frame::{
    CouldNotParse, ErrorCode, ErrorFrame, Frame, MessageType, RequestFrame, SendFrame,
};
use crate::messages::{
    OcppRequest, OcppResponse, OcppResult, OcppSend, RequestBody, RequestHeader, ResultCode,
    SendBody,
};
use crate::network::{NetworkPath, NetworkingNodeId, SourceRouting};
use crate::signature::SignaturePolicy;
use crate::transport::{SentMessageResult, Transport};

/// What a request handler returns: a response body, or `None` to let the
/// adapter answer with a generic rejection
pub type HandlerResult<R> = Result<Option<R>, BoxError>;

type RequestHandler<B> = Arc<
    dyn Fn(OcppRequest<B>) -> BoxFuture<'static, HandlerResult<<B as RequestBody>::Response>>
        + Send
        + Sync,
>;

type SendHandler<B> =
    Arc<dyn Fn(OcppSend<B>) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

/// Answer produced for one request
#[derive(Debug, Clone)]
pub struct Answer {
    pub frame: Frame,
    /// Result of the typed pipeline; `None` when the request never reached
    /// one (unknown action, internal failure)
    pub result: Option<OcppResult>,
}

// ============================================================================
// Dispatch table entries
// ============================================================================

#[async_trait]
trait RequestEntry: Send + Sync {
    fn has_handler(&self) -> bool;

    async fn process(
        &self,
        local: &NetworkingNodeId,
        policy: &SignaturePolicy,
        frame: &RequestFrame,
    ) -> (Frame, OcppResult);
}

struct TypedRequestEntry<B: RequestBody> {
    handler: Option<RequestHandler<B>>,
}

impl<B: RequestBody> TypedRequestEntry<B> {
    async fn invoke(
        handler: &RequestHandler<B>,
        request: OcppRequest<B>,
    ) -> Option<OcppResponse<B>> {
        let header = request.header.clone();
        match call_isolated(|| handler(request)).await {
            Ok(Ok(Some(body))) => Some(OcppResponse::new(&header, body)),
            Ok(Ok(None)) => None,
            Ok(Err(e)) => {
                warn!("{} handler failed: {}", B::ACTION, e);
                Some(OcppResponse::exception_occurred(&header, e.to_string()))
            }
            Err(panic) => {
                error!("{} handler panicked: {}", B::ACTION, panic);
                Some(OcppResponse::exception_occurred(&header, panic))
            }
        }
    }

    fn finish(
        local: &NetworkingNodeId,
        policy: &SignaturePolicy,
        frame: &RequestFrame,
        response: OcppResponse<B>,
    ) -> (Frame, OcppResult) {
        let mut response = response.answered_by(local);
        if let Err(e) = policy.sign_response(&mut response) {
            error!("Cannot sign {} response: {}", B::ACTION, e);
            response = OcppResponse::from_result(
                &RequestHeader::from_frame(frame),
                OcppResult::with_description(ResultCode::InternalError, e.to_string()),
            )
            .answered_by(local);
        }

        let result = response.result().clone();
        match response.to_frame() {
            Ok(answer) => (answer, result),
            Err(e) => {
                error!("Cannot encode {} response: {}", B::ACTION, e);
                let answer = ErrorFrame::for_request(
                    frame,
                    local,
                    ErrorCode::InternalError,
                    e.to_string(),
                );
                (
                    Frame::RequestError(answer),
                    OcppResult::with_description(ResultCode::InternalError, e.to_string()),
                )
            }
        }
    }
}

#[async_trait]
impl<B: RequestBody> RequestEntry for TypedRequestEntry<B> {
    fn has_handler(&self) -> bool {
        self.handler.is_some()
    }

    async fn process(
        &self,
        local: &NetworkingNodeId,
        policy: &SignaturePolicy,
        frame: &RequestFrame,
    ) -> (Frame, OcppResult) {
        let header = RequestHeader::from_frame(frame);

        let request = match OcppRequest::<B>::try_parse(frame) {
            Ok(request) => request,
            Err(e) => {
                warn!("Malformed {} request {}: {}", B::ACTION, frame.request_id, e);
                let response = OcppResponse::format_violation(&header, e.to_string());
                return Self::finish(local, policy, frame, response);
            }
        };

        let signature_error = policy.verify_request(&request).err().map(|e| {
            warn!("Signature check failed for {} request {}: {}", B::ACTION, frame.request_id, e);
            OcppResponse::signature_error(&header, e.to_string())
        });

        let handled = match (&signature_error, &self.handler) {
            (None, Some(handler)) => Self::invoke(handler, request).await,
            _ => None,
        };

        let response = [signature_error, handled]
            .into_iter()
            .flatten()
            .next()
            .unwrap_or_else(|| match self.handler {
                Some(_) => OcppResponse::failed(&header, "Handler returned no response"),
                None => OcppResponse::not_implemented(
                    &header,
                    format!("No handler registered for {}", B::ACTION),
                ),
            });

        Self::finish(local, policy, frame, response)
    }
}

#[async_trait]
trait SendEntry: Send + Sync {
    fn has_handler(&self) -> bool;

    async fn process(&self, policy: &SignaturePolicy, frame: &SendFrame) -> bool;
}

struct TypedSendEntry<B: SendBody> {
    handler: Option<SendHandler<B>>,
}

#[async_trait]
impl<B: SendBody> SendEntry for TypedSendEntry<B> {
    fn has_handler(&self) -> bool {
        self.handler.is_some()
    }

    async fn process(&self, policy: &SignaturePolicy, frame: &SendFrame) -> bool {
        let message = match OcppSend::<B>::try_parse(frame) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping malformed {} message: {}", B::ACTION, e);
                return false;
            }
        };

        if let Err(e) = policy.verify_send(&message) {
            warn!("Dropping {} message: {}", B::ACTION, e);
            return false;
        }

        let Some(handler) = &self.handler else {
            debug!("No handler for {} message", B::ACTION);
            return false;
        };

        match call_isolated(|| handler(message)).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!("{} handler failed: {}", B::ACTION, e);
                false
            }
            Err(panic) => {
                error!("{} handler panicked: {}", B::ACTION, panic);
                false
            }
        }
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builds the IN dispatch table
#[derive(Default)]
pub struct IncomingAdapterBuilder {
    requests: HashMap<&'static str, Box<dyn RequestEntry>>,
    sends: HashMap<&'static str, Box<dyn SendEntry>>,
}

impl IncomingAdapterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept requests of type `B` without handling them; they are answered
    /// with NotImplemented
    pub fn register<B: RequestBody>(mut self) -> Self {
        self.requests
            .entry(B::ACTION)
            .or_insert_with(|| Box::new(TypedRequestEntry::<B> { handler: None }));
        self
    }

    /// Handle requests of type `B`; one handler per type
    pub fn on<B, F, Fut>(mut self, handler: F) -> Result<Self, RegistrationError>
    where
        B: RequestBody,
        F: Fn(OcppRequest<B>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult<B::Response>> + Send + 'static,
    {
        if self.requests.get(B::ACTION).map(|e| e.has_handler()) == Some(true) {
            return Err(RegistrationError::DuplicateHandler { action: B::ACTION });
        }

        let handler: RequestHandler<B> = Arc::new(move |request| handler(request).boxed());
        self.requests.insert(
            B::ACTION,
            Box::new(TypedRequestEntry {
                handler: Some(handler),
            }),
        );
        Ok(self)
    }

    /// Handle fire-and-forget messages of type `B`; one handler per type
    pub fn on_send<B, F, Fut>(mut self, handler: F) -> Result<Self, RegistrationError>
    where
        B: SendBody,
        F: Fn(OcppSend<B>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        if self.sends.get(B::ACTION).map(|e| e.has_handler()) == Some(true) {
            return Err(RegistrationError::DuplicateHandler { action: B::ACTION });
        }

        let handler: SendHandler<B> = Arc::new(move |message| handler(message).boxed());
        self.sends.insert(
            B::ACTION,
            Box::new(TypedSendEntry {
                handler: Some(handler),
            }),
        );
        Ok(self)
    }

    pub fn build(
        self,
        local: NetworkingNodeId,
        policy: Arc<SignaturePolicy>,
        transport: Arc<dyn Transport>,
    ) -> IncomingAdapter {
        IncomingAdapter {
            local,
            policy,
            transport,
            requests: self.requests,
            sends: self.sends,
            events: EventHub::new("incoming"),
        }
    }
}

// ============================================================================
// Adapter
// ============================================================================

pub struct IncomingAdapter {
    local: NetworkingNodeId,
    policy: Arc<SignaturePolicy>,
    transport: Arc<dyn Transport>,
    requests: HashMap<&'static str, Box<dyn RequestEntry>>,
    sends: HashMap<&'static str, Box<dyn SendEntry>>,
    events: EventHub<IncomingEvent>,
}

impl IncomingAdapter {
    pub fn builder() -> IncomingAdapterBuilder {
        IncomingAdapterBuilder::new()
    }

    pub fn events(&self) -> &EventHub<IncomingEvent> {
        &self.events
    }

    /// Whether requests with this action have a dispatch entry
    pub fn accepts(&self, action: &str) -> bool {
        self.requests.contains_key(action)
    }

    /// Answer for `frame`, without sending it
    pub async fn process_request(&self, frame: &RequestFrame) -> Answer {
        let Some(entry) = self.requests.get(frame.action.as_str()) else {
            debug!("No dispatch entry for {}", frame.action);
            let error = ErrorFrame::for_request(
                frame,
                &self.local,
                ErrorCode::NotImplemented,
                format!("Unknown action {}", frame.action),
            );
            return Answer {
                frame: Frame::RequestError(error),
                result: None,
            };
        };

        match call_isolated(|| entry.process(&self.local, &self.policy, frame)).await {
            Ok((answer, result)) => Answer {
                frame: answer,
                result: Some(result),
            },
            Err(panic) => {
                error!("Processing {} request {} panicked: {}", frame.action, frame.request_id, panic);
                let error =
                    ErrorFrame::for_request(frame, &self.local, ErrorCode::InternalError, panic);
                Answer {
                    frame: Frame::RequestError(error),
                    result: None,
                }
            }
        }
    }

    /// Answer `frame` and send the answer back along the request's path
    pub async fn handle_request(&self, frame: RequestFrame) -> SentMessageResult {
        self.events
            .publish(&IncomingEvent::RequestReceived {
                action: frame.action.clone(),
                request_id: frame.request_id.clone(),
                network_path: frame.network_path.clone(),
            })
            .await;

        let answer = self.process_request(&frame).await;
        let sent = self.transport.send(&answer.frame).await;
        if !sent.is_success() {
            warn!("Answer to {} request {}: {}", frame.action, frame.request_id, sent);
        }

        // errors raised before a handler also report the result the
        // requester will see
        let result = match (answer.result, &answer.frame) {
            (Some(result), _) => result,
            (None, Frame::RequestError(error)) => {
                self.publish_error_sent(error, &sent).await;
                OcppResult::from_error_frame(error)
            }
            (None, _) => OcppResult::new(ResultCode::InternalError),
        };
        self.events
            .publish(&IncomingEvent::ResponseSent {
                action: frame.action,
                request_id: frame.request_id,
                result,
                sent: sent.clone(),
            })
            .await;
        sent
    }

    /// Answer a broken request with a FormatViolation error, when enough
    /// of it survived to correlate the answer
    pub async fn reject_unparseable(
        &self,
        broken: &CouldNotParse,
        peer: &NetworkingNodeId,
    ) -> Option<SentMessageResult> {
        let request_id = match (broken.message_type, &broken.request_id) {
            (Some(MessageType::Request), Some(request_id)) => request_id.clone(),
            _ => return None,
        };

        let error = ErrorFrame {
            destination: SourceRouting::to(peer.clone()),
            network_path: NetworkPath::from_node(self.local.clone()),
            request_id,
            error_code: ErrorCode::FormatViolation,
            error_description: broken.error.clone(),
            error_details: serde_json::Value::Object(serde_json::Map::new()),
        };
        let sent = self.transport.send(&Frame::RequestError(error.clone())).await;
        self.publish_error_sent(&error, &sent).await;
        Some(sent)
    }

    async fn publish_error_sent(&self, error: &ErrorFrame, sent: &SentMessageResult) {
        self.events
            .publish(&IncomingEvent::RequestErrorSent {
                request_id: error.request_id.clone(),
                error_code: error.error_code,
                description: error.error_description.clone(),
                sent: sent.clone(),
            })
            .await;
    }

    /// Hand a Send frame to its handler; returns whether it was handled
    pub async fn handle_send(&self, frame: SendFrame) -> bool {
        self.events
            .publish(&IncomingEvent::SendReceived {
                action: frame.action.clone(),
                network_path: frame.network_path.clone(),
            })
            .await;

        let Some(entry) = self.sends.get(frame.action.as_str()) else {
            warn!("Dropping {} message: no handler", frame.action);
            return false;
        };

        match call_isolated(|| entry.process(&self.policy, &frame)).await {
            Ok(handled) => handled,
            Err(panic) => {
                error!("Processing {} message panicked: {}", frame.action, panic);
                false
            }
        }
    }
}
