//! Forwarding adapter (FORWARD)
//!
//! Decides what happens to requests that pass through this node on their
//! way somewhere else. The node then either forwards the frame or sends the
//! synthetic answer carried by the decision.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tracing::{debug, error, warn};

use super::{call_isolated, RegistrationError};
use crate::config::ForwardingConfig;
use crate::events::{EventHub, ForwardingEvent};
use crate::frame::{ErrorCode, ErrorFrame, Frame, RequestFrame, SendFrame};
use crate::messages::binary_data_transfer::BinaryDataTransferRequest;
use crate::messages::change_configuration::ChangeConfigurationRequest;
use crate::messages::data_transfer::DataTransferRequest;
use crate::messages::heartbeat::HeartbeatRequest;
use crate::messages::{
    OcppRequest, OcppResponse, OcppResult, RequestBody, RequestHeader, ResultCode,
};
use crate::network::{NetworkingNodeId, SourceRouting};
use crate::signature::SignaturePolicy;

/// Reason attached to decisions taken without a filter
pub const DEFAULT_REASON: &str = "Default handler";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ForwardingVerdict {
    Forward,
    Reject,
}

/// What a filter decides for one request
#[derive(Debug, Clone)]
pub enum FilterResult<R> {
    Forward,
    /// Answer the requester instead of forwarding. Without a response the
    /// adapter builds a `Filtered` one.
    Reject { response: Option<R>, reason: String },
}

impl<R> FilterResult<R> {
    pub fn reject(reason: impl Into<String>) -> Self {
        FilterResult::Reject {
            response: None,
            reason: reason.into(),
        }
    }

    pub fn reject_with(response: R, reason: impl Into<String>) -> Self {
        FilterResult::Reject {
            response: Some(response),
            reason: reason.into(),
        }
    }
}

/// Outcome of filtering one request not addressed to this node
#[derive(Debug, Clone)]
pub struct ForwardingDecision {
    request: RequestFrame,
    verdict: ForwardingVerdict,
    synthetic: Option<Frame>,
    reason: String,
}

impl ForwardingDecision {
    fn forward(request: &RequestFrame, reason: impl Into<String>) -> Self {
        Self {
            request: request.clone(),
            verdict: ForwardingVerdict::Forward,
            synthetic: None,
            reason: reason.into(),
        }
    }

    fn reject(request: &RequestFrame, synthetic: Frame, reason: impl Into<String>) -> Self {
        Self {
            request: request.clone(),
            verdict: ForwardingVerdict::Reject,
            synthetic: Some(synthetic),
            reason: reason.into(),
        }
    }

    fn reject_with_error(
        request: &RequestFrame,
        local: &NetworkingNodeId,
        code: ErrorCode,
        reason: impl Into<String>,
    ) -> Self {
        let reason = reason.into();
        let error = ErrorFrame::for_request(request, local, code, reason.clone());
        Self::reject(request, Frame::RequestError(error), reason)
    }

    pub fn request(&self) -> &RequestFrame {
        &self.request
    }

    pub fn verdict(&self) -> ForwardingVerdict {
        self.verdict
    }

    /// Answer to send back to the requester; always present on Reject
    pub fn synthetic_response(&self) -> Option<&Frame> {
        self.synthetic.as_ref()
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn is_forward(&self) -> bool {
        self.verdict == ForwardingVerdict::Forward
    }
}

type Filter<B> =
    Arc<dyn Fn(OcppRequest<B>) -> BoxFuture<'static, FilterResult<OcppResponse<B>>> + Send + Sync>;

// ============================================================================
// Filter chains
// ============================================================================

struct FilterContext<'a> {
    local: &'a NetworkingNodeId,
    policy: &'a SignaturePolicy,
    default_result: ForwardingVerdict,
}

#[async_trait]
trait FilterChain: Any + Send + Sync {
    async fn decide(&self, ctx: &FilterContext<'_>, frame: &RequestFrame) -> ForwardingDecision;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

struct TypedFilterChain<B: RequestBody> {
    filters: Vec<Filter<B>>,
}

impl<B: RequestBody> TypedFilterChain<B> {
    /// Sign and address a synthetic answer to `frame`
    fn seal(ctx: &FilterContext<'_>, frame: &RequestFrame, response: OcppResponse<B>) -> Frame {
        let mut response = response.answered_by(ctx.local);
        response.header.request_id = frame.request_id.clone();
        response.header.destination = SourceRouting::return_to(&frame.network_path);

        if let Err(e) = ctx.policy.sign_response(&mut response) {
            error!("Cannot sign synthetic {} response: {}", B::ACTION, e);
            let error =
                ErrorFrame::for_request(frame, ctx.local, ErrorCode::InternalError, e.to_string());
            return Frame::RequestError(error);
        }

        response.to_frame().unwrap_or_else(|e| {
            error!("Cannot encode synthetic {} response: {}", B::ACTION, e);
            Frame::RequestError(ErrorFrame::for_request(
                frame,
                ctx.local,
                ErrorCode::InternalError,
                e.to_string(),
            ))
        })
    }
}

#[async_trait]
impl<B: RequestBody> FilterChain for TypedFilterChain<B> {
    async fn decide(&self, ctx: &FilterContext<'_>, frame: &RequestFrame) -> ForwardingDecision {
        let request = match OcppRequest::<B>::try_parse(frame) {
            Ok(request) => request,
            Err(e) => {
                return ForwardingDecision::reject_with_error(
                    frame,
                    ctx.local,
                    ErrorCode::FormatViolation,
                    format!("Malformed {} request: {}", B::ACTION, e),
                )
            }
        };

        // every filter sees the request; the first one decides
        let mut first = None;
        for filter in &self.filters {
            let result = match call_isolated(|| filter(request.clone())).await {
                Ok(result) => result,
                Err(panic) => {
                    error!("{} filter panicked: {}", B::ACTION, panic);
                    let response = OcppResponse::from_result(
                        &request.header,
                        OcppResult::with_description(ResultCode::ExceptionOccurred, panic.clone()),
                    );
                    FilterResult::reject_with(response, format!("Filter failed: {}", panic))
                }
            };
            if first.is_none() {
                first = Some(result);
            }
        }

        let (result, by_default) = match first {
            Some(result) => (result, false),
            None => match ctx.default_result {
                ForwardingVerdict::Forward => (FilterResult::Forward, true),
                ForwardingVerdict::Reject => (FilterResult::reject(DEFAULT_REASON), true),
            },
        };

        match result {
            FilterResult::Forward if by_default => ForwardingDecision::forward(frame, DEFAULT_REASON),
            FilterResult::Forward => ForwardingDecision::forward(frame, "Accepted by filter"),
            FilterResult::Reject { response, reason } => {
                let response = response.unwrap_or_else(|| {
                    OcppResponse::filtered(&RequestHeader::from_frame(frame), reason.clone())
                });
                ForwardingDecision::reject(frame, Self::seal(ctx, frame, response), reason)
            }
        }
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builds the FORWARD filter table
#[derive(Default)]
pub struct ForwardingAdapterBuilder {
    chains: HashMap<&'static str, Box<dyn FilterChain>>,
}

impl ForwardingAdapterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Know how to parse `B` so unfiltered rejections get a typed answer
    pub fn register<B: RequestBody>(mut self) -> Self {
        self.chains
            .entry(B::ACTION)
            .or_insert_with(|| Box::new(TypedFilterChain::<B> { filters: Vec::new() }));
        self
    }

    /// Register every bundled request type
    pub fn register_bundled(self) -> Self {
        self.register::<ChangeConfigurationRequest>()
            .register::<HeartbeatRequest>()
            .register::<DataTransferRequest>()
            .register::<BinaryDataTransferRequest>()
    }

    /// Append a filter to the chain of `B`
    pub fn filter<B, F, Fut>(mut self, filter: F) -> Result<Self, RegistrationError>
    where
        B: RequestBody,
        F: Fn(OcppRequest<B>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FilterResult<OcppResponse<B>>> + Send + 'static,
    {
        let filter: Filter<B> = Arc::new(move |request| filter(request).boxed());

        let chain = self
            .chains
            .entry(B::ACTION)
            .or_insert_with(|| Box::new(TypedFilterChain::<B> { filters: Vec::new() }));
        match chain.as_any_mut().downcast_mut::<TypedFilterChain<B>>() {
            Some(typed) => typed.filters.push(filter),
            None => return Err(RegistrationError::ActionConflict { action: B::ACTION }),
        }
        Ok(self)
    }

    pub fn build(
        self,
        local: NetworkingNodeId,
        policy: Arc<SignaturePolicy>,
        config: &ForwardingConfig,
    ) -> ForwardingAdapter {
        ForwardingAdapter {
            local,
            policy,
            default_result: config.default_result,
            chains: self.chains,
            events: EventHub::new("forwarding"),
        }
    }
}

// ============================================================================
// Adapter
// ============================================================================

pub struct ForwardingAdapter {
    local: NetworkingNodeId,
    policy: Arc<SignaturePolicy>,
    default_result: ForwardingVerdict,
    chains: HashMap<&'static str, Box<dyn FilterChain>>,
    events: EventHub<ForwardingEvent>,
}

impl ForwardingAdapter {
    pub fn builder() -> ForwardingAdapterBuilder {
        ForwardingAdapterBuilder::new()
    }

    pub fn events(&self) -> &EventHub<ForwardingEvent> {
        &self.events
    }

    pub fn default_result(&self) -> ForwardingVerdict {
        self.default_result
    }

    /// Decide on a request addressed to another node
    pub async fn process_request(&self, frame: &RequestFrame) -> ForwardingDecision {
        let ctx = FilterContext {
            local: &self.local,
            policy: &self.policy,
            default_result: self.default_result,
        };

        let decision = match self.chains.get(frame.action.as_str()) {
            Some(chain) => match call_isolated(|| chain.decide(&ctx, frame)).await {
                Ok(decision) => decision,
                Err(panic) => {
                    error!("Filtering {} request {} panicked: {}", frame.action, frame.request_id, panic);
                    ForwardingDecision::reject_with_error(
                        frame,
                        &self.local,
                        ErrorCode::InternalError,
                        panic,
                    )
                }
            },
            None => match self.default_result {
                ForwardingVerdict::Forward => ForwardingDecision::forward(frame, DEFAULT_REASON),
                ForwardingVerdict::Reject => ForwardingDecision::reject_with_error(
                    frame,
                    &self.local,
                    ErrorCode::NotImplemented,
                    DEFAULT_REASON,
                ),
            },
        };

        if decision.is_forward() {
            debug!("Forwarding {} request {} to {}", frame.action, frame.request_id, frame.destination);
        } else {
            warn!(
                "Rejected {} request {} to {}: {}",
                frame.action, frame.request_id, frame.destination, decision.reason
            );
        }

        self.events
            .publish(&ForwardingEvent::Filtered {
                action: frame.action.clone(),
                request_id: Some(frame.request_id.clone()),
                verdict: decision.verdict,
                reason: decision.reason.clone(),
            })
            .await;
        decision
    }

    /// Whether a Send frame addressed to another node may pass
    pub async fn forward_send(&self, frame: &SendFrame) -> bool {
        let verdict = self.default_result;
        if verdict == ForwardingVerdict::Reject {
            warn!("Dropping {} message to {}", frame.action, frame.destination);
        }

        self.events
            .publish(&ForwardingEvent::Filtered {
                action: frame.action.clone(),
                request_id: None,
                verdict,
                reason: DEFAULT_REASON.to_string(),
            })
            .await;
        verdict == ForwardingVerdict::Forward
    }
}
