//! Networking node
//!
//! Routes every parsed frame to exactly one place:
//!
//! ```text
//!                 wire message
//!                      │ parse
//!                      ▼
//!     ┌──────────── addressed here? ────────────┐
//!     │ yes                                     │ no
//!     ▼                                         ▼
//!  Request  ──► IN (handlers)              Request ──► FORWARD ──► forward / synthetic answer
//!  Response ──► Correlation Engine         Response, errors ──► append hop, forward
//!  Error    ──► Correlation Engine         Send ──► FORWARD send policy
//!  Send     ──► IN (send handlers)
//! ```

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::adapters::{
    ForwardingAdapter, ForwardingAdapterBuilder, IncomingAdapter, IncomingAdapterBuilder,
    OutgoingAdapter,
};
use crate::cancel::CancellationSignal;
use crate::config::NodeConfig;
use crate::correlation::CorrelationEngine;
use crate::frame::{ErrorCode, ErrorFrame, Frame, RequestFrame};
use crate::messages::{OcppRequest, OcppResponse, RequestBody};
use crate::network::NetworkingNodeId;
use crate::signature::SignaturePolicy;
use crate::transport::{InboundMessage, Transport};

/// One OCPP endpoint: charging station, gateway or CSMS
pub struct NetworkingNode {
    config: NodeConfig,
    policy: Arc<SignaturePolicy>,
    transport: Arc<dyn Transport>,
    engine: Arc<CorrelationEngine>,
    incoming: IncomingAdapter,
    outgoing: OutgoingAdapter,
    forwarding: ForwardingAdapter,
}

pub struct NetworkingNodeBuilder {
    config: NodeConfig,
    policy: Arc<SignaturePolicy>,
    incoming: IncomingAdapterBuilder,
    forwarding: ForwardingAdapterBuilder,
}

impl NetworkingNodeBuilder {
    pub fn new(config: NodeConfig) -> Self {
        Self {
            config,
            policy: Arc::new(SignaturePolicy::new()),
            incoming: IncomingAdapterBuilder::new(),
            forwarding: ForwardingAdapterBuilder::new().register_bundled(),
        }
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Share a signature policy (defaults to an empty one)
    pub fn with_policy(mut self, policy: Arc<SignaturePolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Set request and send handlers
    pub fn with_incoming(mut self, incoming: IncomingAdapterBuilder) -> Self {
        self.incoming = incoming;
        self
    }

    /// Set forwarding filters; replaces the bundled registrations
    pub fn with_forwarding(mut self, forwarding: ForwardingAdapterBuilder) -> Self {
        self.forwarding = forwarding;
        self
    }

    pub fn build(self, transport: Arc<dyn Transport>) -> NetworkingNode {
        let local = self.config.node_id.clone();
        let engine = Arc::new(CorrelationEngine::new(
            transport.clone(),
            self.config.request_timeout,
        ));

        let incoming = self
            .incoming
            .build(local.clone(), self.policy.clone(), transport.clone());
        let outgoing = OutgoingAdapter::new(
            local.clone(),
            self.policy.clone(),
            engine.clone(),
            transport.clone(),
        );
        let forwarding = self
            .forwarding
            .build(local, self.policy.clone(), &self.config.forwarding);

        NetworkingNode {
            config: self.config,
            policy: self.policy,
            transport,
            engine,
            incoming,
            outgoing,
            forwarding,
        }
    }
}

impl NetworkingNode {
    pub fn builder(config: NodeConfig) -> NetworkingNodeBuilder {
        NetworkingNodeBuilder::new(config)
    }

    pub fn id(&self) -> &NetworkingNodeId {
        &self.config.node_id
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn policy(&self) -> &Arc<SignaturePolicy> {
        &self.policy
    }

    pub fn engine(&self) -> &Arc<CorrelationEngine> {
        &self.engine
    }

    pub fn incoming(&self) -> &IncomingAdapter {
        &self.incoming
    }

    pub fn outgoing(&self) -> &OutgoingAdapter {
        &self.outgoing
    }

    pub fn forwarding(&self) -> &ForwardingAdapter {
        &self.forwarding
    }

    /// Originate a request from this node
    pub async fn send_request<B: RequestBody>(
        &self,
        request: OcppRequest<B>,
        cancel: &CancellationSignal,
    ) -> OcppResponse<B> {
        self.outgoing.send_request(request, cancel).await
    }

    /// Handle one message received from a directly connected peer
    pub async fn process_wire_message(&self, inbound: InboundMessage) {
        let local = self.id();

        let frame = match Frame::parse(&inbound.message) {
            Ok(frame) => frame,
            Err(broken) => {
                if self
                    .incoming
                    .reject_unparseable(&broken, &inbound.from)
                    .await
                    .is_none()
                {
                    warn!("{}: dropping message from {}: {}", local, inbound.from, broken);
                }
                return;
            }
        };

        let frame = frame.assume_direct_peer(&inbound.from, local);
        debug!(
            "{}: {:?} from {} for {}",
            local,
            frame.message_type(),
            inbound.from,
            frame.destination()
        );

        if !frame.destination().is_for(local) {
            match frame {
                Frame::Request(request) => self.forward_request(request).await,
                Frame::Send(send) => {
                    if self.forwarding.forward_send(&send).await {
                        self.relay(Frame::Send(send)).await;
                    }
                }
                other => self.relay(other).await,
            }
            return;
        }

        match frame {
            Frame::Request(request) => {
                self.incoming.handle_request(request).await;
            }
            Frame::Response(response) => {
                self.engine.receive_response(response);
            }
            Frame::RequestError(error) => {
                self.engine.receive_request_error(error);
            }
            Frame::ResponseError(error) => {
                self.engine.receive_response_error(error);
            }
            Frame::Send(send) => {
                self.incoming.handle_send(send).await;
            }
        }
    }

    async fn forward_request(&self, request: RequestFrame) {
        if request.network_path.contains(self.id()) {
            warn!(
                "{}: {} request {} already passed here ({}), not forwarding",
                self.id(),
                request.action,
                request.request_id,
                request.network_path
            );
            let description = format!("Routing loop at {}", self.id());
            self.answer_with_error(&request, description).await;
            return;
        }

        let decision = self.forwarding.process_request(&request).await;

        if let Some(answer) = decision.synthetic_response() {
            let sent = self.transport.send(answer).await;
            if !sent.is_success() {
                warn!("{}: answer to rejected {}: {}", self.id(), request.request_id, sent);
            }
            return;
        }

        let sent = self
            .transport
            .send(&Frame::Request(request.clone()).forwarded_by(self.id()))
            .await;
        if sent.is_success() {
            return;
        }

        warn!("{}: cannot forward {} to {}: {}", self.id(), request.request_id, request.destination, sent);
        let description = format!("Cannot forward to {}: {}", request.destination, sent);
        self.answer_with_error(&request, description).await;
    }

    /// Send a GenericError back to the originator of `request`
    async fn answer_with_error(&self, request: &RequestFrame, description: String) {
        let error = ErrorFrame::for_request(request, self.id(), ErrorCode::GenericError, description);
        let sent = self.transport.send(&Frame::RequestError(error)).await;
        if !sent.is_success() {
            warn!("{}: error answer for {} was not delivered: {}", self.id(), request.request_id, sent);
        }
    }

    async fn relay(&self, frame: Frame) {
        let sent = self.transport.send(&frame.forwarded_by(self.id())).await;
        if !sent.is_success() {
            warn!("{}: cannot relay frame: {}", self.id(), sent);
        }
    }

    /// Process inbound messages until the inbox closes; each message runs on
    /// its own task so slow handlers never hold up other exchanges
    pub async fn run(self: Arc<Self>, mut inbox: mpsc::Receiver<InboundMessage>) {
        info!("{}: node running", self.id());
        while let Some(message) = inbox.recv().await {
            let node = self.clone();
            tokio::spawn(async move {
                node.process_wire_message(message).await;
            });
        }
        info!("{}: inbox closed", self.id());
    }

    pub fn spawn(self: Arc<Self>, inbox: mpsc::Receiver<InboundMessage>) -> JoinHandle<()> {
        tokio::spawn(self.run(inbox))
    }
}
