//! Outgoing adapter (OUT)
//!
//! Originates requests from this node and turns whatever comes back (or
//! does not) into a typed response. Callers always get exactly one
//! `OcppResponse`; protocol and transport failures show up in its result.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::cancel::CancellationSignal;
use crate::correlation::{CorrelationEngine, RequestOutcome};
use crate::events::{EventHub, OutgoingEvent};
use crate::frame::ResponseFrame;
use crate::messages::binary_data_transfer::BinaryDataTransferRequest;
use crate::messages::change_configuration::ChangeConfigurationRequest;
use crate::messages::data_transfer::DataTransferRequest;
use crate::messages::heartbeat::HeartbeatRequest;
use crate::messages::notify_periodic_event_stream::NotifyPeriodicEventStream;
use crate::messages::{
    OcppRequest, OcppResponse, OcppResult, OcppSend, RequestBody, RequestHeader, ResultCode,
    SendBody,
};
use crate::network::{NetworkPath, NetworkingNodeId, SourceRouting};
use crate::signature::SignaturePolicy;
use crate::transport::{SendOutcome, SentMessageResult, Transport};

pub struct OutgoingAdapter {
    local: NetworkingNodeId,
    policy: Arc<SignaturePolicy>,
    engine: Arc<CorrelationEngine>,
    transport: Arc<dyn Transport>,
    events: EventHub<OutgoingEvent>,
}

impl OutgoingAdapter {
    pub fn new(
        local: NetworkingNodeId,
        policy: Arc<SignaturePolicy>,
        engine: Arc<CorrelationEngine>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            local,
            policy,
            engine,
            transport,
            events: EventHub::new("outgoing"),
        }
    }

    pub fn events(&self) -> &EventHub<OutgoingEvent> {
        &self.events
    }

    pub fn engine(&self) -> &Arc<CorrelationEngine> {
        &self.engine
    }

    /// Sign, send and correlate `request`
    pub async fn send_request<B: RequestBody>(
        &self,
        mut request: OcppRequest<B>,
        cancel: &CancellationSignal,
    ) -> OcppResponse<B> {
        request.header.network_path = NetworkPath::from_node(self.local.clone());

        if let Err(e) = self.policy.sign_request(&mut request) {
            warn!("Cannot sign {} request {}: {}", B::ACTION, request.request_id(), e);
            return OcppResponse::signature_error(&request.header, e.to_string());
        }

        let frame = match request.to_request_frame() {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Cannot encode {} request {}: {}", B::ACTION, request.request_id(), e);
                return OcppResponse::format_violation(&request.header, e.to_string());
            }
        };

        self.events
            .publish(&OutgoingEvent::RequestSent {
                action: B::ACTION.to_string(),
                request_id: frame.request_id.clone(),
                destination: frame.destination.clone(),
            })
            .await;

        let header = &request.header;
        let state = self
            .engine
            .send_request_and_wait(frame, header.request_timeout, cancel)
            .await;

        let mut response = match state.outcome {
            RequestOutcome::Response(ref frame) => self.accept_response::<B>(header, frame),
            RequestOutcome::RequestError(ref error) | RequestOutcome::ResponseError(ref error) => {
                debug!(
                    "{} request {} failed remotely: {} {}",
                    B::ACTION,
                    header.request_id,
                    error.error_code,
                    error.error_description
                );
                OcppResponse::from_result(header, OcppResult::from_error_frame(error))
            }
            RequestOutcome::Timeout => OcppResponse::timeout(header),
            RequestOutcome::Canceled => OcppResponse::canceled(header),
            RequestOutcome::TransportFailure(ref reason) => {
                OcppResponse::network_error(header, reason.clone())
            }
            RequestOutcome::DuplicateRequestId => OcppResponse::from_result(
                header,
                OcppResult::with_description(
                    ResultCode::ProtocolError,
                    format!("Request id {} is already pending", header.request_id),
                ),
            ),
        };

        let runtime = state.runtime();
        response.header.runtime = Some(runtime);

        self.events
            .publish(&OutgoingEvent::ResponseReceived {
                action: B::ACTION.to_string(),
                request_id: header.request_id.clone(),
                result: response.result().clone(),
                runtime,
            })
            .await;
        response
    }

    fn accept_response<B: RequestBody>(
        &self,
        request: &RequestHeader,
        frame: &ResponseFrame,
    ) -> OcppResponse<B> {
        let response = match OcppResponse::<B>::try_parse(request, frame) {
            Ok(response) => response,
            Err(e) => {
                warn!("Malformed {} response {}: {}", B::ACTION, request.request_id, e);
                return OcppResponse::format_violation(request, e.to_string());
            }
        };

        if let Err(e) = self.policy.verify_response(&response) {
            warn!("Signature check failed for {} response {}: {}", B::ACTION, request.request_id, e);
            return OcppResponse::signature_error(request, e.to_string());
        }
        response
    }

    pub async fn change_configuration(
        &self,
        destination: SourceRouting,
        key: impl Into<String>,
        value: impl Into<String>,
        cancel: &CancellationSignal,
    ) -> OcppResponse<ChangeConfigurationRequest> {
        let request = OcppRequest::new(destination, ChangeConfigurationRequest::new(key, value));
        self.send_request(request, cancel).await
    }

    pub async fn heartbeat(
        &self,
        destination: SourceRouting,
        cancel: &CancellationSignal,
    ) -> OcppResponse<HeartbeatRequest> {
        self.send_request(OcppRequest::new(destination, HeartbeatRequest {}), cancel)
            .await
    }

    pub async fn data_transfer(
        &self,
        destination: SourceRouting,
        body: DataTransferRequest,
        cancel: &CancellationSignal,
    ) -> OcppResponse<DataTransferRequest> {
        self.send_request(OcppRequest::new(destination, body), cancel)
            .await
    }

    pub async fn binary_data_transfer(
        &self,
        destination: SourceRouting,
        body: BinaryDataTransferRequest,
        cancel: &CancellationSignal,
    ) -> OcppResponse<BinaryDataTransferRequest> {
        self.send_request(OcppRequest::new(destination, body), cancel)
            .await
    }

    /// Sign and transmit a fire-and-forget message
    pub async fn send_message<B: SendBody>(&self, mut message: OcppSend<B>) -> SentMessageResult {
        message.header.network_path = NetworkPath::from_node(self.local.clone());

        let sent = match self.policy.sign_send(&mut message) {
            Err(e) => SentMessageResult::failed(None, SendOutcome::NotSent(e.to_string())),
            Ok(()) => match message.to_frame() {
                Ok(frame) => self.transport.send(&frame).await,
                Err(e) => SentMessageResult::failed(None, SendOutcome::NotSent(e.to_string())),
            },
        };
        if !sent.is_success() {
            warn!("{} message to {}: {}", B::ACTION, message.header.destination, sent);
        }

        self.events
            .publish(&OutgoingEvent::SendSent {
                action: B::ACTION.to_string(),
                destination: message.header.destination.clone(),
                sent: sent.clone(),
            })
            .await;
        sent
    }

    pub async fn notify_periodic_event_stream(
        &self,
        destination: SourceRouting,
        body: NotifyPeriodicEventStream,
    ) -> SentMessageResult {
        self.send_message(OcppSend::new(destination, body)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::BoxError;
    use crate::frame::{ErrorCode, ErrorFrame, Frame, Payload, RequestId};
    use crate::messages::change_configuration::ConfigurationStatus;
    use crate::messages::notify_periodic_event_stream::StreamDataElement;
    use crate::signature::{KeyPair, VerificationRule};
    use crate::transport::testing::RecordingTransport;
    use std::time::Duration;

    fn id(s: &str) -> NetworkingNodeId {
        NetworkingNodeId::parse(s).unwrap()
    }

    struct Fixture {
        transport: Arc<RecordingTransport>,
        engine: Arc<CorrelationEngine>,
        outgoing: OutgoingAdapter,
    }

    fn fixture(transport: RecordingTransport) -> Fixture {
        let transport = Arc::new(transport);
        let engine = Arc::new(CorrelationEngine::new(transport.clone(), Duration::from_secs(5)));
        let outgoing = OutgoingAdapter::new(
            id("CSMS"),
            Arc::new(SignaturePolicy::new()),
            engine.clone(),
            transport.clone(),
        );
        Fixture {
            transport,
            engine,
            outgoing,
        }
    }

    fn change_configuration(request_id: &str) -> OcppRequest<ChangeConfigurationRequest> {
        OcppRequest::new(
            SourceRouting::to(id("CS001")),
            ChangeConfigurationRequest::new("HeartbeatInterval", "60"),
        )
        .with_request_id(request_id)
    }

    fn response(request_id: &str, payload: serde_json::Value) -> ResponseFrame {
        ResponseFrame {
            destination: SourceRouting::to(id("CSMS")),
            network_path: NetworkPath::from_node(id("CS001")),
            request_id: RequestId::from(request_id),
            payload: Payload::Json(payload),
        }
    }

    async fn pending(engine: &CorrelationEngine, request_id: &str) {
        let request_id = RequestId::from(request_id);
        while !engine.is_pending(&request_id) {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_response_is_correlated() {
        let f = fixture(RecordingTransport::new());

        let answer = async {
            pending(&f.engine, "out-1").await;
            f.engine
                .receive_response(response("out-1", serde_json::json!({"status": "Accepted"})))
        };
        let cancel = CancellationSignal::never();
        let (response, delivered) = tokio::join!(
            f.outgoing.send_request(change_configuration("out-1"), &cancel),
            answer
        );

        assert!(delivered);
        assert!(response.is_ok());
        assert_eq!(response.body.status, ConfigurationStatus::Accepted);
        assert!(response.header.runtime.is_some());
        assert_eq!(f.transport.frames()[0].network_path().as_slice(), &[id("CSMS")]);
        assert_eq!(f.engine.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_remote_error_mapped() {
        let f = fixture(RecordingTransport::new());

        let answer = async {
            pending(&f.engine, "out-2").await;
            f.engine.receive_request_error(ErrorFrame {
                destination: SourceRouting::to(id("CSMS")),
                network_path: NetworkPath::from_node(id("CS001")),
                request_id: RequestId::from("out-2"),
                error_code: ErrorCode::SecurityError,
                error_description: "untrusted key".to_string(),
                error_details: serde_json::json!({}),
            })
        };
        let cancel = CancellationSignal::never();
        let (response, _) = tokio::join!(
            f.outgoing.send_request(change_configuration("out-2"), &cancel),
            answer
        );

        assert_eq!(response.result().code, ResultCode::SignatureError);
        assert_eq!(response.result().description.as_deref(), Some("untrusted key"));
        assert_eq!(response.body.status, ConfigurationStatus::Rejected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout() {
        let f = fixture(RecordingTransport::new());
        let request = change_configuration("out-3").with_timeout(Duration::from_millis(50));

        let response = f
            .outgoing
            .send_request(request, &CancellationSignal::never())
            .await;

        assert_eq!(response.result().code, ResultCode::Timeout);
        assert!(response.header.runtime.unwrap() >= Duration::from_millis(50));
        assert!(!f.engine.is_pending(&RequestId::from("out-3")));
    }

    #[tokio::test]
    async fn test_transport_failure_and_cancel() {
        let f = fixture(RecordingTransport::with_outcome(SendOutcome::NoRoute));
        let response = f
            .outgoing
            .send_request(change_configuration("out-4"), &CancellationSignal::never())
            .await;
        assert_eq!(response.result().code, ResultCode::NetworkError);

        let f = fixture(RecordingTransport::new());
        let cancel = CancellationSignal::new();
        cancel.cancel();
        let response = f.outgoing.send_request(change_configuration("out-5"), &cancel).await;
        assert_eq!(response.result().code, ResultCode::Canceled);
        assert!(f.transport.frames().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_response() {
        let f = fixture(RecordingTransport::new());

        let answer = async {
            pending(&f.engine, "out-6").await;
            f.engine
                .receive_response(response("out-6", serde_json::json!({"status": "Maybe"})))
        };
        let cancel = CancellationSignal::never();
        let (response, _) = tokio::join!(
            f.outgoing.send_request(change_configuration("out-6"), &cancel),
            answer
        );

        assert_eq!(response.result().code, ResultCode::FormatViolation);
    }

    #[tokio::test]
    async fn test_unsigned_response_rejected_when_required() {
        let f = fixture(RecordingTransport::new());
        let policy = Arc::new(SignaturePolicy::new());
        policy.add_verification_rule(
            "ChangeConfigurationResponse",
            VerificationRule::trusting([KeyPair::generate().public_key()]).required(),
        );
        let outgoing = OutgoingAdapter::new(id("CSMS"), policy, f.engine.clone(), f.transport.clone());

        let answer = async {
            pending(&f.engine, "out-7").await;
            f.engine
                .receive_response(response("out-7", serde_json::json!({"status": "Accepted"})))
        };
        let cancel = CancellationSignal::never();
        let (response, _) = tokio::join!(
            outgoing.send_request(change_configuration("out-7"), &cancel),
            answer
        );

        assert_eq!(response.result().code, ResultCode::SignatureError);
        assert!(!response.result().description.as_deref().unwrap_or("").is_empty());
    }

    #[tokio::test]
    async fn test_send_message() {
        let f = fixture(RecordingTransport::new());
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        f.outgoing.events().subscribe(move |event| {
            let sink = sink.clone();
            async move {
                sink.lock().push(event);
                Ok::<(), BoxError>(())
            }
        });

        let sent = f
            .outgoing
            .notify_periodic_event_stream(
                SourceRouting::to(id("CS001")),
                NotifyPeriodicEventStream {
                    id: 3,
                    pending: 0,
                    base_time: chrono::Utc::now(),
                    data: vec![StreamDataElement {
                        t: 0.5,
                        v: "230.1".to_string(),
                    }],
                },
            )
            .await;

        assert!(sent.is_success());
        match &f.transport.frames()[0] {
            Frame::Send(frame) => {
                assert_eq!(frame.action, "NotifyPeriodicEventStream");
                assert_eq!(frame.network_path.as_slice(), &[id("CSMS")]);
            }
            other => panic!("Expected Send, got {:?}", other),
        }
        assert_eq!(f.engine.pending_count(), 0);
        assert!(matches!(
            seen.lock()[0],
            OutgoingEvent::SendSent { ref action, .. } if action == "NotifyPeriodicEventStream"
        ));
    }
}
