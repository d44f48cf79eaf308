//! Multi-node scenarios over the in-memory mesh
//!
//! Topology used throughout:
//!
//! ```text
//! CSMS ◄──► GW1 ◄──► CS001
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ocpp_mesh::messages::binary_data_transfer::{
    BinaryDataTransferRequest, BinaryDataTransferResponse,
};
use ocpp_mesh::messages::change_configuration::{
    ChangeConfigurationRequest, ChangeConfigurationResponse, ConfigurationStatus,
};
use ocpp_mesh::messages::data_transfer::{
    DataTransferRequest, DataTransferResponse, DataTransferStatus,
};
use ocpp_mesh::messages::notify_periodic_event_stream::{
    NotifyPeriodicEventStream, StreamDataElement,
};
use ocpp_mesh::node::NetworkingNodeBuilder;
use ocpp_mesh::{
    BoxError, CancellationSignal, FilterResult, ForwardingAdapter, ForwardingEvent,
    ForwardingVerdict, IncomingAdapter, IncomingAdapterBuilder, KeyPair, MeshNetwork,
    NetworkPath, NetworkingNode, NetworkingNodeId, NodeConfig, OcppRequest, OcppSend, ResultCode,
    SignaturePolicy, SigningRule, SourceRouting, VerificationRule,
};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

fn id(s: &str) -> NetworkingNodeId {
    NetworkingNodeId::parse(s).unwrap()
}

fn station() -> SourceRouting {
    SourceRouting::to(id("CS001"))
}

struct Mesh {
    csms: Arc<NetworkingNode>,
    gateway: Arc<NetworkingNode>,
    station: Arc<NetworkingNode>,
    tasks: Vec<JoinHandle<()>>,
}

impl Drop for Mesh {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Join the three nodes, wire neighbors and routes, and start them
fn start(csms: NetworkingNodeBuilder, gateway: NetworkingNodeBuilder, station: NetworkingNodeBuilder) -> Mesh {
    let network = MeshNetwork::new();
    let (csms_transport, csms_inbox) = network.join_node(csms.config());
    let (gateway_transport, gateway_inbox) = network.join_node(gateway.config());
    let (station_transport, station_inbox) = network.join_node(station.config());
    MeshNetwork::link(&csms_transport, &gateway_transport);
    MeshNetwork::link(&gateway_transport, &station_transport);
    csms_transport.set_default_route(id("GW1"));
    station_transport.set_default_route(id("GW1"));

    let csms = Arc::new(csms.build(Arc::new(csms_transport)));
    let gateway = Arc::new(gateway.build(Arc::new(gateway_transport)));
    let station = Arc::new(station.build(Arc::new(station_transport)));

    let tasks = vec![
        csms.clone().spawn(csms_inbox),
        gateway.clone().spawn(gateway_inbox),
        station.clone().spawn(station_inbox),
    ];
    Mesh {
        csms,
        gateway,
        station,
        tasks,
    }
}

fn csms_builder() -> NetworkingNodeBuilder {
    NetworkingNode::builder(NodeConfig::new(id("CSMS")).with_request_timeout(Duration::from_secs(2)))
}

fn gateway_builder() -> NetworkingNodeBuilder {
    NetworkingNode::builder(NodeConfig::new(id("GW1")))
}

/// Station handlers; every ChangeConfiguration records the path it arrived on
fn station_handlers(paths: Arc<Mutex<Vec<NetworkPath>>>) -> IncomingAdapterBuilder {
    IncomingAdapter::builder()
        .on(move |req: OcppRequest<ChangeConfigurationRequest>| {
            paths.lock().push(req.header.network_path.clone());
            async { Ok(Some(ChangeConfigurationResponse::new(ConfigurationStatus::Accepted))) }
        })
        .unwrap()
        .on(|req: OcppRequest<DataTransferRequest>| async move {
            let delay = req
                .body
                .data
                .as_ref()
                .and_then(|data| data["delayMs"].as_u64())
                .unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok(Some(
                DataTransferResponse::new(DataTransferStatus::Accepted)
                    .with_data(req.body.data.unwrap_or_default()),
            ))
        })
        .unwrap()
        .on(|req: OcppRequest<BinaryDataTransferRequest>| async move {
            let mut data = req.body.data;
            data.reverse();
            Ok(Some(BinaryDataTransferResponse::new(DataTransferStatus::Accepted, data)))
        })
        .unwrap()
}

fn station_builder(paths: Arc<Mutex<Vec<NetworkPath>>>) -> NetworkingNodeBuilder {
    NetworkingNode::builder(NodeConfig::new(id("CS001"))).with_incoming(station_handlers(paths))
}

#[tokio::test]
async fn test_change_configuration_over_two_hops() {
    let paths = Arc::new(Mutex::new(Vec::new()));
    let mesh = start(csms_builder(), gateway_builder(), station_builder(paths.clone()));

    let response = mesh
        .csms
        .outgoing()
        .change_configuration(station(), "k", "v", &CancellationSignal::never())
        .await;

    assert!(response.is_ok(), "unexpected result {}", response.result());
    assert_eq!(response.body.status, ConfigurationStatus::Accepted);
    assert_eq!(response.header.network_path.as_slice(), &[id("CS001"), id("GW1")]);
    assert_eq!(paths.lock().as_slice(), &[[id("CSMS"), id("GW1")].into_iter().collect::<NetworkPath>()]);
    assert_eq!(mesh.csms.engine().pending_count(), 0);
}

#[tokio::test]
async fn test_gateway_rejects_by_default() {
    let paths = Arc::new(Mutex::new(Vec::new()));
    let gateway = NetworkingNode::builder(
        NodeConfig::new(id("GW1")).with_default_forwarding(ForwardingVerdict::Reject),
    );
    let mesh = start(csms_builder(), gateway, station_builder(paths.clone()));

    let decisions = Arc::new(Mutex::new(Vec::new()));
    let sink = decisions.clone();
    mesh.gateway.forwarding().events().subscribe(move |event| {
        let sink = sink.clone();
        async move {
            sink.lock().push(event);
            Ok::<(), BoxError>(())
        }
    });

    let response = mesh
        .csms
        .outgoing()
        .change_configuration(station(), "k", "v", &CancellationSignal::never())
        .await;

    // a filtered request still gets a well-formed, correlated answer
    assert!(response.is_ok(), "unexpected result {}", response.result());
    assert_eq!(response.body.status, ConfigurationStatus::Rejected);
    assert_eq!(response.header.network_path.as_slice(), &[id("GW1")]);
    assert!(paths.lock().is_empty());
    assert!(matches!(
        decisions.lock().as_slice(),
        [ForwardingEvent::Filtered { verdict: ForwardingVerdict::Reject, reason, .. }] if reason == "Default handler"
    ));
}

#[tokio::test]
async fn test_gateway_filter_answers_locally() {
    let paths = Arc::new(Mutex::new(Vec::new()));
    let forwarding = ForwardingAdapter::builder()
        .register_bundled()
        .filter(|req: OcppRequest<ChangeConfigurationRequest>| async move {
            if req.body.key == "SecurityProfile" {
                FilterResult::reject("security settings are managed by the gateway")
            } else {
                FilterResult::Forward
            }
        })
        .unwrap();
    let mesh = start(
        csms_builder(),
        gateway_builder().with_forwarding(forwarding),
        station_builder(paths.clone()),
    );

    let blocked = mesh
        .csms
        .outgoing()
        .change_configuration(station(), "SecurityProfile", "3", &CancellationSignal::never())
        .await;
    let allowed = mesh
        .csms
        .outgoing()
        .change_configuration(station(), "HeartbeatInterval", "60", &CancellationSignal::never())
        .await;

    assert_eq!(blocked.body.status, ConfigurationStatus::Rejected);
    assert_eq!(blocked.header.network_path.as_slice(), &[id("GW1")]);
    assert_eq!(allowed.body.status, ConfigurationStatus::Accepted);
    assert_eq!(paths.lock().len(), 1);
}

#[tokio::test]
async fn test_timeout_is_bounded() {
    let paths = Arc::new(Mutex::new(Vec::new()));
    let csms = NetworkingNode::builder(
        NodeConfig::new(id("CSMS")).with_request_timeout(Duration::from_millis(50)),
    );
    let mesh = start(csms, gateway_builder(), station_builder(paths));

    let started = Instant::now();
    let response = mesh
        .csms
        .outgoing()
        .data_transfer(
            station(),
            DataTransferRequest::new("org.example").with_data(serde_json::json!({"delayMs": 500})),
            &CancellationSignal::never(),
        )
        .await;

    assert_eq!(response.result().code, ResultCode::Timeout);
    assert!(started.elapsed() < Duration::from_millis(400));
    assert!(response.header.runtime.unwrap() >= Duration::from_millis(50));
    assert_eq!(mesh.csms.engine().pending_count(), 0);
}

#[tokio::test]
async fn test_cancel_while_waiting() {
    let paths = Arc::new(Mutex::new(Vec::new()));
    let mesh = start(csms_builder(), gateway_builder(), station_builder(paths));

    let cancel = CancellationSignal::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let response = mesh
        .csms
        .outgoing()
        .data_transfer(
            station(),
            DataTransferRequest::new("org.example").with_data(serde_json::json!({"delayMs": 500})),
            &cancel,
        )
        .await;

    assert_eq!(response.result().code, ResultCode::Canceled);
    assert_eq!(mesh.csms.engine().pending_count(), 0);
}

#[tokio::test]
async fn test_signed_exchange() {
    let csms_keys = Arc::new(KeyPair::generate());
    let station_keys = Arc::new(KeyPair::generate());

    let csms_policy = Arc::new(SignaturePolicy::new());
    csms_policy.add_signing_rule("ChangeConfigurationRequest", SigningRule::new(csms_keys.clone(), "CSMS"));
    csms_policy.add_verification_rule(
        "ChangeConfigurationResponse",
        VerificationRule::trusting([station_keys.public_key()]).required(),
    );

    let station_policy = Arc::new(SignaturePolicy::new());
    station_policy.add_signing_rule("*", SigningRule::new(station_keys, "CS001"));
    station_policy.add_verification_rule(
        "ChangeConfigurationRequest",
        VerificationRule::trusting([csms_keys.public_key()]).required(),
    );

    let paths = Arc::new(Mutex::new(Vec::new()));
    let mesh = start(
        csms_builder().with_policy(csms_policy),
        gateway_builder(),
        station_builder(paths.clone()).with_policy(station_policy.clone()),
    );

    let response = mesh
        .csms
        .outgoing()
        .change_configuration(station(), "k", "v", &CancellationSignal::never())
        .await;
    assert!(response.is_ok(), "unexpected result {}", response.result());
    assert_eq!(response.header.signatures.len(), 1);
    assert_eq!(response.header.signatures[0].signer_name, "CS001");

    // the station stops trusting the CSMS key
    station_policy.clear();
    station_policy.add_verification_rule(
        "ChangeConfigurationRequest",
        VerificationRule::trusting([KeyPair::generate().public_key()]).required(),
    );

    let rejected = mesh
        .csms
        .outgoing()
        .change_configuration(station(), "k", "w", &CancellationSignal::never())
        .await;
    assert_eq!(rejected.result().code, ResultCode::SignatureError);
    assert!(!rejected.result().description.as_deref().unwrap_or("").is_empty());
    assert_eq!(paths.lock().len(), 1);
}

#[tokio::test]
async fn test_binary_data_transfer() {
    let paths = Arc::new(Mutex::new(Vec::new()));
    let mesh = start(csms_builder(), gateway_builder(), station_builder(paths));

    let response = mesh
        .csms
        .outgoing()
        .binary_data_transfer(
            station(),
            BinaryDataTransferRequest::new("org.example", vec![1, 2, 3, 0xff]).with_message_id("m-1"),
            &CancellationSignal::never(),
        )
        .await;

    assert!(response.is_ok(), "unexpected result {}", response.result());
    assert_eq!(response.body.status, DataTransferStatus::Accepted);
    assert_eq!(response.body.data, vec![0xff, 3, 2, 1]);
}

#[tokio::test]
async fn test_send_reaches_csms() {
    let (tx, mut rx) = mpsc::channel(1);
    let csms_handlers = IncomingAdapter::builder()
        .on_send(move |message: OcppSend<NotifyPeriodicEventStream>| {
            let tx = tx.clone();
            async move {
                tx.send((message.body.id, message.header.network_path)).await?;
                Ok::<(), BoxError>(())
            }
        })
        .unwrap();

    let paths = Arc::new(Mutex::new(Vec::new()));
    let mesh = start(
        csms_builder().with_incoming(csms_handlers),
        gateway_builder(),
        station_builder(paths),
    );

    let sent = mesh
        .station
        .outgoing()
        .notify_periodic_event_stream(
            SourceRouting::to(id("CSMS")),
            NotifyPeriodicEventStream {
                id: 42,
                pending: 0,
                base_time: chrono::Utc::now(),
                data: vec![StreamDataElement { t: 0.0, v: "11.5".to_string() }],
            },
        )
        .await;
    assert!(sent.is_success());

    let (stream, path) = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stream, 42);
    assert_eq!(path.as_slice(), &[id("CS001"), id("GW1")]);
}

#[tokio::test]
async fn test_concurrent_requests_resolve_out_of_order() {
    let paths = Arc::new(Mutex::new(Vec::new()));
    let mesh = start(csms_builder(), gateway_builder(), station_builder(paths));

    let completed = Arc::new(AtomicUsize::new(0));
    let requests = (0..5u64).map(|i| {
        let csms = mesh.csms.clone();
        let completed = completed.clone();
        async move {
            // the first request is answered last
            let delay = (5 - i) * 20;
            let response = csms
                .outgoing()
                .data_transfer(
                    station(),
                    DataTransferRequest::new("org.example")
                        .with_data(serde_json::json!({"delayMs": delay, "seq": i})),
                    &CancellationSignal::never(),
                )
                .await;
            completed.fetch_add(1, Ordering::SeqCst);
            (i, response)
        }
    });

    for (i, response) in futures_util::future::join_all(requests).await {
        assert!(response.is_ok(), "request {} ended with {}", i, response.result());
        assert_eq!(response.body.data.unwrap()["seq"], serde_json::json!(i));
    }
    assert_eq!(completed.load(Ordering::SeqCst), 5);
    assert_eq!(mesh.csms.engine().pending_count(), 0);
}

#[tokio::test]
async fn test_unreachable_station_reported_by_gateway() {
    let paths = Arc::new(Mutex::new(Vec::new()));
    let mesh = start(csms_builder(), gateway_builder(), station_builder(paths));

    let response = mesh
        .csms
        .outgoing()
        .change_configuration(SourceRouting::to(id("CS999")), "k", "v", &CancellationSignal::never())
        .await;

    // the gateway has no route and answers with a GenericError
    assert_eq!(response.result().code, ResultCode::ProtocolError);
    assert!(response.result().description.as_deref().unwrap_or("").contains("CS999"));
}
