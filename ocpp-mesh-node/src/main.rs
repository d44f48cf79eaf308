//! OCPP Mesh Node - CLI demonstrating multi-hop OCPP exchanges
//!
//! Wires three networking nodes over the in-memory mesh and runs request
//! scenarios from the CSMS through the gateway to the charging station.
//!
//! # Usage
//!
//! ```bash
//! # Run every scenario
//! ocpp-mesh-node
//!
//! # Signed ChangeConfiguration with a custom key/value
//! ocpp-mesh-node --scenario change-configuration --sign --key MeterValueSampleInterval --value 30
//!
//! # Gateway rejects everything it has no filter for
//! ocpp-mesh-node --reject-by-default
//! ```
//!
//! # Topology
//!
//! ```text
//! CSMS ◄──► GW1 ◄──► CS001
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use ocpp_mesh::messages::binary_data_transfer::{
    BinaryDataTransferRequest, BinaryDataTransferResponse,
};
use ocpp_mesh::messages::change_configuration::{
    ChangeConfigurationRequest, ChangeConfigurationResponse, ConfigurationStatus,
};
use ocpp_mesh::messages::data_transfer::{
    DataTransferRequest, DataTransferResponse, DataTransferStatus,
};
use ocpp_mesh::messages::heartbeat::{HeartbeatRequest, HeartbeatResponse};
use ocpp_mesh::messages::notify_periodic_event_stream::{
    NotifyPeriodicEventStream, StreamDataElement,
};
use ocpp_mesh::{
    BoxError, CancellationSignal, FilterResult, ForwardingAdapter, ForwardingVerdict,
    IncomingAdapter, KeyPair, MeshNetwork, NetworkingNode, NetworkingNodeId, NodeConfig,
    OcppRequest, OcppSend, SignaturePolicy, SigningRule, SourceRouting, VerificationRule,
};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Vendor id whose DataTransfer requests the station answers too late
const SLOW_VENDOR: &str = "org.example.slow";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Scenario {
    All,
    ChangeConfiguration,
    Filtered,
    Timeout,
    Binary,
}

/// OCPP networking node demonstration
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Request timeout on the CSMS in milliseconds
    #[arg(long, default_value = "1000")]
    timeout_ms: u64,

    /// Capacity of each node's inbound message queue
    #[arg(long, default_value = "256")]
    inbox_capacity: usize,

    /// Gateway rejects requests no filter accepts
    #[arg(long)]
    reject_by_default: bool,

    /// Sign requests and responses, and require signatures on the station
    #[arg(long)]
    sign: bool,

    /// Configuration key to change
    #[arg(short, long, default_value = "HeartbeatInterval")]
    key: String,

    /// New configuration value
    #[arg(short, long, default_value = "60")]
    value: String,

    /// Scenario to run
    #[arg(long, value_enum, default_value = "all")]
    scenario: Scenario,
}

/// CSMS, gateway and station joined on one mesh
struct Demo {
    csms: Arc<NetworkingNode>,
    station: Arc<NetworkingNode>,
    station_config: Arc<Mutex<HashMap<String, String>>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Demo {
    fn start(args: &Args, filter_gateway: bool) -> Result<Self, Box<dyn std::error::Error>> {
        let csms_id = NetworkingNodeId::parse("CSMS")?;
        let gateway_id = NetworkingNodeId::parse("GW1")?;
        let station_id = NetworkingNodeId::parse("CS001")?;
        let timeout = Duration::from_millis(args.timeout_ms);

        let gateway_default = if args.reject_by_default {
            ForwardingVerdict::Reject
        } else {
            ForwardingVerdict::Forward
        };
        let csms_node = NodeConfig::new(csms_id)
            .with_request_timeout(timeout)
            .with_inbox_capacity(args.inbox_capacity);
        let gateway_node = NodeConfig::new(gateway_id.clone())
            .with_default_forwarding(gateway_default)
            .with_inbox_capacity(args.inbox_capacity);
        let station_node = NodeConfig::new(station_id.clone()).with_inbox_capacity(args.inbox_capacity);

        let mesh = MeshNetwork::new();
        let (csms_transport, csms_inbox) = mesh.join_node(&csms_node);
        let (gateway_transport, gateway_inbox) = mesh.join_node(&gateway_node);
        let (station_transport, station_inbox) = mesh.join_node(&station_node);
        MeshNetwork::link(&csms_transport, &gateway_transport);
        MeshNetwork::link(&gateway_transport, &station_transport);
        csms_transport.add_route(station_id, gateway_id.clone());
        station_transport.set_default_route(gateway_id);

        // Signatures
        let csms_policy = Arc::new(SignaturePolicy::new());
        let gateway_policy = Arc::new(SignaturePolicy::new());
        let station_policy = Arc::new(SignaturePolicy::new());
        if args.sign {
            let csms_keys = Arc::new(KeyPair::generate());
            let gateway_keys = Arc::new(KeyPair::generate());
            let station_keys = Arc::new(KeyPair::generate());

            csms_policy.add_signing_rule("*", SigningRule::new(csms_keys.clone(), "CSMS"));
            // synthetic answers from the gateway are signed by the gateway
            csms_policy.add_verification_rule(
                "*",
                VerificationRule::trusting([station_keys.public_key(), gateway_keys.public_key()])
                    .required(),
            );
            gateway_policy.add_signing_rule("*", SigningRule::new(gateway_keys, "GW1"));
            station_policy.add_signing_rule("*", SigningRule::new(station_keys, "CS001"));
            station_policy.add_verification_rule(
                "*",
                VerificationRule::trusting([csms_keys.public_key()]).required(),
            );
            info!("Signing enabled: CSMS key {}", csms_keys.public_key().to_base64());
        }

        // CSMS: collects monitoring streams
        let csms_incoming = IncomingAdapter::builder().on_send(
            |message: OcppSend<NotifyPeriodicEventStream>| async move {
                info!(
                    "CSMS received {} samples on stream {}",
                    message.body.data.len(),
                    message.body.id
                );
                Ok::<(), BoxError>(())
            },
        )?;
        let csms = NetworkingNode::builder(csms_node)
            .with_policy(csms_policy)
            .with_incoming(csms_incoming)
            .build(Arc::new(csms_transport));

        // Gateway: forwards, or filters ChangeConfiguration
        let mut forwarding = ForwardingAdapter::builder().register_bundled();
        if filter_gateway {
            forwarding = forwarding.filter(|req: OcppRequest<ChangeConfigurationRequest>| async move {
                FilterResult::reject(format!(
                    "Gateway blocks configuration change of {}",
                    req.body.key
                ))
            })?;
        }
        let gateway = NetworkingNode::builder(gateway_node)
            .with_policy(gateway_policy)
            .with_forwarding(forwarding)
            .build(Arc::new(gateway_transport));

        // Station: answers configuration and data transfer requests
        let station_config = Arc::new(Mutex::new(HashMap::new()));
        let store = station_config.clone();
        let station_incoming = IncomingAdapter::builder()
            .on(move |req: OcppRequest<ChangeConfigurationRequest>| {
                let store = store.clone();
                async move {
                    info!("CS001 sets {} = {}", req.body.key, req.body.value);
                    store.lock().insert(req.body.key, req.body.value);
                    Ok(Some(ChangeConfigurationResponse::new(
                        ConfigurationStatus::Accepted,
                    )))
                }
            })?
            .on(|_req: OcppRequest<HeartbeatRequest>| async {
                Ok(Some(HeartbeatResponse::now()))
            })?
            .on(move |req: OcppRequest<DataTransferRequest>| async move {
                if req.body.vendor_id == SLOW_VENDOR {
                    tokio::time::sleep(timeout * 2).await;
                }
                Ok(Some(
                    DataTransferResponse::new(DataTransferStatus::Accepted)
                        .with_data(serde_json::json!({ "echo": req.body.data })),
                ))
            })?
            .on(|req: OcppRequest<BinaryDataTransferRequest>| async move {
                let mut data = req.body.data;
                data.reverse();
                Ok(Some(BinaryDataTransferResponse::new(
                    DataTransferStatus::Accepted,
                    data,
                )))
            })?;
        let station = NetworkingNode::builder(station_node)
            .with_policy(station_policy)
            .with_incoming(station_incoming)
            .build(Arc::new(station_transport));

        let csms = Arc::new(csms);
        let station = Arc::new(station);
        let tasks = vec![
            csms.clone().spawn(csms_inbox),
            Arc::new(gateway).spawn(gateway_inbox),
            station.clone().spawn(station_inbox),
        ];

        Ok(Self {
            csms,
            station,
            station_config,
            tasks,
        })
    }

    fn station_route(&self) -> SourceRouting {
        SourceRouting::to(self.station.id().clone())
    }

    fn stop(self) {
        for task in self.tasks {
            task.abort();
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Setup logging
    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Print banner
    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║              OCPP Mesh Node - Multi-hop Exchange             ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  Topology: {:<50} ║", "CSMS <-> GW1 <-> CS001");
    println!("║  Scenario: {:<50} ║", format!("{:?}", args.scenario));
    println!("║  Timeout:  {:<50} ║", format!("{} ms", args.timeout_ms));
    println!("║  Signing:  {:<50} ║", if args.sign { "on" } else { "off" });
    println!("║  Gateway:  {:<50} ║", if args.reject_by_default { "reject by default" } else { "forward by default" });
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();

    let run = |scenario: Scenario| args.scenario == Scenario::All || args.scenario == scenario;

    if run(Scenario::ChangeConfiguration) {
        change_configuration(&args).await?;
    }
    if run(Scenario::Filtered) {
        filtered(&args).await?;
    }
    if run(Scenario::Timeout) {
        timeout(&args).await?;
    }
    if run(Scenario::Binary) {
        binary(&args).await?;
    }

    Ok(())
}

async fn change_configuration(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    info!("--- ChangeConfiguration {} = {} ---", args.key, args.value);
    let demo = Demo::start(args, false)?;

    let response = demo
        .csms
        .outgoing()
        .change_configuration(
            demo.station_route(),
            args.key.as_str(),
            args.value.as_str(),
            &CancellationSignal::never(),
        )
        .await;
    info!(
        "Result: {} status={:?} runtime={:?}",
        response.result(),
        response.body.status,
        response.header.runtime.unwrap_or_default()
    );
    info!("CS001 configuration: {:?}", demo.station_config.lock());

    let heartbeat = demo
        .csms
        .outgoing()
        .heartbeat(demo.station_route(), &CancellationSignal::never())
        .await;
    info!("Heartbeat: {} at {}", heartbeat.result(), heartbeat.body.current_time);

    let sent = demo
        .station
        .outgoing()
        .notify_periodic_event_stream(
            SourceRouting::to(demo.csms.id().clone()),
            NotifyPeriodicEventStream {
                id: 1,
                pending: 0,
                base_time: chrono::Utc::now(),
                data: vec![
                    StreamDataElement { t: 0.0, v: "229.8".to_string() },
                    StreamDataElement { t: 1.0, v: "230.4".to_string() },
                ],
            },
        )
        .await;
    info!("NotifyPeriodicEventStream: {}", sent);

    // let the stream reach the CSMS before the mesh goes away
    tokio::time::sleep(Duration::from_millis(50)).await;
    demo.stop();
    Ok(())
}

async fn filtered(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    info!("--- Filtered at gateway ---");
    let demo = Demo::start(args, true)?;

    let response = demo
        .csms
        .outgoing()
        .change_configuration(
            demo.station_route(),
            args.key.as_str(),
            args.value.as_str(),
            &CancellationSignal::never(),
        )
        .await;
    info!("Result: {} status={:?}", response.result(), response.body.status);
    if !demo.station_config.lock().is_empty() {
        warn!("Filtered request reached the station");
    }

    demo.stop();
    Ok(())
}

async fn timeout(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    info!("--- Timeout after {} ms ---", args.timeout_ms);
    let demo = Demo::start(args, false)?;

    let response = demo
        .csms
        .outgoing()
        .data_transfer(
            demo.station_route(),
            DataTransferRequest::new(SLOW_VENDOR).with_data(serde_json::json!({"slow": true})),
            &CancellationSignal::never(),
        )
        .await;
    info!(
        "Result: {} runtime={:?} pending={}",
        response.result(),
        response.header.runtime.unwrap_or_default(),
        demo.csms.engine().pending_count()
    );

    demo.stop();
    Ok(())
}

async fn binary(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    info!("--- BinaryDataTransfer ---");
    let demo = Demo::start(args, false)?;

    let payload = b"firmware-chunk-0001".to_vec();
    let response = demo
        .csms
        .outgoing()
        .binary_data_transfer(
            demo.station_route(),
            BinaryDataTransferRequest::new("org.example.firmware", payload.clone())
                .with_message_id("chunk-1"),
            &CancellationSignal::never(),
        )
        .await;
    info!(
        "Result: {} status={:?} sent {} bytes, received {} bytes",
        response.result(),
        response.body.status,
        payload.len(),
        response.body.data.len()
    );

    demo.stop();
    Ok(())
}
