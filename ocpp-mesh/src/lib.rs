//! # OCPP Mesh
//!
//! Message-exchange core of an OCPP networking node: the piece that turns
//! wire frames into typed requests, answers or forwards them, and matches
//! responses to the requests this node sent.
//!
//! ## Architecture
//!
//! ```text
//!   CSMS ◄──────────► Gateway ◄──────────► Charging station
//!                        │
//! ┌──────────────────────┴──────────────────────────┐
//! │  NetworkingNode                                 │
//! │  ┌──────┐  ┌──────┐  ┌─────────┐  ┌───────────┐ │
//! │  │  IN  │  │ OUT  │  │ FORWARD │  │ Signature │ │
//! │  └──┬───┘  └──┬───┘  └────┬────┘  │  Policy   │ │
//! │     │         │           │       └───────────┘ │
//! │     │   ┌─────┴──────┐    │                     │
//! │     │   │Correlation │    │                     │
//! │     │   │  Engine    │    │                     │
//! │     │   └─────┬──────┘    │                     │
//! └─────┴─────────┴───────────┴─────────────────────┘
//!                 │ Transport (frames ⇄ wire)
//! ```
//!
//! ## Frames
//!
//! | Kind          | Id | Correlated by |
//! |---------------|----|---------------|
//! | Request       | 2  | request id    |
//! | Response      | 3  | request id    |
//! | RequestError  | 4  | request id    |
//! | ResponseError | 5  | request id    |
//! | Send          | 6  | (none)        |
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use ocpp_mesh::{
//!     CancellationSignal, MeshNetwork, NetworkingNode, NetworkingNodeId, NodeConfig,
//!     SourceRouting,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mesh = MeshNetwork::new();
//!     let csms_id = NetworkingNodeId::parse("CSMS")?;
//!     let (transport, inbox) = mesh.join(csms_id.clone(), 256);
//!     transport.connect(NetworkingNodeId::parse("CS001")?);
//!
//!     let csms = Arc::new(NetworkingNode::builder(NodeConfig::new(csms_id)).build(Arc::new(transport)));
//!     csms.clone().spawn(inbox);
//!
//!     let response = csms
//!         .outgoing()
//!         .change_configuration(
//!             SourceRouting::to(NetworkingNodeId::parse("CS001")?),
//!             "HeartbeatInterval",
//!             "60",
//!             &CancellationSignal::never(),
//!         )
//!         .await;
//!     println!("{}", response.result());
//!     Ok(())
//! }
//! ```

pub mod adapters;
pub mod cancel;
pub mod config;
pub mod correlation;
pub mod events;
pub mod frame;
pub mod messages;
pub mod network;
pub mod node;
pub mod signature;
pub mod transport;

pub use adapters::{
    FilterResult, ForwardingAdapter, ForwardingAdapterBuilder, ForwardingDecision,
    ForwardingVerdict, IncomingAdapter, IncomingAdapterBuilder, OutgoingAdapter,
    RegistrationError,
};
pub use cancel::CancellationSignal;
pub use config::{ForwardingConfig, NodeConfig};
pub use correlation::{CorrelationEngine, RequestOutcome, SendRequestState};
pub use events::{BoxError, EventHub, ForwardingEvent, IncomingEvent, OutgoingEvent};
pub use frame::{CouldNotParse, ErrorCode, Frame, FrameError, MessageType, RequestId, WireMessage};
pub use messages::{OcppRequest, OcppResponse, OcppResult, OcppSend, ResultCode};
pub use network::{NetworkPath, NetworkingNodeId, SourceRouting};
pub use node::{NetworkingNode, NetworkingNodeBuilder};
pub use signature::{KeyPair, PublicKey, SignaturePolicy, SigningRule, VerificationRule};
pub use transport::{InboundMessage, MeshNetwork, MeshTransport, SentMessageResult, Transport};
