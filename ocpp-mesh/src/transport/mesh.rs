//! In-memory mesh transport over tokio channels

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::debug;

use super::{InboundMessage, SendOutcome, SentMessageResult, Transport};
use crate::config::NodeConfig;
use crate::frame::Frame;
use crate::network::NetworkingNodeId;

/// Registry of node inboxes shared by every [`MeshTransport`]
#[derive(Clone, Default)]
pub struct MeshNetwork {
    inboxes: Arc<RwLock<HashMap<NetworkingNodeId, mpsc::Sender<InboundMessage>>>>,
}

impl MeshNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a node; returns its transport and inbox
    pub fn join(
        &self,
        id: NetworkingNodeId,
        capacity: usize,
    ) -> (MeshTransport, mpsc::Receiver<InboundMessage>) {
        let (tx, rx) = mpsc::channel(capacity);
        self.inboxes.write().insert(id.clone(), tx);
        debug!("{} joined the mesh", id);

        let transport = MeshTransport {
            local: id,
            network: self.clone(),
            neighbors: RwLock::new(HashSet::new()),
            routes: RwLock::new(HashMap::new()),
            default_route: RwLock::new(None),
        };
        (transport, rx)
    }

    /// Attach the node described by `config`, with its configured inbox
    /// capacity
    pub fn join_node(&self, config: &NodeConfig) -> (MeshTransport, mpsc::Receiver<InboundMessage>) {
        self.join(config.node_id.clone(), config.inbox_capacity)
    }

    /// Detach a node; frames addressed to it fail with a transport error
    pub fn leave(&self, id: &NetworkingNodeId) {
        self.inboxes.write().remove(id);
    }

    /// Connect two nodes in both directions
    pub fn link(a: &MeshTransport, b: &MeshTransport) {
        a.connect(b.local_id().clone());
        b.connect(a.local_id().clone());
    }

    fn inbox(&self, id: &NetworkingNodeId) -> Option<mpsc::Sender<InboundMessage>> {
        self.inboxes.read().get(id).cloned()
    }
}

/// One node's view of the mesh: direct neighbors plus static routes
pub struct MeshTransport {
    local: NetworkingNodeId,
    network: MeshNetwork,
    neighbors: RwLock<HashSet<NetworkingNodeId>>,
    /// destination -> neighbor to hand frames to
    routes: RwLock<HashMap<NetworkingNodeId, NetworkingNodeId>>,
    default_route: RwLock<Option<NetworkingNodeId>>,
}

impl MeshTransport {
    pub fn local_id(&self) -> &NetworkingNodeId {
        &self.local
    }

    pub fn connect(&self, peer: NetworkingNodeId) {
        self.neighbors.write().insert(peer);
    }

    pub fn disconnect(&self, peer: &NetworkingNodeId) {
        self.neighbors.write().remove(peer);
    }

    /// Reach `destination` through the neighbor `via`
    pub fn add_route(&self, destination: NetworkingNodeId, via: NetworkingNodeId) {
        self.routes.write().insert(destination, via);
    }

    /// Neighbor used when nothing else matches
    pub fn set_default_route(&self, via: NetworkingNodeId) {
        *self.default_route.write() = Some(via);
    }

    /// Neighbor that should carry a frame headed for `frame`'s destination
    pub fn next_hop(&self, frame: &Frame) -> Option<NetworkingNodeId> {
        let destination = frame.destination();
        if destination.is_zero() {
            return None;
        }

        let hop = destination.next_hop_after(&self.local);
        if *hop == self.local {
            return None;
        }
        if self.neighbors.read().contains(hop) {
            return Some(hop.clone());
        }

        let routes = self.routes.read();
        routes
            .get(hop)
            .or_else(|| routes.get(destination.destination()))
            .cloned()
            .or_else(|| self.default_route.read().clone())
    }
}

#[async_trait]
impl Transport for MeshTransport {
    async fn send(&self, frame: &Frame) -> SentMessageResult {
        let Some(hop) = self.next_hop(frame) else {
            debug!(
                "{}: no route to {} for {:?}",
                self.local,
                frame.destination(),
                frame.message_type()
            );
            return SentMessageResult::no_route();
        };

        let message = match frame.encode() {
            Ok(message) => message,
            Err(e) => {
                return SentMessageResult::failed(Some(hop), SendOutcome::NotSent(e.to_string()))
            }
        };

        let Some(inbox) = self.network.inbox(&hop) else {
            return SentMessageResult::failed(
                Some(hop.clone()),
                SendOutcome::TransportError(format!("{} is not on the mesh", hop)),
            );
        };

        debug!(
            "{} -> {}: {:?} ({} bytes)",
            self.local,
            hop,
            frame.message_type(),
            message.len()
        );

        let inbound = InboundMessage {
            from: self.local.clone(),
            message,
        };
        match inbox.send(inbound).await {
            Ok(()) => SentMessageResult::success(hop),
            Err(_) => SentMessageResult::failed(
                Some(hop.clone()),
                SendOutcome::TransportError(format!("inbox of {} is closed", hop)),
            ),
        }
    }
}
