//! Configuration for a networking node
//!
//! Node identity, request timing and the forwarding default.

use std::time::Duration;

use crate::adapters::forward::ForwardingVerdict;
use crate::network::NetworkingNodeId;

/// Complete node configuration
#[derive(Debug, Clone)]
pub struct NodeConfig {
    // Node identity
    pub node_id: NetworkingNodeId,

    /// Default time to wait for a response
    pub request_timeout: Duration,

    // Forwarding settings
    pub forwarding: ForwardingConfig,

    /// Capacity of the node's inbound message queue
    pub inbox_capacity: usize,
}

/// Forwarding-specific configuration
#[derive(Debug, Clone)]
pub struct ForwardingConfig {
    /// Verdict for requests no filter decides on
    pub default_result: ForwardingVerdict,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: NetworkingNodeId::new_unchecked("ocpp-node"),
            request_timeout: Duration::from_secs(30),
            forwarding: ForwardingConfig::default(),
            inbox_capacity: 256,
        }
    }
}

impl Default for ForwardingConfig {
    fn default() -> Self {
        Self {
            default_result: ForwardingVerdict::Forward,
        }
    }
}

impl NodeConfig {
    /// Create config for the given node
    pub fn new(node_id: NetworkingNodeId) -> Self {
        Self {
            node_id,
            ..Default::default()
        }
    }

    /// Set default request timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set forwarding verdict for unfiltered requests
    pub fn with_default_forwarding(mut self, verdict: ForwardingVerdict) -> Self {
        self.forwarding.default_result = verdict;
        self
    }

    /// Set inbox capacity
    pub fn with_inbox_capacity(mut self, capacity: usize) -> Self {
        self.inbox_capacity = capacity.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = NodeConfig::new(NetworkingNodeId::parse("GW1").unwrap())
            .with_request_timeout(Duration::from_millis(50))
            .with_default_forwarding(ForwardingVerdict::Reject)
            .with_inbox_capacity(0);

        assert_eq!(config.node_id.as_str(), "GW1");
        assert_eq!(config.request_timeout, Duration::from_millis(50));
        assert_eq!(config.forwarding.default_result, ForwardingVerdict::Reject);
        assert_eq!(config.inbox_capacity, 1);
    }

    #[test]
    fn test_defaults() {
        let config = NodeConfig::default();
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.forwarding.default_result, ForwardingVerdict::Forward);
        assert_eq!(config.inbox_capacity, 256);
    }
}
