//! Source routing: where a frame is headed

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{NetworkPath, NetworkingNodeId};

/// Routing directive over one or more nodes.
///
/// The last hop is the final destination. A route never encodes transport
/// details; the transport maps the next hop onto a connection. The route is
/// never empty: an empty list decodes as the zero route, meaning "the direct
/// peer on this connection".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Vec<NetworkingNodeId>", into = "Vec<NetworkingNodeId>")]
pub struct SourceRouting(Vec<NetworkingNodeId>);

impl SourceRouting {
    /// Unicast to a single destination
    pub fn to(destination: NetworkingNodeId) -> Self {
        Self(vec![destination])
    }

    /// Explicit route through the given hops; the last one is the destination
    pub fn through(hops: impl IntoIterator<Item = NetworkingNodeId>) -> Self {
        hops.into_iter().collect::<Vec<_>>().into()
    }

    pub fn zero() -> Self {
        Self(vec![NetworkingNodeId::zero()])
    }

    /// Route back to the originator of a message that travelled `path`.
    ///
    /// The reversed path: the most recent hop first, the originator last.
    pub fn return_to(path: &NetworkPath) -> Self {
        Self::through(path.iter().rev().cloned())
    }

    pub fn is_zero(&self) -> bool {
        self.0.len() == 1 && self.0[0].is_zero()
    }

    /// The final destination
    pub fn destination(&self) -> &NetworkingNodeId {
        // non-empty by construction
        &self.0[self.0.len() - 1]
    }

    /// Whether a frame carrying this route is addressed to `local`
    pub fn is_for(&self, local: &NetworkingNodeId) -> bool {
        self.is_zero() || self.destination() == local
    }

    /// The hop that follows `local` on this route, or the first hop when
    /// `local` is not part of it
    pub fn next_hop_after(&self, local: &NetworkingNodeId) -> &NetworkingNodeId {
        match self.0.iter().position(|hop| hop == local) {
            Some(i) if i + 1 < self.0.len() => &self.0[i + 1],
            Some(_) => self.destination(),
            None => &self.0[0],
        }
    }

    pub fn hops(&self) -> &[NetworkingNodeId] {
        &self.0
    }
}

impl From<Vec<NetworkingNodeId>> for SourceRouting {
    fn from(hops: Vec<NetworkingNodeId>) -> Self {
        if hops.is_empty() {
            Self::zero()
        } else {
            Self(hops)
        }
    }
}

impl From<SourceRouting> for Vec<NetworkingNodeId> {
    fn from(routing: SourceRouting) -> Self {
        routing.0
    }
}

impl fmt::Display for SourceRouting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, hop) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" => ")?;
            }
            write!(f, "{}", hop)?;
        }
        Ok(())
    }
}
