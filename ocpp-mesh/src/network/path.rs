//! Hop trail recorded on a frame as it crosses the mesh

use std::fmt;

use serde::{Deserialize, Serialize};

use super::NetworkingNodeId;

/// Ordered list of the nodes a message has traversed.
///
/// The first element is the originator. Paths are values: every hop builds
/// a new path with [`NetworkPath::append`], nothing edits one in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NetworkPath(Vec<NetworkingNodeId>);

impl NetworkPath {
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Path that starts at `origin`
    pub fn from_node(origin: NetworkingNodeId) -> Self {
        Self(vec![origin])
    }

    /// New path with `hop` appended; `self` is left untouched
    pub fn append(&self, hop: NetworkingNodeId) -> Self {
        let mut hops = Vec::with_capacity(self.0.len() + 1);
        hops.extend(self.0.iter().cloned());
        hops.push(hop);
        Self(hops)
    }

    /// The originator of the message
    pub fn source(&self) -> Option<&NetworkingNodeId> {
        self.0.first()
    }

    /// The most recent hop
    pub fn last(&self) -> Option<&NetworkingNodeId> {
        self.0.last()
    }

    pub fn contains(&self, id: &NetworkingNodeId) -> bool {
        self.0.contains(id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &NetworkingNodeId> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[NetworkingNodeId] {
        &self.0
    }
}

impl FromIterator<NetworkingNodeId> for NetworkPath {
    fn from_iter<T: IntoIterator<Item = NetworkingNodeId>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for NetworkPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("[]");
        }
        for (i, hop) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" -> ")?;
            }
            write!(f, "{}", hop)?;
        }
        Ok(())
    }
}
