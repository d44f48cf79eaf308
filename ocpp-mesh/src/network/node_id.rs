//! Networking node identifiers

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors when parsing a networking node identifier
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NodeIdError {
    #[error("networking node id must not be empty")]
    Empty,

    #[error("networking node id must not contain whitespace: {0:?}")]
    Whitespace(String),
}

/// Identifier of any OCPP endpoint: charging station, gateway or CSMS.
///
/// The empty identifier is the "zero" sentinel: no further hop, i.e. the
/// direct peer on the current connection. [`NetworkingNodeId::parse`] never
/// produces it; only the wire format and [`NetworkingNodeId::zero`] do.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NetworkingNodeId(String);

impl NetworkingNodeId {
    /// Parse a non-empty identifier (surrounding whitespace is trimmed)
    pub fn parse(text: &str) -> Result<Self, NodeIdError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(NodeIdError::Empty);
        }
        if trimmed.chars().any(char::is_whitespace) {
            return Err(NodeIdError::Whitespace(trimmed.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Identifier from a compile-time constant known to be valid
    pub(crate) fn new_unchecked(text: &str) -> Self {
        Self(text.to_string())
    }

    /// The "direct peer" sentinel
    pub fn zero() -> Self {
        Self(String::new())
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NetworkingNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_zero() {
            f.write_str("<direct>")
        } else {
            f.write_str(&self.0)
        }
    }
}

impl FromStr for NetworkingNodeId {
    type Err = NodeIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for NetworkingNodeId {
    type Error = NodeIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_empty() {
            return Ok(Self::zero());
        }
        Self::parse(&value)
    }
}

impl From<NetworkingNodeId> for String {
    fn from(id: NetworkingNodeId) -> Self {
        id.0
    }
}
