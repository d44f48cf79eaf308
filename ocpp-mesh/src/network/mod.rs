//! Network addressing
//!
//! - `node_id`: identifiers of protocol endpoints
//! - `path`: the hop trail a frame records while crossing the mesh
//! - `routing`: destination directives, including return routes derived
//!   from an inbound path

pub mod node_id;
pub mod path;
pub mod routing;

pub use node_id::{NetworkingNodeId, NodeIdError};
pub use path::NetworkPath;
pub use routing::SourceRouting;
