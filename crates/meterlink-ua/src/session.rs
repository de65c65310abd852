//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Session abstraction over the OPC UA transport."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
pub use opcua::types::NodeId;
use thiserror::Error;

/// One forward hierarchical reference returned by a browse.
#[derive(Debug, Clone, PartialEq)]
pub struct ChildRef {
    pub browse_name: String,
    pub node_id: NodeId,
}

impl ChildRef {
    pub fn new(browse_name: impl Into<String>, node_id: NodeId) -> Self {
        Self {
            browse_name: browse_name.into(),
            node_id,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SessionError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("browse of {node} failed: {reason}")]
    Browse { node: String, reason: String },
    #[error("write rejected: {0}")]
    Write(String),
    #[error("session closed")]
    Closed,
    #[error("invalid node id '{0}'")]
    InvalidNodeId(String),
}

/// Operations the bridge needs from one live server session.
#[async_trait]
pub trait UaSession: Send + Sync {
    /// Forward hierarchical children of `node`, following continuation points.
    async fn browse_children(&self, node: &NodeId) -> Result<Vec<ChildRef>, SessionError>;

    /// Write a double to the value attribute of `node`.
    async fn write_double(&self, node: &NodeId, value: f64) -> Result<(), SessionError>;

    /// Close the session. Safe to call on an already dead session.
    async fn disconnect(&self);

    /// False once the transport has dropped the session.
    fn is_alive(&self) -> bool;
}

/// Opens a fresh [`UaSession`] per call.
#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn UaSession>, SessionError>;

    fn endpoint(&self) -> &str;
}

/// Parse a node id in string notation, e.g. `ns=1;i=74000` or `ns=2;s=Machine`.
pub fn parse_node_id(text: &str) -> Result<NodeId, SessionError> {
    NodeId::from_str(text.trim()).map_err(|_| SessionError::InvalidNodeId(text.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_numeric_and_string_ids() {
        assert_eq!(parse_node_id("ns=1;i=74000").unwrap(), NodeId::new(1, 74000u32));
        assert_eq!(
            parse_node_id(" ns=2;s=Machine ").unwrap(),
            NodeId::new(2, "Machine")
        );
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(
            parse_node_id("machine-root"),
            Err(SessionError::InvalidNodeId("machine-root".to_owned()))
        );
    }
}
