//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "OPC UA side of the bridge."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! OPC UA side of the bridge: a narrow session trait, browse-path resolution
//! of the target variables, and itemised value writes. The `client` module
//! implements the session on top of async-opcua.

pub mod client;
pub mod resolver;
pub mod session;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod writer;

pub use client::{OpcUaConnector, OpcUaSession};
pub use resolver::{NodeResolver, ResolutionError, ResolvedNodes};
pub use session::{parse_node_id, ChildRef, NodeId, SessionConnector, SessionError, UaSession};
pub use writer::{ValueWriter, WriteFailure, WriteOutcome, WriteResult};
