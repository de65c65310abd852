//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Errors that end the bridge loop."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use meterlink_ua::SessionError;
use thiserror::Error;

/// Terminal failures of [`crate::BridgeController`]. Everything else is
/// logged and absorbed by the loop.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("no usable session after {attempts} attempts: {last_error}")]
    ConnectExhausted { attempts: u32, last_error: String },
    #[error("machine root node id: {0}")]
    InvalidRootNode(#[source] SessionError),
    #[error("variable mapping: {0}")]
    Mapping(String),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
