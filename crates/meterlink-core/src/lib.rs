//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Bridge controller crate root."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! The bridge state machine: connect with a bounded retry budget, resolve the
//! target variables once per session, then write scaled readings on a fixed
//! cadence until cancelled.

pub mod controller;
pub mod error;
pub mod retry;
pub mod scaling;
pub mod state;

pub use controller::BridgeController;
pub use error::{BridgeError, Result};
pub use retry::RetryPolicy;
pub use scaling::{ScalingFactors, VariableMap};
pub use state::BridgeState;
