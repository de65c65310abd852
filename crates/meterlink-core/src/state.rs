//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Observable bridge lifecycle state."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fmt;

/// Where the controller currently is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BridgeState {
    #[default]
    Disconnected,
    /// Opening a session; `attempt` counts from 1 within the current budget.
    Connecting { attempt: u32 },
    Resolving,
    Sampling,
    Stopped,
}

impl BridgeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BridgeState::Disconnected => "disconnected",
            BridgeState::Connecting { .. } => "connecting",
            BridgeState::Resolving => "resolving",
            BridgeState::Sampling => "sampling",
            BridgeState::Stopped => "stopped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BridgeState::Stopped)
    }
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeState::Connecting { attempt } => write!(f, "connecting (attempt {attempt})"),
            other => f.write_str(other.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_attempt() {
        assert_eq!(
            BridgeState::Connecting { attempt: 2 }.to_string(),
            "connecting (attempt 2)"
        );
        assert_eq!(BridgeState::Sampling.to_string(), "sampling");
        assert!(BridgeState::Stopped.is_terminal());
        assert!(!BridgeState::default().is_terminal());
    }
}
