//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Structured lifecycle events for the bridge."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Lifecycle logging for the bridge: a small context carrier plus a fixed
//! vocabulary of connection events, emitted as structured tracing events.

use tracing::Level;
use tracing_subscriber::{fmt as subscriber_fmt, prelude::*, EnvFilter, Registry};

pub mod macros;

/// Initialize a baseline tracing subscriber suitable for tests and tools.
pub fn init() {
    let _ = Registry::default()
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(subscriber_fmt::layer().with_test_writer())
        .try_init();
}

/// Structured logging context attached to lifecycle events.
#[derive(Debug, Default, Clone)]
pub struct LogContext<'a> {
    /// Server endpoint URL.
    pub endpoint: Option<&'a str>,
    /// Serial device path, or `simulate`.
    pub device: Option<&'a str>,
    /// Connection attempt number (1-based).
    pub attempt: Option<u32>,
    /// Sampling cycle counter.
    pub cycle: Option<u64>,
}

impl<'a> LogContext<'a> {
    /// Create an empty logging context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach the server endpoint.
    pub fn with_endpoint(mut self, endpoint: &'a str) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    /// Attach the sensor device.
    pub fn with_device(mut self, device: &'a str) -> Self {
        self.device = Some(device);
        self
    }

    /// Attach a connection attempt number.
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    /// Attach a sampling cycle counter.
    pub fn with_cycle(mut self, cycle: u64) -> Self {
        self.cycle = Some(cycle);
        self
    }
}

/// Connection lifecycle milestones reported by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// A session attempt is starting.
    Connecting,
    /// Session established and nodes resolved.
    Connected,
    /// Browse-path resolution failed for a fresh session.
    ResolutionFailed,
    /// At least one variable write failed in a cycle.
    WriteFailed,
    /// The transport reported the session as gone.
    SessionLost,
    /// Every connection attempt failed.
    RetryExhausted,
    /// The session was closed.
    Disconnected,
}

impl LifecycleEvent {
    /// Stable event name used as the `event` field.
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleEvent::Connecting => "bridge.connecting",
            LifecycleEvent::Connected => "bridge.connected",
            LifecycleEvent::ResolutionFailed => "bridge.resolution_failed",
            LifecycleEvent::WriteFailed => "bridge.write_failed",
            LifecycleEvent::SessionLost => "bridge.session_lost",
            LifecycleEvent::RetryExhausted => "bridge.retry_exhausted",
            LifecycleEvent::Disconnected => "bridge.disconnected",
        }
    }
}

/// High-level outcome used when emitting lifecycle log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemEventOutcome {
    /// The operation completed successfully.
    Success,
    /// The operation failed or was aborted.
    Fault,
}

impl SystemEventOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            SystemEventOutcome::Success => "success",
            SystemEventOutcome::Fault => "fault",
        }
    }
}

/// Emit a lifecycle event with a success/fault outcome.
///
/// Successes log at `INFO`, faults at `WARN`; the controller decides on
/// escalation separately.
pub fn log_lifecycle_event(
    context: Option<&LogContext>,
    event: LifecycleEvent,
    message: &str,
    outcome: SystemEventOutcome,
) {
    let default_ctx = LogContext::default();
    let ctx = context.unwrap_or(&default_ctx);
    match outcome {
        SystemEventOutcome::Success => tracing::event!(
            Level::INFO,
            event = event.as_str(),
            outcome = outcome.as_str(),
            endpoint = ctx.endpoint.unwrap_or(""),
            device = ctx.device.unwrap_or(""),
            attempt = ctx.attempt.unwrap_or_default(),
            cycle = ctx.cycle.unwrap_or_default(),
            message = %message
        ),
        SystemEventOutcome::Fault => tracing::event!(
            Level::WARN,
            event = event.as_str(),
            outcome = outcome.as_str(),
            endpoint = ctx.endpoint.unwrap_or(""),
            device = ctx.device.unwrap_or(""),
            attempt = ctx.attempt.unwrap_or_default(),
            cycle = ctx.cycle.unwrap_or_default(),
            message = %message
        ),
    }
}
