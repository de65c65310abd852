//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared configuration and logging setup for the bridge."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Shared primitives for the meterlink workspace.
//! This crate exposes configuration loading and tracing initialisation
//! consumed by the daemon and the bridge crates.

pub mod config;
pub mod logging;

pub use config::{
    ApplicationConfig, BridgeConfig, LoadedBridgeConfig, LoggingConfig, MetricsConfig,
    OpcUaConfig, PzemConfig, ScalesConfig, TimingConfig, VARIABLE_COUNT,
};
pub use logging::{filter_directives, init_tracing, LogFormat};
