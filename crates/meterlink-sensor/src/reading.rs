//! ---
//! ems_section: "02-device-io"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Immutable sensor reading value."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fmt;

use chrono::{DateTime, Utc};

/// Provenance of a [`Reading`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadingStatus {
    /// Decoded from a device response.
    Ok,
    /// Synthesised by the simulated source.
    Sim,
    /// No usable data; the reason is kept for logging.
    Error(String),
}

impl fmt::Display for ReadingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadingStatus::Ok => f.write_str("OK"),
            ReadingStatus::Sim => f.write_str("SIM"),
            ReadingStatus::Error(reason) => write!(f, "ERROR: {reason}"),
        }
    }
}

/// One of the four quantities written to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Measurement {
    Voltage,
    Current,
    Power,
    Energy,
}

impl Measurement {
    /// Positional order used when pairing with configured variable names.
    pub const ALL: [Measurement; 4] = [
        Measurement::Voltage,
        Measurement::Current,
        Measurement::Power,
        Measurement::Energy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Measurement::Voltage => "voltage",
            Measurement::Current => "current",
            Measurement::Power => "power",
            Measurement::Energy => "energy",
        }
    }
}

/// A single poll of the meter.
///
/// Units: volts, amperes, watts, watt-hours, hertz, and a unitless power factor.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub voltage: f64,
    pub current: f64,
    pub power: f64,
    pub energy: f64,
    pub frequency: f64,
    pub power_factor: f64,
    pub status: ReadingStatus,
    pub captured_at: DateTime<Utc>,
}

impl Reading {
    /// Zeroed reading carrying an error reason.
    pub fn error(reason: impl Into<String>) -> Self {
        Self {
            voltage: 0.0,
            current: 0.0,
            power: 0.0,
            energy: 0.0,
            frequency: 0.0,
            power_factor: 0.0,
            status: ReadingStatus::Error(reason.into()),
            captured_at: Utc::now(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.status, ReadingStatus::Error(_))
    }

    pub fn value(&self, measurement: Measurement) -> f64 {
        match measurement {
            Measurement::Voltage => self.voltage,
            Measurement::Current => self.current,
            Measurement::Power => self.power,
            Measurement::Energy => self.energy,
        }
    }
}
