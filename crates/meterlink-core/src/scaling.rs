//! ---
//! ems_section: "08-energy-models-optimization"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Unit scaling and variable payload construction."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::HashSet;

use indexmap::IndexMap;
use meterlink_common::{ScalesConfig, VARIABLE_COUNT};
use meterlink_sensor::{Measurement, Reading};

use crate::error::BridgeError;

/// Per-quantity multipliers applied before writing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScalingFactors {
    pub voltage: f64,
    pub current: f64,
    pub power: f64,
    pub energy: f64,
}

impl Default for ScalingFactors {
    fn default() -> Self {
        Self {
            voltage: 1.0,
            current: 1.0,
            power: 1.0,
            energy: 1.0,
        }
    }
}

impl From<&ScalesConfig> for ScalingFactors {
    fn from(config: &ScalesConfig) -> Self {
        Self {
            voltage: config.voltage_scale,
            current: config.current_scale,
            power: config.power_scale,
            energy: config.energy_scale,
        }
    }
}

impl ScalingFactors {
    pub fn factor(&self, measurement: Measurement) -> f64 {
        match measurement {
            Measurement::Voltage => self.voltage,
            Measurement::Current => self.current,
            Measurement::Power => self.power,
            Measurement::Energy => self.energy,
        }
    }

    pub fn apply(&self, reading: &Reading, measurement: Measurement) -> f64 {
        reading.value(measurement) * self.factor(measurement)
    }
}

/// Configured variable names paired by position with voltage, current,
/// power, and energy.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableMap {
    entries: Vec<(String, Measurement)>,
}

impl VariableMap {
    pub fn positional(variables: &[String]) -> Result<Self, BridgeError> {
        if variables.len() != VARIABLE_COUNT {
            return Err(BridgeError::Mapping(format!(
                "expected {} variable names, got {}",
                VARIABLE_COUNT,
                variables.len()
            )));
        }
        let mut seen = HashSet::with_capacity(VARIABLE_COUNT);
        for name in variables {
            if name.trim().is_empty() {
                return Err(BridgeError::Mapping(
                    "variable names must not be empty".to_owned(),
                ));
            }
            if !seen.insert(name.as_str()) {
                return Err(BridgeError::Mapping(format!(
                    "variable '{}' is mapped more than once",
                    name
                )));
            }
        }
        Ok(Self {
            entries: variables
                .iter()
                .cloned()
                .zip(Measurement::ALL)
                .collect(),
        })
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|(name, _)| name.clone()).collect()
    }

    /// Scaled values keyed by variable name, in configured order.
    pub fn payload(&self, reading: &Reading, scales: &ScalingFactors) -> IndexMap<String, f64> {
        self.entries
            .iter()
            .map(|(name, measurement)| (name.clone(), scales.apply(reading, *measurement)))
            .collect()
    }
}

/// Render the values as written, e.g. `V=230.000, E=2.000`.
pub fn snapshot(payload: &IndexMap<String, f64>) -> String {
    payload
        .iter()
        .map(|(name, value)| format!("{}={:.3}", name, value))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use meterlink_sensor::ReadingStatus;

    use super::*;

    fn reading() -> Reading {
        Reading {
            voltage: 230.0,
            current: 0.5,
            power: 115.0,
            energy: 2000.0,
            frequency: 50.0,
            power_factor: 1.0,
            status: ReadingStatus::Ok,
            ..Reading::error("")
        }
    }

    #[test]
    fn payload_is_positional_and_scaled() {
        let names: Vec<String> = ["V", "I", "P", "E"].iter().map(|s| s.to_string()).collect();
        let map = VariableMap::positional(&names).unwrap();
        let scales = ScalingFactors {
            energy: 0.001,
            ..ScalingFactors::default()
        };
        let payload = map.payload(&reading(), &scales);
        assert_eq!(payload.keys().cloned().collect::<Vec<_>>(), names);
        assert_eq!(payload["V"], 230.0);
        assert_eq!(payload["I"], 0.5);
        assert_eq!(payload["P"], 115.0);
        assert!((payload["E"] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn snapshot_shows_scaled_values() {
        let names: Vec<String> = ["V", "I", "P", "E"].iter().map(|s| s.to_string()).collect();
        let map = VariableMap::positional(&names).unwrap();
        let scales = ScalingFactors {
            energy: 0.001,
            ..ScalingFactors::default()
        };
        let line = snapshot(&map.payload(&reading(), &scales));
        assert_eq!(line, "V=230.000, I=0.500, P=115.000, E=2.000");
    }

    #[test]
    fn wrong_length_is_rejected() {
        let names = vec!["V".to_owned(), "I".to_owned()];
        assert!(VariableMap::positional(&names).is_err());
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let names: Vec<String> = ["V", "V", "P", "E"].iter().map(|s| s.to_string()).collect();
        match VariableMap::positional(&names) {
            Err(BridgeError::Mapping(message)) => assert!(message.contains("'V'")),
            other => panic!("expected mapping error, got {:?}", other),
        }
    }

    #[test]
    fn empty_names_are_rejected() {
        let names: Vec<String> = ["V", " ", "P", "E"].iter().map(|s| s.to_string()).collect();
        assert!(matches!(
            VariableMap::positional(&names),
            Err(BridgeError::Mapping(_))
        ));
    }
}
