//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Deterministic synthetic meter for bench testing."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::reading::{Reading, ReadingStatus};
use crate::source::SensorSource;

pub const NOMINAL_VOLTAGE: f64 = 229.0;
pub const VOLTAGE_SWING: f64 = 0.5;
pub const NOMINAL_CURRENT: f64 = 0.150;
pub const CURRENT_SWING: f64 = 0.010;

/// Synthetic meter: voltage flips every read, current every third read, and
/// energy accumulates `power * interval` in watt-hours.
#[derive(Debug, Clone)]
pub struct SimulatedSensor {
    tick: u64,
    energy: f64,
    interval: Duration,
}

impl SimulatedSensor {
    pub fn new(interval: Duration) -> Self {
        Self {
            tick: 0,
            energy: 0.0,
            interval,
        }
    }

    fn next_reading(&mut self) -> Reading {
        let voltage = NOMINAL_VOLTAGE + VOLTAGE_SWING * alternate(self.tick);
        let current = NOMINAL_CURRENT + CURRENT_SWING * alternate(self.tick / 3);
        let power = voltage * current;
        self.energy += power * self.interval.as_secs_f64() / 3600.0;
        self.tick = self.tick.wrapping_add(1);

        Reading {
            voltage,
            current,
            power,
            energy: self.energy,
            frequency: 50.0,
            power_factor: 1.0,
            status: ReadingStatus::Sim,
            captured_at: Utc::now(),
        }
    }
}

fn alternate(step: u64) -> f64 {
    if step % 2 == 0 {
        1.0
    } else {
        -1.0
    }
}

#[async_trait]
impl SensorSource for SimulatedSensor {
    async fn read(&mut self) -> Reading {
        self.next_reading()
    }

    fn describe(&self) -> &str {
        "simulate"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oscillates_within_band() {
        let mut sensor = SimulatedSensor::new(Duration::from_secs(5));
        let voltages: Vec<f64> = (0..6).map(|_| sensor.next_reading().voltage).collect();
        assert_eq!(voltages, vec![229.5, 228.5, 229.5, 228.5, 229.5, 228.5]);
    }

    #[test]
    fn current_flips_every_third_read() {
        let mut sensor = SimulatedSensor::new(Duration::from_secs(5));
        let currents: Vec<f64> = (0..6).map(|_| sensor.next_reading().current).collect();
        assert!(currents[..3].iter().all(|c| (c - 0.160).abs() < 1e-9));
        assert!(currents[3..].iter().all(|c| (c - 0.140).abs() < 1e-9));
    }

    #[test]
    fn energy_accumulates() {
        let mut sensor = SimulatedSensor::new(Duration::from_secs(3600));
        let first = sensor.next_reading();
        assert!((first.energy - first.power).abs() < 1e-9);
        let second = sensor.next_reading();
        assert!(second.energy > first.energy);
        assert_eq!(second.status, ReadingStatus::Sim);
    }

    #[test]
    fn energy_restarts_from_zero_per_instance() {
        // Simulated energy is a local integral, not the meter's lifetime
        // counter; switching modes makes the written total jump.
        let mut warmed = SimulatedSensor::new(Duration::from_secs(3600));
        for _ in 0..10 {
            warmed.next_reading();
        }
        let fresh = SimulatedSensor::new(Duration::from_secs(3600)).next_reading();
        assert!(warmed.next_reading().energy > 5.0 * fresh.energy);
        assert!(fresh.energy < 40.0);
    }
}
