//! ---
//! ems_section: "02-device-io"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Sensor source abstraction and the serial PZEM reader."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::time::Duration;

use async_trait::async_trait;
use meterlink_common::PzemConfig;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::Instant;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, trace};

use crate::frame::{self, DecodeError, FRAME_LEN, READ_COMMAND};
use crate::reading::Reading;
use crate::simulate::SimulatedSensor;

/// Anything that can produce one [`Reading`] on demand.
///
/// Implementations never fail: faults are folded into an error-status reading.
#[async_trait]
pub trait SensorSource: Send {
    async fn read(&mut self) -> Reading;

    /// Short label for logs (device path or `simulate`).
    fn describe(&self) -> &str;
}

#[derive(Debug, Error)]
pub enum SensorError {
    #[error("serial error: {0}")]
    Serial(#[from] tokio_serial::Error),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no response")]
    NoResponse,
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// PZEM meter on a serial line. The port is opened and closed for every read.
#[derive(Debug, Clone)]
pub struct SerialSensor {
    device: String,
    baudrate: u32,
    timeout: Duration,
    read_delay: Duration,
}

impl SerialSensor {
    pub fn new(
        device: impl Into<String>,
        baudrate: u32,
        timeout: Duration,
        read_delay: Duration,
    ) -> Self {
        Self {
            device: device.into(),
            baudrate,
            timeout,
            read_delay,
        }
    }

    pub fn from_config(config: &PzemConfig) -> Self {
        Self::new(
            config.device.clone(),
            config.baudrate,
            config.timeout,
            config.read_delay,
        )
    }

    async fn exchange(&self) -> Result<Reading, SensorError> {
        let mut port = tokio_serial::new(self.device.as_str(), self.baudrate)
            .timeout(self.timeout)
            .open_native_async()?;

        port.write_all(&READ_COMMAND).await?;
        port.flush().await?;
        tokio::time::sleep(self.read_delay).await;

        let mut buffer = [0u8; FRAME_LEN];
        let mut filled = 0;
        let deadline = Instant::now() + self.timeout;
        while filled < FRAME_LEN {
            match tokio::time::timeout_at(deadline, port.read(&mut buffer[filled..])).await {
                Ok(Ok(0)) | Err(_) => break,
                Ok(Ok(n)) => filled += n,
                Ok(Err(err)) => return Err(err.into()),
            }
        }
        drop(port);

        trace!(device = %self.device, bytes = filled, "serial response received");
        if filled == 0 {
            return Err(SensorError::NoResponse);
        }
        Ok(frame::decode(&buffer[..filled])?)
    }
}

#[async_trait]
impl SensorSource for SerialSensor {
    async fn read(&mut self) -> Reading {
        match self.exchange().await {
            Ok(reading) => reading,
            Err(err) => {
                debug!(device = %self.device, error = %err, "sensor read failed");
                Reading::error(err.to_string())
            }
        }
    }

    fn describe(&self) -> &str {
        &self.device
    }
}

/// Pick the configured source. `interval` is the acquisition period, used by
/// the simulated source to accumulate energy.
pub fn sensor_from_config(config: &PzemConfig, interval: Duration) -> Box<dyn SensorSource> {
    if config.simulate {
        Box::new(SimulatedSensor::new(interval))
    } else {
        Box::new(SerialSensor::from_config(config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_device_yields_error_reading() {
        let mut sensor = SerialSensor::new(
            "/dev/meterlink-does-not-exist",
            9600,
            Duration::from_millis(50),
            Duration::from_millis(1),
        );
        let reading = sensor.read().await;
        assert!(reading.is_error());
        assert_eq!(reading.voltage, 0.0);
    }

    #[test]
    fn simulate_flag_selects_simulated_source() {
        let config = PzemConfig {
            simulate: true,
            ..PzemConfig::default()
        };
        let source = sensor_from_config(&config, Duration::from_secs(2));
        assert_eq!(source.describe(), "simulate");

        let source = sensor_from_config(&PzemConfig::default(), Duration::from_secs(2));
        assert_eq!(source.describe(), "/dev/ttyUSB0");
    }
}
