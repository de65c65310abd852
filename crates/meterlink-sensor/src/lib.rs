//! ---
//! ems_section: "02-device-io"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "PZEM sensor decoding, sources, and acquisition."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Sensor side of the bridge: decode the meter's fixed response frame, read it
//! from a serial line or a simulator, and publish the newest reading from a
//! background task.

pub mod acquisition;
pub mod frame;
pub mod reading;
pub mod simulate;
pub mod source;

pub use acquisition::{Acquisition, LatestReading, RateLimiter};
pub use frame::{build_read_command, decode, decode_at, DecodeError, FRAME_LEN, READ_COMMAND};
pub use reading::{Measurement, Reading, ReadingStatus};
pub use simulate::SimulatedSensor;
pub use source::{sensor_from_config, SensorError, SensorSource, SerialSensor};
