//! ---
//! ems_section: "02-device-io"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "PZEM fixed-frame command encoding and response decoding."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! The meter answers a read-input-registers request for ten registers with a
//! 25-byte frame: address, function, byte count, twenty data bytes, CRC.
//!
//! | offset | width | field        | scale  |
//! |--------|-------|--------------|--------|
//! | 3      | 2     | voltage      | 0.1 V  |
//! | 5      | 3     | current      | 1 mA   |
//! | 9      | 3     | power        | 0.1 W  |
//! | 13     | 3     | energy       | 1 Wh   |
//! | 17     | 2     | frequency    | 0.1 Hz |
//! | 19     | 2     | power factor | 0.01   |

use chrono::{DateTime, Utc};
use crc::{Crc, CRC_16_MODBUS};
use thiserror::Error;

use crate::reading::{Reading, ReadingStatus};

/// Length of a complete response frame.
pub const FRAME_LEN: usize = 25;

/// Read ten input registers from address 0x01, starting at register 0.
pub const READ_COMMAND: [u8; 8] = [0x01, 0x04, 0x00, 0x00, 0x00, 0x0A, 0x70, 0x0D];

const READ_INPUT_REGISTERS: u8 = 0x04;
const MODBUS_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("too short: expected {expected} bytes, got {len}")]
    TooShort { len: usize, expected: usize },
    #[error("field {field} unreadable at offset {offset}")]
    Field { field: &'static str, offset: usize },
}

/// Build a read-input-registers request with its trailing CRC (low byte first).
pub fn build_read_command(address: u8, start: u16, count: u16) -> [u8; 8] {
    let mut frame = [0u8; 8];
    frame[0] = address;
    frame[1] = READ_INPUT_REGISTERS;
    frame[2..4].copy_from_slice(&start.to_be_bytes());
    frame[4..6].copy_from_slice(&count.to_be_bytes());
    let crc = MODBUS_CRC.checksum(&frame[..6]);
    frame[6..8].copy_from_slice(&crc.to_le_bytes());
    frame
}

/// Decode a response frame, stamping it with the current time.
pub fn decode(buffer: &[u8]) -> Result<Reading, DecodeError> {
    decode_at(buffer, Utc::now())
}

/// Decode a response frame with an explicit capture time.
pub fn decode_at(buffer: &[u8], captured_at: DateTime<Utc>) -> Result<Reading, DecodeError> {
    if buffer.len() < FRAME_LEN {
        return Err(DecodeError::TooShort {
            len: buffer.len(),
            expected: FRAME_LEN,
        });
    }

    Ok(Reading {
        voltage: f64::from(be_u16(buffer, 3, "voltage")?) / 10.0,
        current: f64::from(be_u24(buffer, 5, "current")?) / 1000.0,
        power: f64::from(be_u24(buffer, 9, "power")?) / 10.0,
        energy: f64::from(be_u24(buffer, 13, "energy")?),
        frequency: f64::from(be_u16(buffer, 17, "frequency")?) / 10.0,
        power_factor: f64::from(be_u16(buffer, 19, "power_factor")?) / 100.0,
        status: ReadingStatus::Ok,
        captured_at,
    })
}

fn be_u16(buffer: &[u8], offset: usize, field: &'static str) -> Result<u16, DecodeError> {
    buffer
        .get(offset..offset + 2)
        .and_then(|bytes| <[u8; 2]>::try_from(bytes).ok())
        .map(u16::from_be_bytes)
        .ok_or(DecodeError::Field { field, offset })
}

fn be_u24(buffer: &[u8], offset: usize, field: &'static str) -> Result<u32, DecodeError> {
    buffer
        .get(offset..offset + 3)
        .map(|bytes| u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]]))
        .ok_or(DecodeError::Field { field, offset })
}
