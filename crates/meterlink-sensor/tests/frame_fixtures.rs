//! ---
//! ems_section: "15-testing-qa-runbook"
//! ems_subsection: "integration-tests"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Decoder checks against captured meter frames."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use meterlink_sensor::{decode, DecodeError, ReadingStatus, FRAME_LEN};

fn hex_frame(text: &str) -> Vec<u8> {
    text.split_whitespace()
        .map(|byte| u8::from_str_radix(byte, 16).unwrap())
        .collect()
}

#[test]
fn idle_line_frame() {
    // 231.4 V, no load, 87 Wh on the counter, 49.9 Hz.
    let frame = hex_frame(
        "01 04 14 09 0A 00 00 00 00 00 00 00 00 00 00 57 00 01 F3 00 00 00 00 00 00",
    );
    assert_eq!(frame.len(), FRAME_LEN);
    let reading = decode(&frame).unwrap();
    assert!((reading.voltage - 231.4).abs() < 1e-9);
    assert_eq!(reading.current, 0.0);
    assert_eq!(reading.power, 0.0);
    assert_eq!(reading.energy, 87.0);
    assert!((reading.frequency - 49.9).abs() < 1e-9);
    assert_eq!(reading.status, ReadingStatus::Ok);
}

#[test]
fn loaded_frame() {
    // 228.7 V, 4.321 A, 987.6 W, 65536 Wh, 50.0 Hz, PF 0.99.
    let frame = hex_frame(
        "01 04 14 08 EF 00 10 E1 00 00 26 94 00 01 00 00 00 01 F4 00 63 00 00 00 00",
    );
    let reading = decode(&frame).unwrap();
    assert!((reading.voltage - 228.7).abs() < 1e-9);
    assert!((reading.current - 4.321).abs() < 1e-9);
    assert!((reading.power - 987.6).abs() < 1e-9);
    assert_eq!(reading.energy, 65536.0);
    assert!((reading.power_factor - 0.99).abs() < 1e-9);
}

#[test]
fn truncated_capture_is_rejected() {
    let frame = hex_frame("01 04 14 09 0A 00 00");
    assert!(matches!(
        decode(&frame),
        Err(DecodeError::TooShort { len: 7, .. })
    ));
}
