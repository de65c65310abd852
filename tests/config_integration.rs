//! ---
//! ems_section: "15-testing-qa-runbook"
//! ems_subsection: "integration-tests"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Configuration files shipped with the workspace load and validate."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use meterlink_common::BridgeConfig;

fn workspace_path(path: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("..").join(path)
}

fn read(path: &str) -> String {
    let full = workspace_path(path);
    fs::read_to_string(&full)
        .unwrap_or_else(|err| panic!("failed to read {}: {}", full.display(), err))
}

#[test]
fn example_config_parses_and_validates() {
    let config: BridgeConfig = read("configs/meterlink.example.toml")
        .parse()
        .unwrap_or_else(|err| panic!("example config rejected: {err:#}"));
    assert_eq!(config.opcua.variables.len(), 4);
    assert_eq!(config.opcua.machine_root_nodeid, "ns=1;i=74000");
    assert_eq!(config.timing.sample_interval, Duration::from_secs(5));
    assert_eq!(config.pzem.read_delay, Duration::from_millis(200));
    assert!(!config.pzem.simulate);
    assert!(config.opcua.username.is_none());
}

#[test]
fn json_configs_are_accepted() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    fs::write(
        &path,
        r#"{
            "opcua": {
                "server_url": "opc.tcp://10.0.0.5:4840",
                "machine_root_nodeid": "ns=2;i=5001",
                "channel_path": ["Main"],
                "variables": ["V", "I", "P", "E"]
            },
            "pzem": { "simulate": true },
            "timing": { "sample_interval_sec": 2 }
        }"#,
    )
    .unwrap();

    let loaded = BridgeConfig::load_with_source(&[&path]).unwrap();
    assert_eq!(loaded.source, path);
    assert_eq!(loaded.config.opcua.server_url, "opc.tcp://10.0.0.5:4840");
    assert!(loaded.config.pzem.simulate);
    assert_eq!(loaded.config.timing.sample_interval, Duration::from_secs(2));
}

#[test]
fn missing_config_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("absent.toml");
    let err = BridgeConfig::load_with_source(&[&missing]).unwrap_err();
    assert!(
        err.to_string().contains("no configuration files found"),
        "{err:#}"
    );
}

#[test]
fn invalid_variable_count_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("meterlink.toml");
    fs::write(
        &path,
        "[opcua]\nvariables = [\"AcVoltagePe\", \"AcCurrentPe\"]\n",
    )
    .unwrap();
    let err = BridgeConfig::load_with_source(&[&path]).unwrap_err();
    assert!(format!("{err:#}").contains("exactly 4"), "{err:#}");
}
