//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Bridge configuration model, loading, and validation."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::HashSet;
use std::fs;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSecondsWithFrac};
use tracing::debug;

use crate::logging::LogFormat;

/// Number of measurement variables written per cycle (voltage, current, power, energy).
pub const VARIABLE_COUNT: usize = 4;

/// Supported serial baud rates, inclusive.
pub const BAUDRATE_RANGE: std::ops::RangeInclusive<u32> = 9600..=115_200;

/// Environment variables that override individual configuration values.
pub const ENV_OVERRIDE_VARS: &[&str] = &[
    "OPCUA_SERVER_URL",
    "OPCUA_USERNAME",
    "OPCUA_PASSWORD",
    "OPCUA_TIMEOUT",
    "OPCUA_RETRY_ATTEMPTS",
    "PZEM_DEVICE",
    "PZEM_BAUDRATE",
    "PZEM_TIMEOUT",
    "PZEM_READ_DELAY",
    "PZEM_SIMULATE",
    "SAMPLE_INTERVAL",
    "LOG_LEVEL",
    "LOG_EVERY_N_READINGS",
    "ENABLE_FILE_LOGGING",
];

fn default_log_level() -> String {
    "info".to_owned()
}

fn default_true() -> bool {
    true
}

fn default_log_values_every_n() -> u32 {
    12
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

fn default_server_url() -> String {
    "opc.tcp://127.0.0.1:4840".to_owned()
}

fn default_machine_root_nodeid() -> String {
    "ns=1;i=74000".to_owned()
}

fn default_channel_path() -> Vec<String> {
    ["Monitoring", "Consumption", "Electricity", "Main"]
        .into_iter()
        .map(str::to_owned)
        .collect()
}

fn default_variables() -> Vec<String> {
    [
        "AcVoltagePe",
        "AcCurrentPe",
        "AcActivePowerPe",
        "AcActiveEnergyTotalImportHp",
    ]
    .into_iter()
    .map(str::to_owned)
    .collect()
}

fn default_retries() -> u32 {
    5
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(3)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_application_name() -> String {
    "meterlink".to_owned()
}

fn default_application_uri() -> String {
    "urn:meterlink:client".to_owned()
}

fn default_device() -> String {
    "/dev/ttyUSB0".to_owned()
}

fn default_baudrate() -> u32 {
    9600
}

fn default_serial_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_read_delay() -> Duration {
    Duration::from_millis(200)
}

fn default_read_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_scale() -> f64 {
    1.0
}

fn default_sample_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_startup_delay() -> Duration {
    Duration::from_secs(3)
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, 9899))
}

/// Top-level configuration for the bridge process. Immutable once loaded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub application: ApplicationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub opcua: OpcUaConfig,
    #[serde(default)]
    pub pzem: PzemConfig,
    #[serde(default)]
    pub scales: ScalesConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Metadata describing where a [`BridgeConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedBridgeConfig {
    pub config: BridgeConfig,
    pub source: PathBuf,
    /// Environment variables that replaced values from the file.
    pub overrides: Vec<&'static str>,
}

impl BridgeConfig {
    pub const ENV_CONFIG_PATH: &str = "METERLINK_CONFIG";

    /// Load configuration from disk, respecting the `METERLINK_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedBridgeConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                return Self::from_path(PathBuf::from(env_path));
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                return Self::from_path(candidate.as_ref().to_path_buf());
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: PathBuf) -> Result<LoadedBridgeConfig> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let mut config = Self::parse(&path, &contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        let overrides = config
            .apply_overrides_from(|name| std::env::var(name).ok())
            .context("invalid environment override")?;
        config
            .validate()
            .with_context(|| format!("invalid configuration in {}", path.display()))?;
        Ok(LoadedBridgeConfig {
            config,
            source: path,
            overrides,
        })
    }

    fn parse(path: &Path, contents: &str) -> Result<Self> {
        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Ok(serde_json::from_str(contents)?)
        } else {
            Ok(toml::from_str(contents)?)
        }
    }

    /// Apply every override in [`ENV_OVERRIDE_VARS`] that `lookup` yields a value for.
    ///
    /// Returns the names of the applied variables. A value that does not parse
    /// for its target field is reported as an error naming the variable.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<Vec<&'static str>>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut applied = Vec::new();
        for &name in ENV_OVERRIDE_VARS {
            let Some(raw) = lookup(name) else {
                continue;
            };
            let value = raw.trim();
            self.apply_override(name, value)
                .map_err(|reason| anyhow!("{name}={value:?}: {reason}"))?;
            applied.push(name);
        }
        Ok(applied)
    }

    fn apply_override(&mut self, name: &str, value: &str) -> std::result::Result<(), String> {
        match name {
            "OPCUA_SERVER_URL" => self.opcua.server_url = value.to_owned(),
            "OPCUA_USERNAME" => self.opcua.username = Some(value.to_owned()),
            "OPCUA_PASSWORD" => self.opcua.password = Some(value.to_owned()),
            "OPCUA_TIMEOUT" => self.opcua.connect_timeout = parse_seconds(value)?,
            "OPCUA_RETRY_ATTEMPTS" => self.opcua.retries = parse_value(value)?,
            "PZEM_DEVICE" => self.pzem.device = value.to_owned(),
            "PZEM_BAUDRATE" => self.pzem.baudrate = parse_value(value)?,
            "PZEM_TIMEOUT" => self.pzem.timeout = parse_seconds(value)?,
            "PZEM_READ_DELAY" => self.pzem.read_delay = parse_seconds(value)?,
            "PZEM_SIMULATE" => self.pzem.simulate = parse_flag(value)?,
            "SAMPLE_INTERVAL" => self.timing.sample_interval = parse_seconds(value)?,
            "LOG_LEVEL" => self.application.log_level = value.to_lowercase(),
            "LOG_EVERY_N_READINGS" => self.application.log_values_every_n = parse_value(value)?,
            "ENABLE_FILE_LOGGING" => self.logging.file_enabled = parse_flag(value)?,
            other => return Err(format!("unsupported override {other}")),
        }
        Ok(())
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.application.validate()?;
        self.opcua.validate()?;
        self.pzem.validate()?;
        self.scales.validate()?;
        Ok(())
    }
}

impl FromStr for BridgeConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: BridgeConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

fn parse_value<T>(value: &str) -> std::result::Result<T, String>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.parse::<T>().map_err(|err| err.to_string())
}

fn parse_seconds(value: &str) -> std::result::Result<Duration, String> {
    let seconds: f64 = parse_value(value)?;
    Duration::try_from_secs_f64(seconds).map_err(|err| err.to_string())
}

fn parse_flag(value: &str) -> std::result::Result<bool, String> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err("expected a boolean".to_owned()),
    }
}

/// Process-level behaviour toggles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub verbose: bool,
    /// Clamp protocol-library logging to warnings.
    #[serde(default = "default_true")]
    pub quiet_third_party: bool,
    /// Emit a snapshot of the written values every `log_values_every_n` cycles.
    #[serde(default)]
    pub log_values: bool,
    #[serde(default = "default_log_values_every_n")]
    pub log_values_every_n: u32,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            verbose: false,
            quiet_third_party: true,
            log_values: false,
            log_values_every_n: default_log_values_every_n(),
        }
    }
}

impl ApplicationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.log_values_every_n == 0 {
            return Err(anyhow!("application.log_values_every_n must be at least 1"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_enabled: bool,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_enabled: false,
            file_prefix: None,
        }
    }
}

/// Target server, addressing, and connection retry settings.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpcUaConfig {
    #[serde(default = "default_server_url")]
    pub server_url: String,
    /// Node id string of the machine root, e.g. `ns=1;i=74000`.
    #[serde(default = "default_machine_root_nodeid")]
    pub machine_root_nodeid: String,
    /// Browse names from the machine root down to the channel folder.
    #[serde(default = "default_channel_path")]
    pub channel_path: Vec<String>,
    /// Variable names mapped by position to voltage, current, power, energy.
    #[serde(default = "default_variables")]
    pub variables: Vec<String>,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(rename = "retry_delay_sec", default = "default_retry_delay")]
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub retry_delay: Duration,
    #[serde(rename = "connect_timeout_sec", default = "default_connect_timeout")]
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub connect_timeout: Duration,
    #[serde(default = "default_application_name")]
    pub application_name: String,
    #[serde(default = "default_application_uri")]
    pub application_uri: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
}

impl Default for OpcUaConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            machine_root_nodeid: default_machine_root_nodeid(),
            channel_path: default_channel_path(),
            variables: default_variables(),
            retries: default_retries(),
            retry_delay: default_retry_delay(),
            connect_timeout: default_connect_timeout(),
            application_name: default_application_name(),
            application_uri: default_application_uri(),
            username: None,
            password: None,
        }
    }
}

impl OpcUaConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.server_url.trim().starts_with("opc.tcp://") {
            return Err(anyhow!(
                "opcua.server_url '{}' must use the opc.tcp:// scheme",
                self.server_url
            ));
        }
        if self.machine_root_nodeid.trim().is_empty() {
            return Err(anyhow!("opcua.machine_root_nodeid must not be empty"));
        }
        if self.channel_path.is_empty() {
            return Err(anyhow!("opcua.channel_path must contain at least one segment"));
        }
        if let Some(idx) = self.channel_path.iter().position(|s| s.is_empty()) {
            return Err(anyhow!("opcua.channel_path segment {} is empty", idx));
        }
        if self.variables.len() != VARIABLE_COUNT {
            return Err(anyhow!(
                "opcua.variables must name exactly {} variables (voltage, current, power, energy), got {}",
                VARIABLE_COUNT,
                self.variables.len()
            ));
        }
        let mut seen = HashSet::new();
        for name in &self.variables {
            if name.is_empty() {
                return Err(anyhow!("opcua.variables must not contain empty names"));
            }
            if !seen.insert(name.as_str()) {
                return Err(anyhow!("opcua.variables contains duplicate name '{}'", name));
            }
        }
        if self.retries == 0 {
            return Err(anyhow!("opcua.retries must be at least 1"));
        }
        if self.username.is_some() != self.password.is_some() {
            return Err(anyhow!(
                "opcua.username and opcua.password must be configured together"
            ));
        }
        Ok(())
    }
}

/// Serial sensor settings.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PzemConfig {
    #[serde(default = "default_device")]
    pub device: String,
    #[serde(default = "default_baudrate")]
    pub baudrate: u32,
    #[serde(rename = "timeout_sec", default = "default_serial_timeout")]
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub timeout: Duration,
    /// Pause between sending the command and reading the response.
    #[serde(rename = "read_delay_sec", default = "default_read_delay")]
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub read_delay: Duration,
    /// Background acquisition period.
    #[serde(rename = "read_interval_sec", default = "default_read_interval")]
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub read_interval: Duration,
    #[serde(default)]
    pub simulate: bool,
}

impl Default for PzemConfig {
    fn default() -> Self {
        Self {
            device: default_device(),
            baudrate: default_baudrate(),
            timeout: default_serial_timeout(),
            read_delay: default_read_delay(),
            read_interval: default_read_interval(),
            simulate: false,
        }
    }
}

impl PzemConfig {
    pub fn validate(&self) -> Result<()> {
        if !BAUDRATE_RANGE.contains(&self.baudrate) {
            return Err(anyhow!(
                "pzem.baudrate {} outside supported range {}..={}",
                self.baudrate,
                BAUDRATE_RANGE.start(),
                BAUDRATE_RANGE.end()
            ));
        }
        if !self.simulate && self.device.trim().is_empty() {
            return Err(anyhow!("pzem.device must be set unless simulate is enabled"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ScalesConfig {
    #[serde(default = "default_scale")]
    pub voltage_scale: f64,
    #[serde(default = "default_scale")]
    pub current_scale: f64,
    #[serde(default = "default_scale")]
    pub power_scale: f64,
    #[serde(default = "default_scale")]
    pub energy_scale: f64,
}

impl Default for ScalesConfig {
    fn default() -> Self {
        Self {
            voltage_scale: default_scale(),
            current_scale: default_scale(),
            power_scale: default_scale(),
            energy_scale: default_scale(),
        }
    }
}

impl ScalesConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("voltage_scale", self.voltage_scale),
            ("current_scale", self.current_scale),
            ("power_scale", self.power_scale),
            ("energy_scale", self.energy_scale),
        ] {
            if !value.is_finite() {
                return Err(anyhow!("scales.{} must be a finite number", name));
            }
        }
        Ok(())
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    #[serde(rename = "sample_interval_sec", default = "default_sample_interval")]
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub sample_interval: Duration,
    /// Upper bound on waiting for the first sensor reading.
    #[serde(rename = "startup_delay_sec", default = "default_startup_delay")]
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub startup_delay: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            sample_interval: default_sample_interval(),
            startup_delay: default_startup_delay(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: default_metrics_listen(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_validate() {
        let config = BridgeConfig::default();
        config.validate().unwrap();
        assert_eq!(config.opcua.retries, 5);
        assert_eq!(config.opcua.retry_delay, Duration::from_secs(3));
        assert_eq!(config.timing.sample_interval, Duration::from_secs(5));
        assert_eq!(config.opcua.variables.len(), VARIABLE_COUNT);
        assert_eq!(config.opcua.channel_path[0], "Monitoring");
    }

    #[test]
    fn parses_fractional_seconds() {
        let config: BridgeConfig = r#"
            [opcua]
            retry_delay_sec = 0.5

            [pzem]
            read_delay_sec = 0.25
            timeout_sec = 1

            [timing]
            sample_interval_sec = 2.5
        "#
        .parse()
        .unwrap();
        assert_eq!(config.opcua.retry_delay, Duration::from_millis(500));
        assert_eq!(config.pzem.read_delay, Duration::from_millis(250));
        assert_eq!(config.pzem.timeout, Duration::from_secs(1));
        assert_eq!(config.timing.sample_interval, Duration::from_millis(2500));
    }

    #[test]
    fn rejects_duplicate_variables() {
        let err = r#"
            [opcua]
            variables = ["A", "B", "A", "C"]
        "#
        .parse::<BridgeConfig>()
        .unwrap_err();
        assert!(format!("{err:#}").contains("duplicate"));
    }

    #[test]
    fn rejects_wrong_variable_count() {
        let err = r#"
            [opcua]
            variables = ["A", "B", "C"]
        "#
        .parse::<BridgeConfig>()
        .unwrap_err();
        assert!(format!("{err:#}").contains("exactly 4"));
    }

    #[test]
    fn rejects_empty_channel_path() {
        let err = r#"
            [opcua]
            channel_path = []
        "#
        .parse::<BridgeConfig>()
        .unwrap_err();
        assert!(format!("{err:#}").contains("channel_path"));
    }

    #[test]
    fn rejects_out_of_range_baudrate() {
        let err = r#"
            [pzem]
            baudrate = 4800
        "#
        .parse::<BridgeConfig>()
        .unwrap_err();
        assert!(format!("{err:#}").contains("baudrate"));
    }

    #[test]
    fn rejects_zero_retries() {
        assert!(r#"
            [opcua]
            retries = 0
        "#
        .parse::<BridgeConfig>()
        .is_err());
    }

    #[test]
    fn rejects_half_configured_credentials() {
        assert!(r#"
            [opcua]
            username = "operator"
        "#
        .parse::<BridgeConfig>()
        .is_err());
    }

    #[test]
    fn env_overrides_replace_values() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("OPCUA_SERVER_URL", "opc.tcp://plc.local:4840"),
            ("PZEM_BAUDRATE", "19200"),
            ("SAMPLE_INTERVAL", "1.5"),
            ("PZEM_SIMULATE", "true"),
            ("LOG_LEVEL", "DEBUG"),
        ]);
        let mut config = BridgeConfig::default();
        let applied = config
            .apply_overrides_from(|name| env.get(name).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(applied.len(), 5);
        assert_eq!(config.opcua.server_url, "opc.tcp://plc.local:4840");
        assert_eq!(config.pzem.baudrate, 19200);
        assert_eq!(config.timing.sample_interval, Duration::from_millis(1500));
        assert!(config.pzem.simulate);
        assert_eq!(config.application.log_level, "debug");
    }

    #[test]
    fn env_override_reports_bad_value() {
        let mut config = BridgeConfig::default();
        let err = config
            .apply_overrides_from(|name| (name == "PZEM_BAUDRATE").then(|| "fast".to_owned()))
            .unwrap_err();
        assert!(err.to_string().contains("PZEM_BAUDRATE"));
    }

    #[test]
    fn loads_json_by_extension() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"opcua": {{"server_url": "opc.tcp://10.0.0.5:4840", "retries": 2}}, "pzem": {{"simulate": true}}}}"#
        )
        .unwrap();
        let loaded = BridgeConfig::load_with_source(&[file.path()]).unwrap();
        assert_eq!(loaded.config.opcua.retries, 2);
        assert!(loaded.config.pzem.simulate);
        assert_eq!(loaded.source, file.path());
    }

    #[test]
    fn missing_candidates_are_listed() {
        let err = BridgeConfig::load(&["does/not/exist.toml"]).unwrap_err();
        assert!(err.to_string().contains("does/not/exist.toml"));
    }
}
