//! Configuration loading using Figment
//!
//! Settings are layered, lowest precedence first:
//! 1. built-in defaults ([`Settings::default`])
//! 2. a TOML file (default `config/acoustic.toml`, optional)
//! 3. environment variables prefixed with `ACOUSTIC_` (`__` separates sections)
//! 4. `KEY=VALUE` overrides from the command line (dotted keys)
//!
//! ```text
//! ACOUSTIC_MUX__KIND=cytec
//! ACOUSTIC_NOTIFY__TIMEOUT_MS=500
//! acoustic-daq run mux.port=/dev/ttyUSB0 storage.data_dir=/srv/Data
//! ```
//!
//! After loading, the configuration is validated.

use crate::error::{AppResult, DaqError};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/acoustic.toml";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Application settings
    pub application: ApplicationConfig,
    /// Run table location
    pub table: TableConfig,
    /// Waveform and log storage
    pub storage: StorageConfig,
    /// Pass timing
    pub orchestrator: OrchestratorConfig,
    /// Pulser / digitizer driver
    pub pulser: PulserConfig,
    /// Multiplexer driver
    pub mux: MuxConfig,
    /// Live UI notification channel
    pub notify: NotifyConfig,
    /// Process control
    pub daemon: DaemonConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "acoustic-daq".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Where the run table lives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TableConfig {
    /// Path of the run table JSON written by the UI
    pub path: PathBuf,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("table_state.json"),
        }
    }
}

/// Where waveforms and logs are written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// Root of the `<date>/TestID_<id>/` tree
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("../Data"),
        }
    }
}

/// Pass timing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Pause after each active row, giving the UI a chance to rewrite the table
    pub row_settle_ms: u64,
    /// Extra pause when every row in the table is inactive
    pub idle_delay_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            row_settle_ms: 100,
            idle_delay_ms: 1000,
        }
    }
}

impl OrchestratorConfig {
    /// `row_settle_ms` as a [`Duration`].
    pub fn row_settle(&self) -> Duration {
        Duration::from_millis(self.row_settle_ms)
    }

    /// `idle_delay_ms` as a [`Duration`].
    pub fn idle_delay(&self) -> Duration {
        Duration::from_millis(self.idle_delay_ms)
    }
}

/// Which pulser driver to build.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PulserKind {
    /// Synthetic echoes, no hardware
    Mock,
    /// JSON-lines pulser/digitizer server over TCP
    Remote,
}

/// Pulser driver selection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PulserConfig {
    /// Driver to build
    pub kind: PulserKind,
    /// `host:port` of the pulser server (remote only)
    pub address: Option<String>,
    /// Upper bound for one configure-and-acquire round trip
    pub timeout_ms: u64,
}

impl Default for PulserConfig {
    fn default() -> Self {
        Self {
            kind: PulserKind::Mock,
            address: None,
            timeout_ms: 10_000,
        }
    }
}

/// Which multiplexer driver to build, if any.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MuxKind {
    /// No multiplexer; channel numbers are ignored
    None,
    /// In-memory relay bank
    Mock,
    /// Cytec relay matrix on a serial port
    Cytec,
}

/// Multiplexer driver selection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MuxConfig {
    /// Driver to build
    pub kind: MuxKind,
    /// Serial port (e.g. "/dev/ttyUSB0"), cytec only
    pub port: Option<String>,
    /// Serial baud rate, cytec only
    pub baud_rate: u32,
    /// Delay between writing a frame and reading the reply
    pub settle_ms: u64,
    /// Addressable channel count of the mock relay bank
    pub channels: u32,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            kind: MuxKind::None,
            port: None,
            baud_rate: 9600,
            settle_ms: 200,
            channels: 64,
        }
    }
}

/// Live UI notifications.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NotifyConfig {
    /// `host:port` of the UI event listener; absent disables notifications
    pub address: Option<String>,
    /// Bound on a single emit; exceeding it disables the channel
    pub timeout_ms: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            address: None,
            timeout_ms: 3000,
        }
    }
}

/// Pid file location and daemon name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Directory holding `pid_<name>` files
    pub pid_dir: PathBuf,
    /// Name of this daemon's pid file
    pub name: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            pid_dir: PathBuf::from("Daemon_PIDs"),
            name: "easi_daemon".to_string(),
        }
    }
}

impl Settings {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    pub fn load() -> AppResult<Self> {
        Self::load_with(DEFAULT_CONFIG_PATH, &[])
    }

    /// Load from a specific file, the environment and `KEY=VALUE` overrides.
    ///
    /// A missing file is not an error; the defaults apply.
    pub fn load_with<P: AsRef<Path>>(path: P, overrides: &[String]) -> AppResult<Self> {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("ACOUSTIC_").split("__"));

        for (key, value) in parse_overrides(overrides)? {
            figment = figment.merge(Serialized::default(&key, value));
        }

        let settings: Settings = figment.extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Log level is valid (trace, debug, info, warn, error)
    /// - A remote pulser has an address
    /// - A cytec multiplexer has a serial port
    /// - Timeouts are non-zero
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.pulser.kind == PulserKind::Remote
            && self.pulser.address.as_deref().map_or(true, str::is_empty)
        {
            return Err(DaqError::Configuration(
                "Remote pulser requires 'pulser.address'".to_string(),
            ));
        }
        if self.pulser.timeout_ms == 0 {
            return Err(DaqError::Configuration(
                "'pulser.timeout_ms' must be greater than zero".to_string(),
            ));
        }

        if self.mux.kind == MuxKind::Cytec && self.mux.port.as_deref().map_or(true, str::is_empty)
        {
            return Err(DaqError::Configuration(
                "Cytec multiplexer requires 'mux.port'".to_string(),
            ));
        }
        if self.mux.kind == MuxKind::Mock && self.mux.channels == 0 {
            return Err(DaqError::Configuration(
                "'mux.channels' must be greater than zero".to_string(),
            ));
        }

        if self.notify.timeout_ms == 0 {
            return Err(DaqError::Configuration(
                "'notify.timeout_ms' must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> AppResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| DaqError::Configuration(format!("Failed to render configuration: {e}")))
    }
}

/// Split `KEY=VALUE` arguments. Values that parse as JSON scalars (numbers,
/// booleans) keep their type; anything else is a string.
pub fn parse_overrides(args: &[String]) -> AppResult<Vec<(String, serde_json::Value)>> {
    args.iter()
        .map(|arg| {
            let (key, value) = arg.split_once('=').ok_or_else(|| {
                DaqError::Configuration(format!("Override '{arg}' is not of the form KEY=VALUE"))
            })?;
            let key = key.trim();
            if key.is_empty() {
                return Err(DaqError::Configuration(format!(
                    "Override '{arg}' has an empty key"
                )));
            }
            let value = match serde_json::from_str::<serde_json::Value>(value) {
                Ok(v @ (serde_json::Value::Number(_) | serde_json::Value::Bool(_))) => v,
                _ => serde_json::Value::String(value.to_string()),
            };
            Ok((key.to_string(), value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.table.path, PathBuf::from("table_state.json"));
        assert_eq!(settings.notify.timeout_ms, 3000);
        assert_eq!(settings.mux.kind, MuxKind::None);
    }

    #[test]
    fn test_invalid_log_level() {
        let mut settings = Settings::default();
        settings.application.log_level = "verbose".to_string();

        let result = settings.validate();
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Invalid log_level"));
    }

    #[test]
    fn test_remote_pulser_requires_address() {
        let mut settings = Settings::default();
        settings.pulser.kind = PulserKind::Remote;
        assert!(settings.validate().is_err());

        settings.pulser.address = Some("127.0.0.1:9003".to_string());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_cytec_requires_port() {
        let mut settings = Settings::default();
        settings.mux.kind = MuxKind::Cytec;
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("mux.port"));
    }

    #[test]
    fn test_load_from_file_and_overrides() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[table]
path = "/tmp/table.json"

[mux]
kind = "mock"
channels = 16
"#
        )
        .unwrap();

        let overrides = vec![
            "notify.timeout_ms=500".to_string(),
            "notify.address=127.0.0.1:6054".to_string(),
        ];
        let settings = Settings::load_with(file.path(), &overrides).unwrap();

        assert_eq!(settings.table.path, PathBuf::from("/tmp/table.json"));
        assert_eq!(settings.mux.kind, MuxKind::Mock);
        assert_eq!(settings.mux.channels, 16);
        assert_eq!(settings.notify.timeout_ms, 500);
        assert_eq!(settings.notify.address.as_deref(), Some("127.0.0.1:6054"));
        // Untouched sections keep their defaults
        assert_eq!(settings.orchestrator, OrchestratorConfig::default());
    }

    #[test]
    fn test_shipped_config_matches_defaults() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join(DEFAULT_CONFIG_PATH);
        let settings = Settings::load_with(path, &[]).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let settings = Settings::load_with("/nonexistent/acoustic.toml", &[]).unwrap();
        assert_eq!(settings.storage, StorageConfig::default());
    }

    #[test]
    fn test_parse_overrides() {
        let parsed = parse_overrides(&[
            "a.b=3".to_string(),
            "flag=true".to_string(),
            "name=easi".to_string(),
        ])
        .unwrap();
        assert_eq!(parsed[0], ("a.b".to_string(), serde_json::json!(3)));
        assert_eq!(parsed[1].1, serde_json::json!(true));
        assert_eq!(parsed[2].1, serde_json::json!("easi"));

        assert!(parse_overrides(&["novalue".to_string()]).is_err());
        assert!(parse_overrides(&["=3".to_string()]).is_err());
    }

    #[test]
    fn test_toml_round_trip_of_defaults() {
        let rendered = Settings::default().to_toml().unwrap();
        assert!(rendered.contains("[notify]"));
        let parsed: Settings = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, Settings::default());
    }
}
