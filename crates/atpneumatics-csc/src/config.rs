//! CSC configuration – reads/writes `~/.atpneumatics/config.toml`.
//!
//! ```toml
//! host = "127.0.0.1"
//! cmd_evt_port = 5000
//! telemetry_port = 6000
//! cmd_done_timeout = 20.0
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use atpneumatics_types::PneumaticsError;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Connection settings of the pneumatics controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
#[schemars(title = "ATPneumatics", description = "Schema for ATPneumatics CSC configuration files.")]
pub struct CscConfig {
    /// IP address of the TCP/IP interface.
    pub host: String,

    /// Port number of the command and event TCP/IP interface.
    pub cmd_evt_port: u16,

    /// Port number of the telemetry TCP/IP interface.
    pub telemetry_port: u16,

    /// Time limit for the controller to report a command done [sec].
    #[serde(default = "default_cmd_done_timeout")]
    pub cmd_done_timeout: f64,
}

fn default_cmd_done_timeout() -> f64 {
    20.0
}

impl Default for CscConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            cmd_evt_port: 5000,
            telemetry_port: 6000,
            cmd_done_timeout: default_cmd_done_timeout(),
        }
    }
}

impl CscConfig {
    /// Reject empty hosts and timeouts that are not a positive number of
    /// seconds.
    pub fn validate(&self) -> Result<(), PneumaticsError> {
        if self.host.trim().is_empty() {
            return Err(PneumaticsError::InvalidConfig("host must not be empty".into()));
        }
        if !(self.cmd_done_timeout > 0.0) || Duration::try_from_secs_f64(self.cmd_done_timeout).is_err()
        {
            return Err(PneumaticsError::InvalidConfig(format!(
                "cmd_done_timeout must be a positive number of seconds, got {}",
                self.cmd_done_timeout
            )));
        }
        Ok(())
    }

    /// [`cmd_done_timeout`][Self::cmd_done_timeout] as a [`Duration`].
    ///
    /// Falls back to the default for values [`validate`][Self::validate]
    /// would reject.
    pub fn cmd_done_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.cmd_done_timeout)
            .ok()
            .filter(|d| !d.is_zero())
            .unwrap_or_else(|| Duration::from_secs_f64(default_cmd_done_timeout()))
    }
}

/// JSON schema of [`CscConfig`], pretty-printed.
pub fn json_schema() -> Result<String, PneumaticsError> {
    let schema = schemars::schema_for!(CscConfig);
    serde_json::to_string_pretty(&schema).map_err(|e| PneumaticsError::Serialization(e.to_string()))
}

/// Return the path to `~/.atpneumatics/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".atpneumatics").join("config.toml")
}

/// Load and validate the config at `path`.  Returns `None` if the file does
/// not exist.
pub fn load_from(path: &Path) -> Result<Option<CscConfig>, PneumaticsError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| {
        PneumaticsError::Io(format!("Failed to read config at {}: {}", path.display(), e))
    })?;
    let cfg = parse(&raw)?;
    Ok(Some(cfg))
}

/// Parse and validate a TOML document.
pub fn parse(raw: &str) -> Result<CscConfig, PneumaticsError> {
    let cfg: CscConfig = toml::from_str(raw)
        .map_err(|e| PneumaticsError::InvalidConfig(format!("Failed to parse config: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Apply `ATPNEUMATICS_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `ATPNEUMATICS_HOST` | `host` |
/// | `ATPNEUMATICS_CMD_EVT_PORT` | `cmd_evt_port` |
/// | `ATPNEUMATICS_TELEMETRY_PORT` | `telemetry_port` |
pub fn apply_env_overrides(cfg: &mut CscConfig) {
    apply_overrides_from(cfg, |key| std::env::var(key).ok());
}

pub(crate) fn apply_overrides_from(cfg: &mut CscConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("ATPNEUMATICS_HOST") {
        cfg.host = v;
    }
    for (key, field) in [
        ("ATPNEUMATICS_CMD_EVT_PORT", &mut cfg.cmd_evt_port),
        ("ATPNEUMATICS_TELEMETRY_PORT", &mut cfg.telemetry_port),
    ] {
        if let Some(v) = lookup(key) {
            match v.parse::<u16>() {
                Ok(port) => *field = port,
                Err(_) => warn!(key, value = %v, "ignoring invalid port override"),
            }
        }
    }
}

/// Save the config to `path`, creating parent directories as needed.
pub fn save_to(cfg: &CscConfig, path: &Path) -> Result<(), PneumaticsError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            PneumaticsError::Io(format!("Failed to create config directory: {e}"))
        })?;
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| PneumaticsError::Serialization(format!("Failed to serialize config: {e}")))?;
    fs::write(path, raw).map_err(|e| {
        PneumaticsError::Io(format!("Failed to write config at {}: {}", path.display(), e))
    })
}
