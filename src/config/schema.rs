//! Configuration schema definitions.
//!
//! Every section has defaults, so an empty file (or no file) is a valid
//! configuration.

use crate::firmware::AttachMode;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// RIOT tree and build tool
    pub riot: RiotConfig,
    /// IoT-LAB testbed access
    pub iotlab: IotlabConfig,
    /// Device shell interaction
    pub shell: ShellConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// RIOT build configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiotConfig {
    /// Root of the RIOT tree under test (`RIOTBASE`)
    pub base: Option<PathBuf>,
    /// Build tool invoked for `all`, `flash-only` and `term`
    pub make: String,
    /// Build inside the RIOT docker image (`BUILD_IN_DOCKER`)
    pub build_in_docker: bool,
    /// How node terminals are attached
    pub attach: AttachMode,
    /// Baud rate for `attach = "serial"`
    pub serial_baud: u32,
}

impl Default for RiotConfig {
    fn default() -> Self {
        Self {
            base: None,
            make: "make".to_string(),
            build_in_docker: false,
            attach: AttachMode::MakeTerm,
            serial_baud: 115200,
        }
    }
}

impl RiotConfig {
    /// Directory of a RIOT application, relative to `base` when not absolute.
    pub fn app_dir(&self, app: &str) -> PathBuf {
        match &self.base {
            Some(base) if !PathBuf::from(app).is_absolute() => base.join(app),
            _ => PathBuf::from(app),
        }
    }
}

/// IoT-LAB configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IotlabConfig {
    /// Default site for experiments (`IOTLAB_SITE`)
    pub site: String,
    /// Sites accepted for `site`
    pub sites: Vec<String>,
    pub api_url: String,
    /// Credentials file (`IOTLABRC`); `~/.iotlabrc` when unset
    pub credentials_file: Option<PathBuf>,
    /// Experiment duration in minutes
    pub experiment_duration_min: u32,
    pub poll_interval_ms: u64,
    pub wait_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for IotlabConfig {
    fn default() -> Self {
        Self {
            site: "saclay".to_string(),
            sites: ["grenoble", "lille", "saclay", "strasbourg"]
                .into_iter()
                .map(String::from)
                .collect(),
            api_url: "https://www.iot-lab.info/api".to_string(),
            credentials_file: None,
            experiment_duration_min: 120,
            poll_interval_ms: 5000,
            wait_timeout_secs: 600,
            request_timeout_secs: 30,
        }
    }
}

impl IotlabConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Device shell configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    /// Prompt printed by the RIOT shell
    pub prompt: String,
    pub command_timeout_ms: u64,
    /// How long to wait for the boot banner after `reboot`
    pub reboot_timeout_ms: u64,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            prompt: "> ".to_string(),
            command_timeout_ms: 10_000,
            reboot_timeout_ms: 10_000,
        }
    }
}

impl ShellConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn reboot_timeout(&self) -> Duration {
        Duration::from_millis(self.reboot_timeout_ms)
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,
    /// Log format: "json", "pretty", "compact"
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    /// Pretty format with colors
    #[default]
    Pretty,
    Compact,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}
