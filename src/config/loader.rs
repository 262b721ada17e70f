//! Configuration loader with file resolution and environment override support.

use super::error::{ConfigError, ConfigResult};
use super::schema::{Config, LogFormat};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Environment variable prefix for overrides
const ENV_PREFIX: &str = "RELEASE_SPECS";

/// Config file name in the current directory
const LOCAL_CONFIG_FILE: &str = "release-specs.toml";

/// Config file name in the user config directory
const CONFIG_FILE_NAME: &str = "config.toml";

/// Environment variable for explicit config path
const CONFIG_PATH_ENV: &str = "RELEASE_SPECS_CONFIG";

/// Configuration loader with resolution and override logic.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Resolved config file path (if any)
    pub config_path: Option<PathBuf>,
    /// The loaded configuration
    pub config: Config,
}

impl ConfigLoader {
    /// Load configuration using standard resolution order.
    ///
    /// Resolution priority (highest to lowest):
    /// 1. `RELEASE_SPECS_CONFIG` environment variable (explicit path)
    /// 2. `./release-specs.toml` (current directory)
    /// 3. `$XDG_CONFIG_HOME/release-specs/config.toml`
    /// 4. Built-in defaults (no file required)
    ///
    /// Environment variables override file values.
    pub fn load() -> ConfigResult<Self> {
        let config_path = resolve_config_path();

        let mut config = if let Some(ref path) = config_path {
            load_from_file(path)?
        } else {
            Config::default()
        };

        apply_env_overrides(&mut config)?;
        validate(&config)?;

        Ok(Self { config_path, config })
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(ConfigError::NotFound(path));
        }
        let mut config = load_from_file(&path)?;
        apply_env_overrides(&mut config)?;
        validate(&config)?;

        Ok(Self {
            config_path: Some(path),
            config,
        })
    }

    /// Create a loader with default configuration (no file).
    pub fn with_defaults() -> ConfigResult<Self> {
        let mut config = Config::default();
        apply_env_overrides(&mut config)?;

        Ok(Self {
            config_path: None,
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn into_config(self) -> Config {
        self.config
    }
}

/// Resolve the configuration file path using standard locations.
pub fn resolve_config_path() -> Option<PathBuf> {
    // 1. Explicit environment variable
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
    }

    // 2. Current directory
    let cwd_config = PathBuf::from(LOCAL_CONFIG_FILE);
    if cwd_config.exists() {
        return Some(cwd_config);
    }

    // 3. User config directory
    if let Some(path) = get_default_config_path() {
        if path.exists() {
            return Some(path);
        }
    }

    None
}

/// Get the default config file path for creating new config files.
pub fn get_default_config_path() -> Option<PathBuf> {
    directories::BaseDirs::new()
        .map(|dirs| dirs.config_dir().join("release-specs").join(CONFIG_FILE_NAME))
}

fn load_from_file(path: &Path) -> ConfigResult<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_path_buf(),
        source: e,
    })?;

    toml::from_str(&content).map_err(ConfigError::ParseError)
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(format!("{ENV_PREFIX}_{key}")).ok()
}

fn parse_env<T: FromStr>(key: &str, value: &str, message: &str) -> ConfigResult<T> {
    value
        .parse()
        .map_err(|_| ConfigError::env_parse(format!("{ENV_PREFIX}_{key}"), message))
}

fn parse_flag(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "1" | "true" | "yes")
}

/// Apply environment variable overrides to the configuration.
///
/// Environment variables follow the pattern `RELEASE_SPECS_<SECTION>_<KEY>`,
/// e.g. `RELEASE_SPECS_IOTLAB_SITE=lille`. The variables of the RIOT
/// tooling (`RIOTBASE`, `IOTLAB_SITE`, `BUILD_IN_DOCKER`, `IOTLABRC`) are
/// honoured as well.
fn apply_env_overrides(config: &mut Config) -> ConfigResult<()> {
    // RIOT overrides
    if let Some(val) = env_var("RIOT_BASE").or_else(|| std::env::var("RIOTBASE").ok()) {
        config.riot.base = Some(PathBuf::from(val));
    }
    if let Some(val) = env_var("RIOT_MAKE") {
        config.riot.make = val;
    }
    if let Some(val) = env_var("RIOT_BUILD_IN_DOCKER").or_else(|| std::env::var("BUILD_IN_DOCKER").ok()) {
        config.riot.build_in_docker = parse_flag(&val);
    }
    if let Some(val) = env_var("RIOT_SERIAL_BAUD") {
        config.riot.serial_baud = parse_env("RIOT_SERIAL_BAUD", &val, "Invalid baud rate")?;
    }

    // IoT-LAB overrides
    if let Some(val) = env_var("IOTLAB_SITE").or_else(|| std::env::var("IOTLAB_SITE").ok()) {
        config.iotlab.site = val;
    }
    if let Some(val) = env_var("IOTLAB_API_URL") {
        config.iotlab.api_url = val;
    }
    if let Some(val) = env_var("IOTLAB_CREDENTIALS_FILE").or_else(|| std::env::var("IOTLABRC").ok()) {
        config.iotlab.credentials_file = Some(PathBuf::from(val));
    }
    if let Some(val) = env_var("IOTLAB_EXPERIMENT_DURATION_MIN") {
        config.iotlab.experiment_duration_min =
            parse_env("IOTLAB_EXPERIMENT_DURATION_MIN", &val, "Invalid duration")?;
    }
    if let Some(val) = env_var("IOTLAB_POLL_INTERVAL_MS") {
        config.iotlab.poll_interval_ms = parse_env("IOTLAB_POLL_INTERVAL_MS", &val, "Invalid interval")?;
    }
    if let Some(val) = env_var("IOTLAB_WAIT_TIMEOUT_SECS") {
        config.iotlab.wait_timeout_secs = parse_env("IOTLAB_WAIT_TIMEOUT_SECS", &val, "Invalid timeout")?;
    }

    // Shell overrides
    if let Some(val) = env_var("SHELL_PROMPT") {
        config.shell.prompt = val;
    }
    if let Some(val) = env_var("SHELL_COMMAND_TIMEOUT_MS") {
        config.shell.command_timeout_ms = parse_env("SHELL_COMMAND_TIMEOUT_MS", &val, "Invalid timeout")?;
    }
    if let Some(val) = env_var("SHELL_REBOOT_TIMEOUT_MS") {
        config.shell.reboot_timeout_ms = parse_env("SHELL_REBOOT_TIMEOUT_MS", &val, "Invalid timeout")?;
    }

    // Logging overrides
    if let Some(val) = env_var("LOGGING_LEVEL") {
        config.logging.level = val;
    }
    if let Some(val) = env_var("LOGGING_FORMAT") {
        config.logging.format = LogFormat::from_str(&val)
            .map_err(|e| ConfigError::env_parse(format!("{ENV_PREFIX}_LOGGING_FORMAT"), e))?;
    }

    Ok(())
}

fn validate(config: &Config) -> ConfigResult<()> {
    if config.shell.prompt.is_empty() {
        return Err(ConfigError::validation("shell.prompt", "must not be empty"));
    }
    if config.iotlab.experiment_duration_min == 0 {
        return Err(ConfigError::validation(
            "iotlab.experiment_duration_min",
            "must be at least one minute",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use std::io::Write;

    #[test]
    #[serial]
    fn test_default_loader() {
        let loader = ConfigLoader::with_defaults().unwrap();
        assert_eq!(loader.config().shell.command_timeout_ms, 10_000);
    }

    #[test]
    #[serial]
    fn test_env_override() {
        env::set_var("RELEASE_SPECS_IOTLAB_SITE", "lille");
        env::set_var("RELEASE_SPECS_SHELL_COMMAND_TIMEOUT_MS", "2500");

        let loader = ConfigLoader::with_defaults().unwrap();
        assert_eq!(loader.config().iotlab.site, "lille");
        assert_eq!(loader.config().shell.command_timeout_ms, 2500);

        env::remove_var("RELEASE_SPECS_IOTLAB_SITE");
        env::remove_var("RELEASE_SPECS_SHELL_COMMAND_TIMEOUT_MS");
    }

    #[test]
    #[serial]
    fn test_legacy_riot_env() {
        env::set_var("RIOTBASE", "/opt/RIOT");
        env::set_var("BUILD_IN_DOCKER", "1");
        env::set_var("IOTLAB_SITE", "grenoble");

        let loader = ConfigLoader::with_defaults().unwrap();
        assert_eq!(loader.config().riot.base, Some(PathBuf::from("/opt/RIOT")));
        assert!(loader.config().riot.build_in_docker);
        assert_eq!(loader.config().iotlab.site, "grenoble");

        env::remove_var("RIOTBASE");
        env::remove_var("BUILD_IN_DOCKER");
        env::remove_var("IOTLAB_SITE");
    }

    #[test]
    #[serial]
    fn test_invalid_env_value() {
        env::set_var("RELEASE_SPECS_IOTLAB_POLL_INTERVAL_MS", "soon");
        let err = ConfigLoader::with_defaults().unwrap_err();
        assert!(matches!(err, ConfigError::EnvParseError { .. }));
        env::remove_var("RELEASE_SPECS_IOTLAB_POLL_INTERVAL_MS");
    }

    #[test]
    #[serial]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[shell]\nprompt = \"$ \"\n[logging]\nformat = \"json\"").unwrap();

        let loader = ConfigLoader::load_from(file.path()).unwrap();
        assert_eq!(loader.config().shell.prompt, "$ ");
        assert_eq!(loader.config().logging.format, LogFormat::Json);
        assert_eq!(loader.config_path.as_deref(), Some(file.path()));
    }

    #[test]
    #[serial]
    fn test_load_rejects_empty_prompt() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[shell]\nprompt = \"\"").unwrap();
        assert!(matches!(
            ConfigLoader::load_from(file.path()),
            Err(ConfigError::ValidationError { .. })
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            ConfigLoader::load_from("/nonexistent/release-specs.toml"),
            Err(ConfigError::NotFound(_))
        ));
    }
}
