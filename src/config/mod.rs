//! Configuration for the release-test harness.
//!
//! This module provides TOML-based configuration with environment variable overrides.
//!
//! # Configuration Resolution
//!
//! 1. `RELEASE_SPECS_CONFIG` environment variable (explicit path)
//! 2. `./release-specs.toml` (current directory)
//! 3. `$XDG_CONFIG_HOME/release-specs/config.toml`
//! 4. Built-in defaults (no file required)
//!
//! # Environment Overrides
//!
//! The pattern is `RELEASE_SPECS_<SECTION>_<KEY>`:
//! - `RELEASE_SPECS_IOTLAB_SITE=lille`
//! - `RELEASE_SPECS_SHELL_COMMAND_TIMEOUT_MS=20000`
//!
//! The RIOT tooling variables are supported too:
//! - `RIOTBASE`, `BUILD_IN_DOCKER`
//! - `IOTLAB_SITE`, `IOTLABRC`
//!
//! # Example
//!
//! ```rust,ignore
//! use release_specs::config::ConfigLoader;
//!
//! let loader = ConfigLoader::load()?;
//! let config = loader.config();
//! println!("site: {}", config.iotlab.site);
//! ```

mod error;
mod loader;
mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{get_default_config_path, resolve_config_path, ConfigLoader};
pub use schema::{Config, IotlabConfig, LogFormat, LoggingConfig, RiotConfig, ShellConfig};
