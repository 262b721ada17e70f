//! Utility functions for hardware testing.
//!
//! Provides environment discovery and orchestrators wired to the real RIOT
//! build system and, when credentials exist, the IoT-LAB REST API.

use release_specs::config::Config;
use release_specs::firmware::MakeFirmware;
use release_specs::orchestrator::{Orchestrator, OrchestratorSettings, SessionRegistry};
use release_specs::release;
use release_specs::testbed::{Credentials, ExperimentClient, RestTestbed};
use release_specs::LogContext;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Generous enough for a cold build of `gnrc_networking`.
pub const START_TIMEOUT: Duration = Duration::from_secs(900);

/// Test environment from environment variables.
pub struct HardwareEnv {
    pub riotbase: PathBuf,
    pub config: Config,
}

impl HardwareEnv {
    /// `None` (and a note on stdout) when `RIOTBASE` is not set.
    pub fn from_env() -> Option<Self> {
        let riotbase = match release::required_env("RIOTBASE") {
            Ok(base) => PathBuf::from(base),
            Err(e) => {
                println!("Skipping hardware test: {e}");
                return None;
            }
        };
        let mut config = Config::default();
        config.riot.base = Some(riotbase.clone());
        config.shell.command_timeout_ms = 30_000;
        Some(Self { riotbase, config })
    }

    pub fn app(&self, app: &str) -> PathBuf {
        self.config.riot.app_dir(app)
    }

    /// Orchestrator running every node locally.
    pub fn local_orchestrator(&self) -> Orchestrator {
        let settings = OrchestratorSettings {
            local: true,
            ..OrchestratorSettings::from_config(&self.config)
        };
        Orchestrator::new(settings, Arc::new(MakeFirmware::default()), SessionRegistry::new())
    }

    /// Orchestrator reserving IoT-LAB nodes, `None` without credentials.
    pub fn iotlab_orchestrator(&self) -> Option<Orchestrator> {
        let path = Credentials::default_path()?;
        let credentials = match Credentials::load(&path) {
            Ok(credentials) => credentials,
            Err(e) => {
                println!("Skipping IoT-LAB test: {e}");
                return None;
            }
        };
        let iotlab = &self.config.iotlab;
        let api = RestTestbed::new(iotlab.api_url.clone(), credentials, iotlab.request_timeout()).ok()?;
        let client = ExperimentClient::new(Arc::new(api), iotlab.poll_interval(), iotlab.wait_timeout());
        let orchestrator = Orchestrator::new(
            OrchestratorSettings::from_config(&self.config),
            Arc::new(MakeFirmware::default()),
            SessionRegistry::new(),
        );
        Some(orchestrator.with_testbed(Arc::new(client)))
    }
}

pub fn ctx(module: &str, function: &str) -> LogContext {
    LogContext::now(module, function)
}
