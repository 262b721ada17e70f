//! Node controller: build, flash, attach and talk to one node.

use super::{EnvOverrides, Node, NodeError};
use crate::config::ShellConfig;
use crate::firmware::{FirmwareTarget, FirmwareTool};
use crate::term::{MatchResult, ShellError, ShellSession};
use regex::Regex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A controller shared between the orchestrator, the test body and the
/// interrupt sweep.
pub type SharedController = Arc<parking_lot::Mutex<NodeController>>;

/// `Unstarted → Building → Flashing → Attached → Interacting → Stopped`.
///
/// `Stopped` is terminal and reachable from every state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Unstarted,
    Building,
    Flashing,
    Attached,
    Interacting,
    Stopped,
}

#[derive(Debug)]
pub struct NodeController {
    node: Node,
    firmware: Arc<dyn FirmwareTool>,
    app_dir: Option<PathBuf>,
    session: Option<ShellSession>,
    state: ControllerState,
    prompt: String,
    command_timeout: Duration,
    reboot_timeout: Duration,
    build_in_docker: bool,
    hide_output: bool,
}

impl NodeController {
    pub fn new(node: Node, firmware: Arc<dyn FirmwareTool>, shell: &ShellConfig) -> Self {
        Self {
            node,
            firmware,
            app_dir: None,
            session: None,
            state: ControllerState::Unstarted,
            prompt: shell.prompt.clone(),
            command_timeout: shell.command_timeout(),
            reboot_timeout: shell.reboot_timeout(),
            build_in_docker: false,
            hide_output: false,
        }
    }

    pub fn with_build_in_docker(mut self, enabled: bool) -> Self {
        self.build_in_docker = enabled;
        self
    }

    pub fn with_hidden_output(mut self, hide: bool) -> Self {
        self.hide_output = hide;
        self
    }

    pub fn into_shared(self) -> SharedController {
        Arc::new(parking_lot::Mutex::new(self))
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn node_mut(&mut self) -> &mut Node {
        &mut self.node
    }

    pub fn name(&self) -> String {
        self.node.name()
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    pub fn reboot_timeout(&self) -> Duration {
        self.reboot_timeout
    }

    /// Select the application to run and apply environment overrides. Takes
    /// effect on the next start.
    pub fn configure(&mut self, app_dir: impl Into<PathBuf>, overrides: &EnvOverrides) {
        self.app_dir = Some(app_dir.into());
        overrides.apply(self.node.env_mut(), self.build_in_docker);
    }

    fn target(&self) -> Result<FirmwareTarget, NodeError> {
        let app_dir = self
            .app_dir
            .clone()
            .ok_or_else(|| NodeError::NoApplication(self.name()))?;
        Ok(FirmwareTarget {
            node: self.name(),
            board: self.node.board().to_string(),
            app_dir,
            env: self.node.env().clone(),
        })
    }

    /// Build, flash and attach the terminal.
    ///
    /// Any failure leaves the controller `Stopped`; nothing it started is
    /// left running.
    pub fn start(&mut self) -> Result<(), NodeError> {
        match self.state {
            ControllerState::Stopped => return Err(ShellError::Stopped(self.name()).into()),
            ControllerState::Attached | ControllerState::Interacting => return Ok(()),
            _ => {}
        }
        let result = self.bring_up();
        if result.is_err() {
            self.force_stop();
        }
        result
    }

    fn bring_up(&mut self) -> Result<(), NodeError> {
        let target = self.target()?;

        self.state = ControllerState::Building;
        self.firmware.build(&target)?;

        self.state = ControllerState::Flashing;
        self.firmware.flash(&target)?;

        let transport = self.firmware.attach(&target)?;
        let session =
            ShellSession::new(self.name(), transport, &self.prompt).hide_output(self.hide_output);
        self.session = Some(session);
        self.state = ControllerState::Attached;
        info!(node = %self.name(), "terminal attached");
        Ok(())
    }

    /// Start the node if this is its first interaction.
    pub fn ensure_started(&mut self) -> Result<(), NodeError> {
        if self.session.is_none() {
            self.start()?;
        }
        Ok(())
    }

    fn session(&mut self) -> Result<&mut ShellSession, NodeError> {
        self.ensure_started()?;
        self.state = ControllerState::Interacting;
        let name = self.name();
        self.session
            .as_mut()
            .ok_or_else(|| ShellError::Stopped(name).into())
    }

    /// Write `command` and wait for `pattern`.
    pub fn send_and_expect(
        &mut self,
        command: &str,
        pattern: &Regex,
        timeout: Duration,
    ) -> Result<MatchResult, NodeError> {
        let session = self.session()?;
        session.send_line(command)?;
        Ok(session.expect(pattern, timeout)?)
    }

    /// Wait for any of `patterns` without sending anything.
    pub fn expect_any(
        &mut self,
        patterns: &[Regex],
        timeout: Duration,
    ) -> Result<(usize, MatchResult), NodeError> {
        Ok(self.session()?.expect_any(patterns, timeout)?)
    }

    /// Run one shell command and return its output.
    pub fn cmd(&mut self, command: &str) -> Result<String, NodeError> {
        let timeout = self.command_timeout;
        self.cmd_timeout(command, timeout)
    }

    pub fn cmd_timeout(&mut self, command: &str, timeout: Duration) -> Result<String, NodeError> {
        let session = self.session()?;
        Ok(session.cmd(command, timeout)?)
    }

    /// Close the terminal (killing its process) and enter `Stopped`.
    /// Stopping twice is a no-op.
    pub fn stop(&mut self) -> Result<(), NodeError> {
        let was = self.state;
        self.state = ControllerState::Stopped;
        if let Some(mut session) = self.session.take() {
            info!(node = %self.name(), "stopping terminal");
            session.close()?;
        } else if was != ControllerState::Stopped {
            debug!(node = %self.name(), ?was, "stopped before attaching");
        }
        Ok(())
    }

    fn force_stop(&mut self) {
        if let Err(e) = self.stop() {
            warn!(node = %self.name(), "stop failed: {e}");
        }
    }
}

impl Drop for NodeController {
    fn drop(&mut self) {
        if self.session.is_some() {
            self.force_stop();
        }
    }
}
