//! In-memory [`FirmwareTool`] for tests.

use super::{FirmwareError, FirmwareTarget, FirmwareTool};
use crate::term::{MockTransport, Transport};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

type ShellFactory = Box<dyn Fn(&FirmwareTarget) -> MockTransport + Send + Sync>;

/// Records every build/flash/attach and hands out [`MockTransport`]s.
///
/// By default each attached node runs a shell that only prints the prompt;
/// [`with_shell`](Self::with_shell) installs a factory for device behaviour.
pub struct MockFirmware {
    factory: ShellFactory,
    calls: Mutex<Vec<String>>,
    failing_builds: Mutex<HashSet<String>>,
    failing_flashes: Mutex<HashSet<String>>,
    terminals: Mutex<Vec<MockTransport>>,
    journal: Option<Arc<Mutex<Vec<String>>>>,
}

impl MockFirmware {
    pub fn new() -> Self {
        Self {
            factory: Box::new(|target| MockTransport::riot_shell(target.node.clone(), |_| None)),
            calls: Mutex::new(Vec::new()),
            failing_builds: Mutex::new(HashSet::new()),
            failing_flashes: Mutex::new(HashSet::new()),
            terminals: Mutex::new(Vec::new()),
            journal: None,
        }
    }

    pub fn with_shell<F>(mut self, factory: F) -> Self
    where
        F: Fn(&FirmwareTarget) -> MockTransport + Send + Sync + 'static,
    {
        self.factory = Box::new(factory);
        self
    }

    /// Share a journal with other mocks; attached terminals write into it
    /// too.
    pub fn with_journal(mut self, journal: Arc<Mutex<Vec<String>>>) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Make builds for `node` fail.
    pub fn fail_build(&self, node: &str) {
        self.failing_builds.lock().insert(node.to_string());
    }

    pub fn fail_flash(&self, node: &str) {
        self.failing_flashes.lock().insert(node.to_string());
    }

    /// Calls in order, as `"<step> <node>"`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Clones of every terminal handed out, in attach order.
    pub fn terminals(&self) -> Vec<MockTransport> {
        self.terminals.lock().clone()
    }

    /// The most recent terminal attached for `node`.
    pub fn terminal(&self, node: &str) -> Option<MockTransport> {
        self.terminals
            .lock()
            .iter()
            .rev()
            .find(|t| t.name() == node)
            .cloned()
    }

    fn record(&self, step: &str, target: &FirmwareTarget) {
        let entry = format!("{step} {}", target.node);
        if let Some(journal) = &self.journal {
            journal.lock().push(entry.clone());
        }
        self.calls.lock().push(entry);
    }
}

impl Default for MockFirmware {
    fn default() -> Self {
        Self::new()
    }
}

impl FirmwareTool for MockFirmware {
    fn build(&self, target: &FirmwareTarget) -> Result<(), FirmwareError> {
        self.record("build", target);
        if self.failing_builds.lock().contains(&target.node) {
            return Err(FirmwareError::Build {
                node: target.node.clone(),
                board: target.board.clone(),
                app: target.app_name(),
                code: Some(2),
                output: "make: *** [all] Error 2".into(),
            });
        }
        Ok(())
    }

    fn flash(&self, target: &FirmwareTarget) -> Result<(), FirmwareError> {
        self.record("flash", target);
        if self.failing_flashes.lock().contains(&target.node) {
            return Err(FirmwareError::Flash {
                node: target.node.clone(),
                board: target.board.clone(),
                app: target.app_name(),
                code: Some(1),
                output: "Error: unable to open the device".into(),
            });
        }
        Ok(())
    }

    fn attach(&self, target: &FirmwareTarget) -> Result<Box<dyn Transport>, FirmwareError> {
        self.record("attach", target);
        let mut terminal = (self.factory)(target);
        if let Some(journal) = &self.journal {
            terminal = terminal.with_journal(journal.clone());
        }
        self.terminals.lock().push(terminal.clone());
        Ok(Box::new(terminal))
    }
}

impl std::fmt::Debug for MockFirmware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockFirmware")
            .field("calls", &self.calls.lock().len())
            .field("terminals", &self.terminals.lock().len())
            .finish()
    }
}
