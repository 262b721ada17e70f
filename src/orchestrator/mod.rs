//! Per-test composition: acquire nodes, hand them to the test body, release
//! them whatever happens.
//!
//! Local specs never touch the testbed. Remote specs of one test share a
//! single [`Experiment`]. Teardown always stops the node controllers first
//! and releases the experiment second, so no board vanishes while its
//! terminal is still attached.

use crate::boards::{self, ConfigurationError, NodeSpec};
use crate::config::{Config, ShellConfig};
use crate::firmware::FirmwareTool;
use crate::node::{EnvOverrides, LogContext, Node, NodeController, SharedController};
use crate::testbed::{Experiment, ExperimentClient, RemoteNode, ReservationError};
use crate::HarnessError;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub mod gather;
pub mod registry;

pub use gather::{gather, BoxedOp, Gathered, TaskOutcome};
pub use registry::{SessionRegistry, SweepReport, TrackId};

/// Knobs of one test session.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorSettings {
    pub site: String,
    /// Sites the testbed accepts.
    pub sites: Vec<String>,
    /// Experiment duration in minutes.
    pub duration_min: u32,
    /// Run every node locally, never reserving testbed nodes.
    pub local: bool,
    pub build_in_docker: bool,
    pub hide_output: bool,
    /// Terminal log template; `None` disables `TERMLOG`, as does
    /// `hide_output`.
    pub log_file_fmt: Option<String>,
    pub log_dir: PathBuf,
    pub shell: ShellConfig,
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            site: config.iotlab.site.clone(),
            sites: config.iotlab.sites.clone(),
            duration_min: config.iotlab.experiment_duration_min,
            local: false,
            build_in_docker: config.riot.build_in_docker,
            hide_output: false,
            log_file_fmt: None,
            log_dir: PathBuf::from("."),
            shell: config.shell.clone(),
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Name of the experiment reserved for one test.
pub fn experiment_name(test: &LogContext) -> String {
    format!("RIOT-release-test-{}-{}", test.module, test.function)
}

/// Resolve once the operator interrupts the process. Never resolves if
/// interrupts cannot be observed.
pub async fn interrupt_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("cannot listen for interrupts: {e}");
        std::future::pending::<()>().await;
    }
}

/// The controllers of one test, in the order their specs were given.
#[derive(Debug, Clone, Default)]
pub struct NodeSet {
    nodes: Vec<SharedController>,
}

impl NodeSet {
    pub fn new(nodes: Vec<SharedController>) -> Self {
        Self { nodes }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&SharedController> {
        self.nodes.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SharedController> {
        self.nodes.iter()
    }

    /// First node running `board`.
    pub fn by_board(&self, board: &str) -> Option<&SharedController> {
        self.nodes.iter().find(|ctrl| ctrl.lock().node().board() == board)
    }

    /// Select `app_dir` on every node.
    pub fn configure(&self, app_dir: &Path, overrides: &EnvOverrides) {
        for ctrl in &self.nodes {
            ctrl.lock().configure(app_dir, overrides);
        }
    }

    /// Start one node on the blocking pool.
    pub async fn start_node(&self, index: usize) -> Result<(), HarnessError> {
        let ctrl = self
            .nodes
            .get(index)
            .cloned()
            .ok_or_else(|| HarnessError::Task(format!("no node {index}")))?;
        tokio::task::spawn_blocking(move || ctrl.lock().start())
            .await
            .map_err(|e| HarnessError::Task(e.to_string()))??;
        Ok(())
    }

    /// Build, flash and attach every node concurrently.
    pub async fn start_all(&self, timeout: Duration) -> Result<(), HarnessError> {
        let ops = self.nodes.iter().cloned().map(|ctrl| move || ctrl.lock().start());
        for started in gather(ops, timeout).await.into_results()? {
            started?;
        }
        Ok(())
    }
}

enum Slot {
    Local(String),
    Remote(usize),
}

/// Nodes acquired for one test. Must be given back with
/// [`release`](Self::release); anything not released stays in the
/// [`SessionRegistry`] for the interrupt sweep.
#[derive(Debug)]
pub struct Acquisition {
    nodes: NodeSet,
    tracked: Vec<TrackId>,
    experiment: Option<(Arc<Experiment>, TrackId)>,
    registry: Arc<SessionRegistry>,
}

impl Acquisition {
    pub fn nodes(&self) -> &NodeSet {
        &self.nodes
    }

    pub fn node_by_board(&self, board: &str) -> Option<&SharedController> {
        self.nodes.by_board(board)
    }

    pub fn experiment(&self) -> Option<&Arc<Experiment>> {
        self.experiment.as_ref().map(|(exp, _)| exp)
    }

    /// Stop every controller, then release the experiment.
    ///
    /// Every step runs even if an earlier one fails; the first error is
    /// returned.
    pub async fn release(self) -> Result<(), HarnessError> {
        let mut first_error: Option<HarnessError> = None;

        for (ctrl, id) in self.nodes.nodes.iter().cloned().zip(self.tracked) {
            let stopped = tokio::task::spawn_blocking(move || {
                let mut ctrl = ctrl.lock();
                let name = ctrl.name();
                ctrl.stop().map_err(|e| (name, e))
            })
            .await;
            match stopped {
                Ok(Ok(())) => {}
                Ok(Err((name, e))) => {
                    warn!(node = %name, "stop failed: {e}");
                    first_error.get_or_insert(e.into());
                }
                Err(e) => {
                    first_error.get_or_insert(HarnessError::Task(e.to_string()));
                }
            }
            self.registry.untrack(id);
        }

        if let Some((experiment, id)) = self.experiment {
            if let Err(e) = experiment.stop().await {
                warn!(experiment = %experiment.name(), "release failed: {e}");
                first_error.get_or_insert(e.into());
            }
            self.registry.untrack(id);
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Acquires and releases the nodes of each test.
#[derive(Debug)]
pub struct Orchestrator {
    settings: OrchestratorSettings,
    firmware: Arc<dyn FirmwareTool>,
    testbed: Option<Arc<ExperimentClient>>,
    registry: Arc<SessionRegistry>,
}

impl Orchestrator {
    pub fn new(
        settings: OrchestratorSettings,
        firmware: Arc<dyn FirmwareTool>,
        registry: Arc<SessionRegistry>,
    ) -> Self {
        Self {
            settings,
            firmware,
            testbed: None,
            registry,
        }
    }

    /// Allow remote specs, reserved through `client`.
    pub fn with_testbed(mut self, client: Arc<ExperimentClient>) -> Self {
        self.testbed = Some(client);
        self
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    fn plan(&self, specs: &[NodeSpec]) -> Result<(Vec<Slot>, Vec<NodeSpec>), ConfigurationError> {
        let mut slots = Vec::with_capacity(specs.len());
        let mut remote = Vec::new();
        for spec in specs {
            if self.settings.local || spec.is_local() {
                let board = spec.board.clone().ok_or(ConfigurationError::MissingBoard)?;
                slots.push(Slot::Local(board));
            } else {
                slots.push(Slot::Remote(remote.len()));
                remote.push(spec.clone());
            }
        }
        Ok((slots, remote))
    }

    /// Acquire nodes for `specs`.
    ///
    /// Only the remote specs go into an experiment, which is running when
    /// this returns. Controllers are created unstarted; they build, flash
    /// and attach on first use.
    pub async fn acquire(&self, test: &LogContext, specs: &[NodeSpec]) -> Result<Acquisition, HarnessError> {
        let (slots, remote_specs) = self.plan(specs)?;

        let experiment = if remote_specs.is_empty() {
            debug!(nodes = specs.len(), "all nodes local, no experiment");
            None
        } else {
            let client = self
                .testbed
                .clone()
                .ok_or_else(|| ReservationError::Credentials("no IoT-LAB client configured".into()))?;
            boards::check_site(&self.settings.site, &self.settings.sites)?;
            let experiment = Arc::new(Experiment::new(
                experiment_name(test),
                self.settings.site.clone(),
                remote_specs,
                client,
            )?);
            let id = self.registry.track_experiment(experiment.clone());
            match experiment.start(self.settings.duration_min).await {
                Ok(remote) => Some((experiment, id, remote)),
                Err(e) => {
                    self.registry.untrack(id);
                    return Err(e.into());
                }
            }
        };

        let remote: &[RemoteNode] = experiment.as_ref().map(|(_, _, r)| r.as_slice()).unwrap_or(&[]);
        let exp_id = experiment
            .as_ref()
            .and_then(|(exp, _, _)| exp.reservation_id())
            .map(|id| id.0)
            .unwrap_or_default();

        let mut nodes = Vec::with_capacity(slots.len());
        for (index, slot) in slots.into_iter().enumerate() {
            let node = match slot {
                Slot::Local(board) => Node::local(index, board),
                Slot::Remote(i) => match remote.get(i).and_then(|r| Some((r, r.address.clone()?))) {
                    Some((r, address)) => Node::remote(index, r.board.clone(), address, exp_id),
                    None => {
                        if let Some((exp, id, _)) = &experiment {
                            if let Err(e) = exp.stop().await {
                                warn!("release after binding failure failed: {e}");
                            }
                            self.registry.untrack(*id);
                        }
                        return Err(ReservationError::Unmatched(format!("node {index}")).into());
                    }
                },
            };
            nodes.push(node);
        }

        let mut controllers = Vec::with_capacity(nodes.len());
        let mut tracked = Vec::with_capacity(nodes.len());
        let termlog = self.settings.log_file_fmt.as_deref().filter(|_| !self.settings.hide_output);
        for mut node in nodes {
            if let Some(template) = termlog {
                let path = node.set_termlog(template, test, &self.settings.log_dir);
                debug!(node = %node.name(), path = %path.display(), "terminal log");
            }
            let ctrl = NodeController::new(node, self.firmware.clone(), &self.settings.shell)
                .with_build_in_docker(self.settings.build_in_docker)
                .with_hidden_output(self.settings.hide_output)
                .into_shared();
            tracked.push(self.registry.track_controller(ctrl.clone()));
            controllers.push(ctrl);
        }

        info!(
            test = %format!("{}::{}", test.module, test.function),
            nodes = controllers.len(),
            remote = remote.len(),
            "nodes acquired"
        );
        Ok(Acquisition {
            nodes: NodeSet::new(controllers),
            tracked,
            experiment: experiment.map(|(exp, id, _)| (exp, id)),
            registry: self.registry.clone(),
        })
    }

    /// Acquire nodes, run `body` with them and release them, stopping early
    /// on Ctrl-C.
    pub async fn run<F, Fut, T>(&self, test: &LogContext, specs: &[NodeSpec], body: F) -> Result<T, HarnessError>
    where
        F: FnOnce(NodeSet) -> Fut,
        Fut: Future<Output = Result<T, HarnessError>>,
    {
        self.run_until(test, specs, body, interrupt_signal()).await
    }

    /// [`run`](Self::run) with an explicit interrupt source.
    ///
    /// Release happens after the body returns, fails, panics or is
    /// interrupted. A panic is resumed once everything is released; an
    /// interrupt yields [`HarnessError::Interrupted`]. An interrupt while
    /// nodes are still being acquired sweeps the registry instead, which
    /// releases a reservation that is already submitted.
    pub async fn run_until<F, Fut, T, I>(
        &self,
        test: &LogContext,
        specs: &[NodeSpec],
        body: F,
        interrupt: I,
    ) -> Result<T, HarnessError>
    where
        F: FnOnce(NodeSet) -> Fut,
        Fut: Future<Output = Result<T, HarnessError>>,
        I: Future<Output = ()>,
    {
        // Polled from here on, so signal listeners are installed before the
        // reservation is submitted.
        tokio::pin!(interrupt);

        let acquisition = tokio::select! {
            acquired = self.acquire(test, specs) => acquired?,
            _ = &mut interrupt => {
                warn!(test = %test.function, "interrupted while acquiring nodes");
                let report = self.registry.sweep().await;
                debug!(
                    controllers = report.controllers,
                    experiments = report.experiments,
                    "released partial acquisition"
                );
                return Err(HarnessError::Interrupted);
            }
        };
        let nodes = acquisition.nodes().clone();

        let outcome = tokio::select! {
            finished = AssertUnwindSafe(body(nodes)).catch_unwind() => Some(finished),
            _ = &mut interrupt => None,
        };
        if outcome.is_none() {
            warn!(test = %test.function, "interrupted, releasing nodes");
        }
        let released = acquisition.release().await;

        match outcome {
            Some(Ok(result)) => {
                let value = result?;
                released?;
                Ok(value)
            }
            Some(Err(panic)) => std::panic::resume_unwind(panic),
            None => {
                if let Err(e) = released {
                    warn!("release after interrupt failed: {e}");
                }
                Err(HarnessError::Interrupted)
            }
        }
    }
}
