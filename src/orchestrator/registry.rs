//! Tracks every running controller and experiment of a test session so an
//! interrupt can release all of them.

use crate::node::SharedController;
use crate::testbed::Experiment;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Handle returned on registration, used to untrack the entry on teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TrackId(u64);

#[derive(Debug, Default)]
struct Tracked {
    next_id: u64,
    controllers: BTreeMap<TrackId, SharedController>,
    experiments: BTreeMap<TrackId, Arc<Experiment>>,
}

/// What a sweep released.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub controllers: usize,
    pub experiments: usize,
    pub errors: Vec<String>,
}

/// Controllers and experiments currently alive in one test session.
///
/// Owned by the session and handed to the orchestrator and the interrupt
/// handler; entries are added on start and removed on stop.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    tracked: Mutex<Tracked>,
}

impl SessionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn next_id(tracked: &mut Tracked) -> TrackId {
        tracked.next_id += 1;
        TrackId(tracked.next_id)
    }

    pub fn track_controller(&self, controller: SharedController) -> TrackId {
        let mut tracked = self.tracked.lock();
        let id = Self::next_id(&mut tracked);
        tracked.controllers.insert(id, controller);
        id
    }

    pub fn track_experiment(&self, experiment: Arc<Experiment>) -> TrackId {
        let mut tracked = self.tracked.lock();
        let id = Self::next_id(&mut tracked);
        tracked.experiments.insert(id, experiment);
        id
    }

    pub fn untrack(&self, id: TrackId) {
        let mut tracked = self.tracked.lock();
        tracked.controllers.remove(&id);
        tracked.experiments.remove(&id);
    }

    pub fn controller_count(&self) -> usize {
        self.tracked.lock().controllers.len()
    }

    pub fn experiment_count(&self) -> usize {
        self.tracked.lock().experiments.len()
    }

    pub fn is_empty(&self) -> bool {
        let tracked = self.tracked.lock();
        tracked.controllers.is_empty() && tracked.experiments.is_empty()
    }

    /// Stop every tracked controller, then release every tracked experiment.
    ///
    /// Errors are collected rather than returned so one failing release
    /// does not leak the rest.
    pub async fn sweep(&self) -> SweepReport {
        let (controllers, experiments) = {
            let mut tracked = self.tracked.lock();
            (
                std::mem::take(&mut tracked.controllers),
                std::mem::take(&mut tracked.experiments),
            )
        };
        let mut report = SweepReport::default();
        if controllers.is_empty() && experiments.is_empty() {
            return report;
        }
        info!(
            controllers = controllers.len(),
            experiments = experiments.len(),
            "sweeping test session"
        );

        for controller in controllers.into_values() {
            // Waits for a command in flight on the controller to finish.
            let stopped = tokio::task::spawn_blocking(move || {
                let mut ctrl = controller.lock();
                let name = ctrl.name();
                ctrl.stop().map_err(|e| format!("{name}: {e}"))
            })
            .await;
            match stopped {
                Ok(Ok(())) => report.controllers += 1,
                Ok(Err(e)) => report.errors.push(e),
                Err(e) => report.errors.push(format!("controller stop panicked: {e}")),
            }
        }

        for experiment in experiments.into_values() {
            match experiment.stop().await {
                Ok(_) => report.experiments += 1,
                Err(e) => report.errors.push(format!("{}: {e}", experiment.name())),
            }
        }

        for error in &report.errors {
            warn!("sweep: {error}");
        }
        report
    }
}
