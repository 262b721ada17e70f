//! In-memory [`TestbedApi`] for tests.

use super::{
    ExperimentRequest, ExperimentState, ReservationError, ReservationId, Resources, TestbedApi,
    TestbedNode,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    /// States returned by successive `state` calls; the last one repeats.
    states: VecDeque<ExperimentState>,
    reserved: HashMap<ReservationId, Vec<String>>,
    /// Overrides what `nodes` returns for every experiment.
    node_order: Option<Vec<String>>,
    inventory: Vec<TestbedNode>,
    submit_error: Option<(u16, String)>,
    stop_error: Option<(u16, String)>,
    calls: Vec<String>,
    requests: Vec<ExperimentRequest>,
    stops: HashMap<ReservationId, u32>,
}

/// Records every call. Experiments are `Running` immediately unless
/// [`with_states`](Self::with_states) says otherwise; alias requests are
/// granted `<name>-<n>.<site>.iot-lab.info` nodes.
#[derive(Debug)]
pub struct MockTestbed {
    state: Mutex<State>,
    journal: Option<Arc<Mutex<Vec<String>>>>,
}

impl MockTestbed {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_id: 1,
                ..State::default()
            }),
            journal: None,
        }
    }

    pub fn with_states(self, states: Vec<ExperimentState>) -> Self {
        self.state.lock().states = states.into();
        self
    }

    pub fn with_inventory(self, inventory: Vec<TestbedNode>) -> Self {
        self.state.lock().inventory = inventory;
        self
    }

    /// Report these addresses for every experiment, in this order.
    pub fn with_reserved_order(self, addresses: Vec<String>) -> Self {
        self.state.lock().node_order = Some(addresses);
        self
    }

    pub fn with_journal(mut self, journal: Arc<Mutex<Vec<String>>>) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Make `submit` fail with an API error.
    pub fn fail_submit(&self, status: u16, body: &str) {
        self.state.lock().submit_error = Some((status, body.to_string()));
    }

    pub fn fail_stop(&self, status: u16, body: &str) {
        self.state.lock().stop_error = Some((status, body.to_string()));
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn requests(&self) -> Vec<ExperimentRequest> {
        self.state.lock().requests.clone()
    }

    /// How often `stop` reached the API for `id`.
    pub fn stop_count(&self, id: ReservationId) -> u32 {
        self.state.lock().stops.get(&id).copied().unwrap_or(0)
    }

    pub fn total_stops(&self) -> u32 {
        self.state.lock().stops.values().sum()
    }

    fn record(&self, state: &mut State, call: String) {
        if let Some(journal) = &self.journal {
            journal.lock().push(format!("testbed: {call}"));
        }
        state.calls.push(call);
    }
}

impl Default for MockTestbed {
    fn default() -> Self {
        Self::new()
    }
}

fn granted(resources: &Resources) -> Vec<String> {
    match resources {
        Resources::Physical { addresses } => addresses.clone(),
        Resources::Alias { count, archi, site } => {
            let name = archi.split(':').next().unwrap_or(archi);
            (1..=*count)
                .map(|n| format!("{name}-{n}.{site}.iot-lab.info"))
                .collect()
        }
    }
}

#[async_trait]
impl TestbedApi for MockTestbed {
    async fn submit(&self, request: &ExperimentRequest) -> Result<ReservationId, ReservationError> {
        let mut state = self.state.lock();
        self.record(&mut state, format!("submit {}", request.name));
        if let Some((status, body)) = state.submit_error.clone() {
            return Err(ReservationError::api(status, body));
        }
        let id = ReservationId(state.next_id);
        state.next_id += 1;
        state.reserved.insert(id, granted(&request.resources));
        state.requests.push(request.clone());
        Ok(id)
    }

    async fn state(&self, id: ReservationId) -> Result<ExperimentState, ReservationError> {
        let mut state = self.state.lock();
        self.record(&mut state, format!("state {id}"));
        let current = if state.states.len() > 1 {
            state.states.pop_front()
        } else {
            state.states.front().cloned()
        };
        Ok(current.unwrap_or(ExperimentState::Running))
    }

    async fn nodes(&self, id: ReservationId) -> Result<Vec<String>, ReservationError> {
        let mut state = self.state.lock();
        self.record(&mut state, format!("nodes {id}"));
        if let Some(order) = &state.node_order {
            return Ok(order.clone());
        }
        state
            .reserved
            .get(&id)
            .cloned()
            .ok_or_else(|| ReservationError::api(404, format!("experiment {id} not found")))
    }

    async fn stop(&self, id: ReservationId) -> Result<(), ReservationError> {
        let mut state = self.state.lock();
        self.record(&mut state, format!("stop {id}"));
        *state.stops.entry(id).or_default() += 1;
        if let Some((status, body)) = state.stop_error.clone() {
            return Err(ReservationError::api(status, body));
        }
        Ok(())
    }

    async fn site_nodes(&self, site: &str) -> Result<Vec<TestbedNode>, ReservationError> {
        let mut state = self.state.lock();
        self.record(&mut state, format!("site_nodes {site}"));
        Ok(state.inventory.clone())
    }
}
