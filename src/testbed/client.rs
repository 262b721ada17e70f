//! Reservation workflow on top of [`TestbedApi`]: submit, wait, resolve,
//! stop.

use super::{
    ExperimentRequest, ExperimentState, ReservationError, ReservationId, Resources, TestbedApi,
};
use crate::boards::{self, ConfigurationError, NodeSpec};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Board requested through testbed aliases whenever possible: M3 nodes
/// report themselves as broken, so the testbed never hands out a dead one.
const ALIAS_BOARD: &str = "iotlab-m3";

#[derive(Debug)]
pub struct ExperimentClient {
    api: Arc<dyn TestbedApi>,
    poll_interval: Duration,
    wait_timeout: Duration,
    released: Mutex<HashSet<ReservationId>>,
}

impl ExperimentClient {
    pub fn new(api: Arc<dyn TestbedApi>, poll_interval: Duration, wait_timeout: Duration) -> Self {
        Self {
            api,
            poll_interval,
            wait_timeout,
            released: Mutex::new(HashSet::new()),
        }
    }

    pub fn api(&self) -> &Arc<dyn TestbedApi> {
        &self.api
    }

    /// Submit an experiment for `specs` at `site` lasting `duration`
    /// minutes.
    ///
    /// Every spec must be valid for `site`; API errors are returned as the
    /// testbed reported them, without retrying.
    pub async fn submit(
        &self,
        name: &str,
        site: &str,
        specs: &[NodeSpec],
        duration: u32,
    ) -> Result<ReservationId, ReservationError> {
        boards::common_site(specs)?;
        for spec in specs {
            boards::validate(spec, site)?;
        }
        let resources = self.select_resources(site, specs).await?;
        info!(%name, %site, nodes = resources.len(), duration, "submitting experiment");
        let id = self
            .api
            .submit(&ExperimentRequest {
                name: name.to_string(),
                duration,
                resources,
            })
            .await?;
        info!(%id, "experiment submitted");
        Ok(id)
    }

    /// Decide what to ask the testbed for.
    ///
    /// Alias and physical nodes cannot be mixed in one experiment, so aliases
    /// are only used when every spec is a plain `iotlab-m3`. Otherwise each
    /// board-only spec is pinned to the first alive node of its architecture
    /// not already requested.
    pub async fn select_resources(
        &self,
        site: &str,
        specs: &[NodeSpec],
    ) -> Result<Resources, ReservationError> {
        let all_alias = !specs.is_empty()
            && specs
                .iter()
                .all(|s| s.address.is_none() && s.board.as_deref() == Some(ALIAS_BOARD));
        if all_alias {
            let archi = boards::lookup(ALIAS_BOARD)
                .map(|entry| entry.archi())
                .ok_or_else(|| ConfigurationError::UnsupportedBoard(ALIAS_BOARD.to_string()))?;
            return Ok(Resources::Alias {
                count: specs.len(),
                archi,
                site: site.to_string(),
            });
        }

        let mut claimed: Vec<String> = specs.iter().filter_map(|s| s.address.clone()).collect();
        let needs_inventory = specs.iter().any(|s| s.address.is_none());
        let inventory = if needs_inventory {
            self.api.site_nodes(site).await?
        } else {
            Vec::new()
        };

        let mut addresses = Vec::with_capacity(specs.len());
        for spec in specs {
            if let Some(address) = &spec.address {
                addresses.push(address.clone());
                continue;
            }
            let board = spec.board.as_deref().ok_or(ConfigurationError::MissingBoard)?;
            let entry = boards::lookup(board)
                .ok_or_else(|| ConfigurationError::UnsupportedBoard(board.to_string()))?;
            let chosen = inventory
                .iter()
                .filter(|node| node.is_alive())
                .map(|node| &node.network_address)
                .find(|addr| entry.matches_address(addr) && !claimed.contains(*addr))
                .cloned()
                .ok_or_else(|| ReservationError::NoNodeAvailable {
                    name: entry.name.to_string(),
                    site: site.to_string(),
                })?;
            debug!(%board, address = %chosen, "selected node");
            claimed.push(chosen.clone());
            addresses.push(chosen);
        }
        Ok(Resources::Physical { addresses })
    }

    /// Poll until the experiment is `Running`.
    pub async fn wait(&self, id: ReservationId) -> Result<(), ReservationError> {
        let started = Instant::now();
        info!(%id, "waiting for experiment to go to state \"Running\"");
        loop {
            let state = self.api.state(id).await?;
            debug!(%id, %state, "experiment state");
            if state == ExperimentState::Running {
                info!(%id, waited = ?started.elapsed(), "experiment running");
                return Ok(());
            }
            if state.is_terminal() {
                return Err(ReservationError::Failed { id, state });
            }
            if started.elapsed() >= self.wait_timeout {
                return Err(ReservationError::Timeout {
                    id,
                    waited: started.elapsed(),
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Addresses reserved for `id`, one per spec, in spec order.
    pub async fn resolve_addresses(
        &self,
        id: ReservationId,
        specs: &[NodeSpec],
    ) -> Result<Vec<String>, ReservationError> {
        let reserved = self.api.nodes(id).await?;
        debug!(%id, ?reserved, "reserved nodes");
        match_addresses(specs, reserved)
    }

    /// Release the reservation. Releasing an id twice is a no-op; returns
    /// whether the API was called.
    pub async fn stop(&self, id: ReservationId) -> Result<bool, ReservationError> {
        if !self.released.lock().insert(id) {
            debug!(%id, "experiment already released");
            return Ok(false);
        }
        info!(%id, "stopping experiment");
        if let Err(e) = self.api.stop(id).await {
            warn!(%id, "stopping experiment failed: {e}");
            return Err(e);
        }
        Ok(true)
    }
}

/// Bind reserved addresses to specs.
///
/// Explicit addresses claim themselves first. Each board-only spec then takes
/// the first unclaimed address, in API order, whose prefix is the spec's
/// architecture name. No address is used twice and every spec gets one, or
/// the whole match fails.
pub fn match_addresses(
    specs: &[NodeSpec],
    reserved: Vec<String>,
) -> Result<Vec<String>, ReservationError> {
    let mut free: Vec<Option<String>> = reserved.into_iter().map(Some).collect();
    let mut bound: Vec<Option<String>> = vec![None; specs.len()];

    for (slot, spec) in bound.iter_mut().zip(specs) {
        let Some(address) = &spec.address else {
            continue;
        };
        let pos = free
            .iter()
            .position(|a| a.as_deref() == Some(address.as_str()))
            .ok_or_else(|| ReservationError::Unmatched(address.clone()))?;
        *slot = free[pos].take();
    }

    for (slot, spec) in bound.iter_mut().zip(specs) {
        if slot.is_some() {
            continue;
        }
        let board = spec.board.as_deref().ok_or(ConfigurationError::MissingBoard)?;
        let entry = boards::lookup(board)
            .ok_or_else(|| ConfigurationError::UnsupportedBoard(board.to_string()))?;
        let pos = free
            .iter()
            .position(|a| a.as_deref().is_some_and(|a| entry.matches_address(a)))
            .ok_or_else(|| ReservationError::Unmatched(board.to_string()))?;
        *slot = free[pos].take();
    }

    bound
        .into_iter()
        .zip(specs)
        .map(|(slot, spec)| slot.ok_or_else(|| ReservationError::Unmatched(format!("{spec:?}"))))
        .collect()
}
