//! One IoT-LAB experiment: a bounded reservation of remote nodes.

use super::{ExperimentClient, ExperimentState, ReservationError, ReservationId};
use crate::boards::{self, ConfigurationError, NodeSpec};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{info, warn};

/// A remote node of an experiment, bound to an address once running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteNode {
    pub spec: NodeSpec,
    pub board: String,
    pub address: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Created,
    Reserved,
    Running,
    Stopped,
}

#[derive(Debug)]
struct Inner {
    phase: Phase,
    /// Present only while the testbed holds a reservation for us.
    reservation: Option<ReservationId>,
    nodes: Vec<RemoteNode>,
}

/// Reservation lifecycle `created → reserved → running → stopped`.
///
/// [`stop`](Self::stop) releases the reservation exactly once, however often
/// it is called and whichever phase the experiment reached.
#[derive(Debug)]
pub struct Experiment {
    name: String,
    site: String,
    client: Arc<ExperimentClient>,
    inner: Mutex<Inner>,
}

impl Experiment {
    /// Validate `specs` for `site`; nothing is submitted yet.
    pub fn new(
        name: impl Into<String>,
        site: impl Into<String>,
        specs: Vec<NodeSpec>,
        client: Arc<ExperimentClient>,
    ) -> Result<Self, ConfigurationError> {
        let site = site.into();
        let nodes = specs
            .into_iter()
            .map(|spec| {
                let board = boards::validate(&spec, &site)?;
                Ok(RemoteNode {
                    address: spec.address.clone(),
                    spec,
                    board,
                })
            })
            .collect::<Result<Vec<_>, ConfigurationError>>()?;
        Ok(Self {
            name: name.into(),
            site,
            client,
            inner: Mutex::new(Inner {
                phase: Phase::Created,
                reservation: None,
                nodes,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn site(&self) -> &str {
        &self.site
    }

    pub fn phase(&self) -> Phase {
        self.inner.lock().phase
    }

    pub fn reservation_id(&self) -> Option<ReservationId> {
        self.inner.lock().reservation
    }

    pub fn nodes(&self) -> Vec<RemoteNode> {
        self.inner.lock().nodes.clone()
    }

    /// Submit, wait until running and bind every node to an address.
    ///
    /// If any step fails after the submission, the partial reservation is
    /// released before the error is returned.
    pub async fn start(&self, duration: u32) -> Result<Vec<RemoteNode>, ReservationError> {
        let specs: Vec<NodeSpec> = self.inner.lock().nodes.iter().map(|n| n.spec.clone()).collect();

        let id = self.client.submit(&self.name, &self.site, &specs, duration).await?;
        let swept = {
            let mut inner = self.inner.lock();
            if inner.phase == Phase::Stopped {
                true
            } else {
                inner.reservation = Some(id);
                inner.phase = Phase::Reserved;
                false
            }
        };
        if swept {
            // Stopped while the submission was in flight.
            if let Err(e) = self.client.stop(id).await {
                warn!(experiment = %self.name, %id, "release after sweep failed: {e}");
            }
            return Err(ReservationError::Failed {
                id,
                state: ExperimentState::Stopped,
            });
        }

        let bound = match self.bind(id, &specs).await {
            Ok(bound) => bound,
            Err(e) => {
                warn!(experiment = %self.name, %id, "experiment failed to start: {e}");
                if let Err(stop_err) = self.stop().await {
                    warn!(experiment = %self.name, %id, "cleanup failed: {stop_err}");
                }
                return Err(e);
            }
        };

        let mut inner = self.inner.lock();
        if inner.phase == Phase::Stopped {
            // Swept while we were waiting.
            return Err(ReservationError::Failed {
                id,
                state: ExperimentState::Stopped,
            });
        }
        for (node, address) in inner.nodes.iter_mut().zip(bound) {
            node.address = Some(address);
        }
        inner.phase = Phase::Running;
        info!(experiment = %self.name, %id, "experiment running");
        Ok(inner.nodes.clone())
    }

    async fn bind(&self, id: ReservationId, specs: &[NodeSpec]) -> Result<Vec<String>, ReservationError> {
        self.client.wait(id).await?;
        self.client.resolve_addresses(id, specs).await
    }

    /// Release the reservation if one is held. Returns whether a release
    /// was sent to the testbed.
    pub async fn stop(&self) -> Result<bool, ReservationError> {
        let taken = {
            let mut inner = self.inner.lock();
            inner.phase = Phase::Stopped;
            inner.reservation.take()
        };
        match taken {
            Some(id) => self.client.stop(id).await,
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testbed::MockTestbed;
    use std::time::Duration;

    fn setup(api: MockTestbed) -> (Arc<MockTestbed>, Arc<ExperimentClient>) {
        let api = Arc::new(api);
        let client = Arc::new(ExperimentClient::new(
            api.clone(),
            Duration::from_millis(1),
            Duration::from_millis(100),
        ));
        (api, client)
    }

    #[tokio::test]
    async fn test_start_binds_addresses() {
        let (_, client) = setup(MockTestbed::new());
        let exp = Experiment::new(
            "exp",
            "saclay",
            vec![NodeSpec::board("iotlab-m3"), NodeSpec::board("iotlab-m3")],
            client,
        )
        .unwrap();
        let nodes = exp.start(60).await.unwrap();
        assert_eq!(nodes[0].address.as_deref(), Some("m3-1.saclay.iot-lab.info"));
        assert_eq!(nodes[1].address.as_deref(), Some("m3-2.saclay.iot-lab.info"));
        assert_eq!(exp.phase(), Phase::Running);
        assert_eq!(exp.reservation_id(), Some(ReservationId(1)));
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let (api, client) = setup(MockTestbed::new());
        let exp = Experiment::new("exp", "saclay", vec![NodeSpec::board("iotlab-m3")], client).unwrap();
        exp.start(60).await.unwrap();
        assert!(exp.stop().await.unwrap());
        assert!(!exp.stop().await.unwrap());
        assert_eq!(api.stop_count(ReservationId(1)), 1);
        assert_eq!(exp.phase(), Phase::Stopped);
    }

    #[tokio::test]
    async fn test_stop_before_start_is_a_noop() {
        let (api, client) = setup(MockTestbed::new());
        let exp = Experiment::new("exp", "saclay", vec![NodeSpec::board("iotlab-m3")], client).unwrap();
        assert!(!exp.stop().await.unwrap());
        assert_eq!(api.total_stops(), 0);
    }

    #[tokio::test]
    async fn test_failed_wait_releases_once() {
        let (api, client) = setup(MockTestbed::new().with_states(vec![ExperimentState::Error]));
        let exp = Experiment::new("exp", "saclay", vec![NodeSpec::board("iotlab-m3")], client).unwrap();
        let err = exp.start(60).await.unwrap_err();
        assert!(matches!(err, ReservationError::Failed { .. }));
        assert_eq!(api.stop_count(ReservationId(1)), 1);
        assert!(!exp.stop().await.unwrap());
        assert_eq!(api.stop_count(ReservationId(1)), 1);
    }

    #[tokio::test]
    async fn test_stopped_during_submit_reports_stopped_state() {
        let (api, client) = setup(MockTestbed::new());
        api.fail_stop(500, "internal error");
        let exp = Experiment::new("exp", "saclay", vec![NodeSpec::board("iotlab-m3")], client).unwrap();
        // A sweep before the submission returns leaves the phase Stopped.
        exp.stop().await.unwrap();

        let err = exp.start(60).await.unwrap_err();
        assert!(matches!(
            err,
            ReservationError::Failed {
                state: ExperimentState::Stopped,
                ..
            }
        ));
        assert_eq!(api.stop_count(ReservationId(1)), 1);
        assert_eq!(exp.reservation_id(), None);
    }

    #[tokio::test]
    async fn test_invalid_spec_is_rejected_up_front() {
        let (_, client) = setup(MockTestbed::new());
        let err = Experiment::new(
            "exp",
            "saclay",
            vec![NodeSpec {
                board: Some("iotlab-m3".into()),
                address: Some("samr21-3.saclay.iot-lab.info".into()),
            }],
            client,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigurationError::BoardMismatch { .. }));
    }
}
