//! Node lifecycle E2E tests: acquire -> start -> interact -> release
//!
//! These tests verify that everything a test acquires is released again:
//! - Local-only runs never reach the testbed
//! - Controllers are stopped before their experiment is released
//! - Failed reservations, failing bodies, panics and interrupts leak nothing
//! - Releasing twice is harmless

use crate::common::*;
use futures::FutureExt;
use release_specs::node::{ControllerState, EnvOverrides, Ifconfig, NodeError, NodeSpec};
use release_specs::orchestrator::{gather, NodeSet, SweepReport};
use release_specs::testbed::{ExperimentState, MockTestbed, ReservationError, ReservationId};
use release_specs::HarnessError;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const START: Duration = Duration::from_secs(5);

fn mixed_specs() -> Vec<NodeSpec> {
    vec![NodeSpec::board("native"), NodeSpec::board("iotlab-m3")]
}

async fn start(nodes: &NodeSet) -> Result<(), HarnessError> {
    nodes.configure(Path::new(APP), &EnvOverrides::default());
    nodes.start_all(START).await
}

fn assert_all_closed(h: &Harness) {
    let terminals = h.firmware.terminals();
    assert!(!terminals.is_empty(), "no terminal was attached");
    for terminal in terminals {
        assert!(terminal.is_closed(), "{terminal:?} left open");
    }
}

#[tokio::test]
async fn test_local_run_never_touches_testbed() {
    let net = FakeNetwork::new();
    let h = harness(MockTestbed::new(), net.firmware());
    let specs = [NodeSpec::board("native"), NodeSpec::board("native")];

    let mut addrs = h
        .orchestrator
        .run(&test_ctx("local_only"), &specs, |nodes: NodeSet| async move {
            start(&nodes).await?;
            let ops = nodes.iter().cloned().map(|ctrl| move || ctrl.lock().lladdr());
            let mut addrs = Vec::new();
            for found in gather(ops, START).await.into_results()? {
                addrs.push(found?.1);
            }
            Ok::<_, HarnessError>(addrs)
        })
        .await
        .unwrap();

    // Attach order is not fixed, so neither is the address assignment
    addrs.sort();
    assert_eq!(addrs, vec![lladdr(0), lladdr(1)]);
    assert!(h.api.calls().is_empty());
    let calls = h.firmware.calls();
    assert!(calls.contains(&"build native-0".to_string()));
    assert!(calls.contains(&"attach native-1".to_string()));
    assert_all_closed(&h);
    assert!(h.registry.is_empty());
}

#[tokio::test]
async fn test_teardown_stops_controllers_before_experiment() {
    let net = FakeNetwork::new();
    let journal = journal();
    let h = journaled_harness(&net, &journal);

    h.orchestrator
        .run(&test_ctx("teardown_order"), &mixed_specs(), |nodes: NodeSet| async move {
            start(&nodes).await?;
            for ctrl in nodes.iter() {
                ctrl.lock().cmd("ifconfig")?;
            }
            Ok::<(), HarnessError>(())
        })
        .await
        .unwrap();

    let submitted = position(&journal, "testbed: submit RIOT-release-test-integration-teardown_order").unwrap();
    let built = position(&journal, "build native-0").unwrap();
    let local_closed = position(&journal, "native-0: closed").unwrap();
    let remote_closed = position(&journal, "m3-1.saclay.iot-lab.info: closed").unwrap();
    let released = position(&journal, "testbed: stop 1").unwrap();

    assert!(submitted < built, "nodes must be reserved before flashing");
    assert!(local_closed < released, "journal: {:?}", journal.lock());
    assert!(remote_closed < released, "journal: {:?}", journal.lock());
    assert_eq!(h.api.total_stops(), 1);
}

#[tokio::test]
async fn test_failed_wait_releases_reservation() {
    let api = MockTestbed::new().with_states(vec![ExperimentState::Waiting, ExperimentState::Error]);
    let h = harness(api, FakeNetwork::new().firmware());
    let ran = Arc::new(AtomicBool::new(false));

    let flag = ran.clone();
    let result = h
        .orchestrator
        .run(&test_ctx("failed_wait"), &mixed_specs(), |_nodes: NodeSet| async move {
            flag.store(true, Ordering::SeqCst);
            Ok::<(), HarnessError>(())
        })
        .await;

    assert!(matches!(
        result,
        Err(HarnessError::Reservation(ReservationError::Failed {
            state: ExperimentState::Error,
            ..
        }))
    ));
    assert!(!ran.load(Ordering::SeqCst));
    assert_eq!(h.api.stop_count(ReservationId(1)), 1);
    assert!(h.firmware.calls().is_empty());
    assert!(h.registry.is_empty());
}

#[tokio::test]
async fn test_wait_timeout_releases_reservation() {
    let api = MockTestbed::new().with_states(vec![ExperimentState::Waiting]);
    let h = harness(api, FakeNetwork::new().firmware());

    let result = h
        .orchestrator
        .acquire(&test_ctx("wait_timeout"), &mixed_specs())
        .await;

    assert!(matches!(
        result,
        Err(HarnessError::Reservation(ReservationError::Timeout { .. }))
    ));
    assert_eq!(h.api.stop_count(ReservationId(1)), 1);
    assert!(h.registry.is_empty());
}

#[tokio::test]
async fn test_submit_failure_leaves_nothing_tracked() {
    let api = MockTestbed::new();
    api.fail_submit(503, "site under maintenance");
    let h = harness(api, FakeNetwork::new().firmware());

    let result = h
        .orchestrator
        .acquire(&test_ctx("submit_failure"), &mixed_specs())
        .await;

    match result {
        Err(HarnessError::Reservation(ReservationError::Api { status, body })) => {
            assert_eq!(status, 503);
            assert!(body.contains("maintenance"));
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(h.api.total_stops(), 0);
    assert!(h.registry.is_empty());
}

#[tokio::test]
async fn test_body_error_still_releases() {
    let net = FakeNetwork::new();
    let h = harness(MockTestbed::new(), net.firmware());

    let result = h
        .orchestrator
        .run(&test_ctx("body_error"), &mixed_specs(), |nodes: NodeSet| async move {
            start(&nodes).await?;
            Err::<(), _>(HarnessError::Task("expected reply missing".into()))
        })
        .await;

    assert!(matches!(result, Err(HarnessError::Task(_))));
    assert_all_closed(&h);
    assert_eq!(h.api.total_stops(), 1);
    assert!(h.registry.is_empty());
}

#[tokio::test]
async fn test_failed_flash_stops_every_node() {
    let net = FakeNetwork::new();
    let firmware = net.firmware();
    firmware.fail_flash("native-1");
    let h = harness(MockTestbed::new(), firmware);
    let specs = [NodeSpec::board("native"), NodeSpec::board("native")];

    let result = h
        .orchestrator
        .run(&test_ctx("failed_flash"), &specs, |nodes: NodeSet| async move {
            start(&nodes).await?;
            Ok::<(), HarnessError>(())
        })
        .await;

    assert!(matches!(
        result,
        Err(HarnessError::Node(NodeError::Firmware(_)))
    ));
    let calls = h.firmware.calls();
    assert!(calls.contains(&"flash native-1".to_string()));
    assert!(!calls.contains(&"attach native-1".to_string()));
    assert_all_closed(&h);
    assert!(h.registry.is_empty());
}

#[tokio::test]
async fn test_panic_releases_then_resumes() {
    let net = FakeNetwork::new();
    let h = harness(MockTestbed::new(), net.firmware());

    let outcome = AssertUnwindSafe(h.orchestrator.run(
        &test_ctx("panicking_body"),
        &mixed_specs(),
        |nodes: NodeSet| async move {
            start(&nodes).await?;
            assert_eq!(nodes.len(), 3, "test body assertion");
            Ok::<(), HarnessError>(())
        },
    ))
    .catch_unwind()
    .await;

    assert!(outcome.is_err(), "panic must reach the caller");
    assert_all_closed(&h);
    assert_eq!(h.api.total_stops(), 1);
    assert!(h.registry.is_empty());
}

#[tokio::test]
async fn test_interrupt_releases_everything() {
    let net = FakeNetwork::new();
    let h = harness(MockTestbed::new(), net.firmware());
    let (started_tx, started_rx) = tokio::sync::oneshot::channel::<()>();

    let result = h
        .orchestrator
        .run_until(
            &test_ctx("interrupted"),
            &mixed_specs(),
            |nodes: NodeSet| async move {
                start(&nodes).await?;
                let _ = started_tx.send(());
                std::future::pending::<Result<(), HarnessError>>().await
            },
            async {
                let _ = started_rx.await;
            },
        )
        .await;

    assert!(matches!(result, Err(HarnessError::Interrupted)));
    assert_eq!(h.firmware.terminals().len(), 2);
    assert_all_closed(&h);
    assert_eq!(h.api.total_stops(), 1);
    assert!(h.registry.is_empty());
}

#[tokio::test]
async fn test_interrupt_during_wait_releases_reservation() {
    let net = FakeNetwork::new();
    let h = harness(
        MockTestbed::new().with_states(vec![ExperimentState::Waiting]),
        net.firmware(),
    );
    let ran = Arc::new(AtomicBool::new(false));
    let body_ran = ran.clone();

    let result = h
        .orchestrator
        .run_until(
            &test_ctx("interrupted_wait"),
            &mixed_specs(),
            |_nodes: NodeSet| async move {
                body_ran.store(true, Ordering::SeqCst);
                Ok::<(), HarnessError>(())
            },
            tokio::time::sleep(Duration::from_millis(30)),
        )
        .await;

    // Interrupted well before the 200ms wait timeout.
    assert!(matches!(result, Err(HarnessError::Interrupted)), "{result:?}");
    assert!(!ran.load(Ordering::SeqCst));
    assert_eq!(h.api.stop_count(ReservationId(1)), 1);
    assert!(h.firmware.terminals().is_empty());
    assert!(h.registry.is_empty());
}

#[tokio::test]
async fn test_sweep_releases_leaked_acquisition() {
    let net = FakeNetwork::new();
    let h = harness(MockTestbed::new(), net.firmware());

    let acquisition = h
        .orchestrator
        .acquire(&test_ctx("leaked"), &mixed_specs())
        .await
        .unwrap();
    start(acquisition.nodes()).await.unwrap();
    drop(acquisition);

    assert_eq!(h.registry.controller_count(), 2);
    assert_eq!(h.registry.experiment_count(), 1);

    let report = h.registry.sweep().await;
    assert_eq!(report.controllers, 2);
    assert_eq!(report.experiments, 1);
    assert!(report.errors.is_empty());
    assert_all_closed(&h);
    assert_eq!(h.api.total_stops(), 1);

    assert_eq!(h.registry.sweep().await, SweepReport::default());
}

#[tokio::test]
async fn test_release_is_idempotent() {
    let net = FakeNetwork::new();
    let h = harness(MockTestbed::new(), net.firmware());

    let acquisition = h
        .orchestrator
        .acquire(&test_ctx("double_release"), &mixed_specs())
        .await
        .unwrap();
    start(acquisition.nodes()).await.unwrap();
    let nodes = acquisition.nodes().clone();
    let experiment = acquisition.experiment().cloned().unwrap();

    acquisition.release().await.unwrap();

    // Everything below runs against already released resources
    assert!(!experiment.stop().await.unwrap());
    for ctrl in nodes.iter() {
        let mut ctrl = ctrl.lock();
        ctrl.stop().unwrap();
        assert_eq!(ctrl.state(), ControllerState::Stopped);
    }
    assert_eq!(h.registry.sweep().await, SweepReport::default());
    assert_eq!(h.api.stop_count(ReservationId(1)), 1);
    for terminal in h.firmware.terminals() {
        assert_eq!(terminal.close_count(), 1);
    }
}
