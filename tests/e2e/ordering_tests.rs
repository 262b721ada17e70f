//! Multi-node ordering E2E tests
//!
//! These tests verify behaviour that depends on the order in which nodes are
//! driven:
//! - A UDP server only sees datagrams sent after it started
//! - Concurrent start builds, flashes and attaches every node in order
//! - A gather deadline abandons a hung node without losing finished results

use crate::common::*;
use regex::Regex;
use release_specs::node::{EnvOverrides, Ifconfig, NodeError, NodeSpec, Udp};
use release_specs::orchestrator::{gather, BoxedOp, NodeSet, TaskOutcome};
use release_specs::testbed::MockTestbed;
use release_specs::HarnessError;
use std::path::Path;
use std::time::Duration;

const START: Duration = Duration::from_secs(5);
const PORT: u16 = 1337;
const PAYLOAD: &str = "AAAAAAAA";

fn two_natives() -> [NodeSpec; 2] {
    [NodeSpec::board("native"), NodeSpec::board("native")]
}

async fn start(nodes: &NodeSet) -> Result<(), HarnessError> {
    nodes.configure(Path::new(APP), &EnvOverrides::default());
    nodes.start_all(START).await
}

#[tokio::test]
async fn test_udp_server_started_before_send_receives_everything() {
    let net = FakeNetwork::new();
    let h = harness(MockTestbed::new(), net.firmware());

    let loss = h
        .orchestrator
        .run(&test_ctx("udp_in_order"), &two_natives(), |nodes: NodeSet| async move {
            start(&nodes).await?;
            let (server, client) = (nodes.get(0).unwrap(), nodes.get(1).unwrap());

            // Step 1: server address and listening socket
            let (_, dst) = server.lock().lladdr()?;
            server.lock().udp_server_start(PORT)?;

            // Step 2: client sends
            let reports = client.lock().udp_client_send(&dst, PORT, PAYLOAD, 3, 10)?;
            assert_eq!(reports.len(), 3);
            assert!(reports.iter().all(|r| r.dst == dst && r.dport == PORT));

            // Step 3: server reports what arrived
            let loss = server.lock().udp_server_check_output(3, 10)?;
            server.lock().udp_server_stop()?;
            Ok::<_, HarnessError>(loss)
        })
        .await
        .unwrap();

    assert_eq!(loss, 0.0);
}

#[tokio::test]
async fn test_udp_send_before_server_start_loses_everything() {
    let net = FakeNetwork::new();
    let h = harness(MockTestbed::new(), net.firmware());

    let loss = h
        .orchestrator
        .run(&test_ctx("udp_reversed"), &two_natives(), |nodes: NodeSet| async move {
            start(&nodes).await?;
            let (server, client) = (nodes.get(0).unwrap(), nodes.get(1).unwrap());
            let (_, dst) = server.lock().lladdr()?;

            // Sent into the void: nothing listens yet
            client.lock().udp_client_send(&dst, PORT, PAYLOAD, 3, 10)?;
            server.lock().udp_server_start(PORT)?;

            let loss = server.lock().udp_server_check_output(3, 10)?;
            Ok::<_, HarnessError>(loss)
        })
        .await
        .unwrap();

    assert_eq!(loss, 100.0);
}

#[tokio::test]
async fn test_second_server_start_is_reported() {
    let net = FakeNetwork::new();
    let h = harness(MockTestbed::new(), net.firmware());

    let second = h
        .orchestrator
        .run(&test_ctx("udp_restart"), &[NodeSpec::board("native")], |nodes: NodeSet| async move {
            start(&nodes).await?;
            let server = nodes.get(0).unwrap();
            server.lock().udp_server_start(PORT)?;
            Ok::<_, HarnessError>(server.lock().udp_server_start(PORT + 1))
        })
        .await
        .unwrap();

    match second {
        Err(NodeError::Shell(e)) => assert!(e.to_string().contains("already running"), "{e}"),
        other => panic!("second start should fail: {other:?}"),
    }
}

#[tokio::test]
async fn test_concurrent_start_keeps_per_node_order() {
    let net = FakeNetwork::new();
    let h = harness(MockTestbed::new(), net.firmware());
    let specs = [
        NodeSpec::board("native"),
        NodeSpec::board("native"),
        NodeSpec::board("native"),
    ];

    h.orchestrator
        .run(&test_ctx("concurrent_start"), &specs, |nodes: NodeSet| async move { start(&nodes).await })
        .await
        .unwrap();

    assert_eq!(net.device_count(), 3);
    let calls = h.firmware.calls();
    for node in ["native-0", "native-1", "native-2"] {
        let at = |step: &str| {
            calls
                .iter()
                .position(|c| c == &format!("{step} {node}"))
                .unwrap_or_else(|| panic!("no {step} for {node}: {calls:?}"))
        };
        assert!(at("build") < at("flash"));
        assert!(at("flash") < at("attach"));
    }
}

#[tokio::test]
async fn test_gather_abandons_hung_node() {
    let net = FakeNetwork::new();
    let h = harness(MockTestbed::new(), net.firmware());

    let outcomes = h
        .orchestrator
        .run(&test_ctx("hung_node"), &two_natives(), |nodes: NodeSet| async move {
            start(&nodes).await?;
            let quick = nodes.get(0).unwrap().clone();
            let hung = nodes.get(1).unwrap().clone();
            let never = Regex::new("this never shows up").unwrap();

            let ops: Vec<BoxedOp<Result<String, NodeError>>> = vec![
                Box::new(move || quick.lock().cmd("ifconfig")),
                Box::new(move || {
                    hung.lock()
                        .expect_any(&[never], Duration::from_secs(1))
                        .map(|(_, m)| m.before)
                }),
            ];
            Ok::<_, HarnessError>(gather(ops, Duration::from_millis(200)).await)
        })
        .await
        .unwrap();

    assert!(!outcomes.is_complete());
    assert_eq!(outcomes.abandoned(), 1);
    match &outcomes.outcomes()[0] {
        TaskOutcome::Completed(Ok(output)) => assert!(output.contains("inet6 addr")),
        other => panic!("quick node should finish: {other:?}"),
    }
    assert!(matches!(outcomes.outcomes()[1], TaskOutcome::Abandoned));
    assert!(matches!(
        outcomes.into_results(),
        Err(HarnessError::Incomplete { abandoned: 1, total: 2 })
    ));
    assert!(h.registry.is_empty());
}
