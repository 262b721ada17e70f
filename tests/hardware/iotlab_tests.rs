//! Release checks on reserved IoT-LAB nodes.
//!
//! Needs `RIOTBASE` and credentials created with `iotlab-auth`. Each test
//! reserves its own experiment, which is stopped again even when the test
//! fails.

use super::utils::{ctx, HardwareEnv, START_TIMEOUT};
use release_specs::node::{EnvOverrides, Ifconfig, Ping6, Pktbuf};
use release_specs::{HarnessError, NodeSet, NodeSpec};

#[tokio::test]
#[ignore] // Run with --ignored flag
async fn test_iotlab_m3_single_hop_ping() {
    let Some(env) = HardwareEnv::from_env() else {
        return;
    };
    let Some(orchestrator) = env.iotlab_orchestrator() else {
        return;
    };
    let specs = [NodeSpec::board("iotlab-m3"), NodeSpec::board("iotlab-m3")];
    let app = env.app("examples/networking/gnrc/gnrc_networking");

    orchestrator
        .run(&ctx("hardware", "iotlab_ping"), &specs, |nodes: NodeSet| async move {
            nodes.configure(&app, &EnvOverrides::default());
            nodes.start_all(START_TIMEOUT).await?;
            let (pinger, target) = (nodes.get(0).unwrap(), nodes.get(1).unwrap());
            let (_, addr) = target.lock().lladdr()?;

            let res = pinger.lock().ping6(&addr, 100, 100, 50)?;
            assert!(res.stats.packet_loss < 10, "{}% loss", res.stats.packet_loss);
            assert!(pinger.lock().pktbuf_stats()?.is_empty());
            Ok::<(), HarnessError>(())
        })
        .await
        .unwrap();

    assert!(orchestrator.registry().is_empty());
}
