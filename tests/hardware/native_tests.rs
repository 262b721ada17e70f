//! Release checks on `native` instances bridged over TAP interfaces.
//!
//! # Running
//!
//! ```bash
//! sudo dist/tools/tapsetup/tapsetup -c 2   # inside RIOTBASE
//! export RIOTBASE=~/RIOT
//! cargo test --features hardware-tests native -- --ignored
//! ```

use super::utils::{ctx, HardwareEnv, START_TIMEOUT};
use release_specs::node::{EnvOverrides, Ifconfig, Ping6, Pktbuf, Udp};
use release_specs::{HarnessError, NodeSet, NodeSpec};

const APP: &str = "examples/networking/gnrc/gnrc_networking";

fn natives() -> [NodeSpec; 2] {
    [NodeSpec::board("native"), NodeSpec::board("native")]
}

async fn start_on_taps(nodes: &NodeSet, env: &HardwareEnv) -> Result<(), HarnessError> {
    for (index, tap) in ["tap0", "tap1"].into_iter().enumerate() {
        if let Some(ctrl) = nodes.get(index) {
            ctrl.lock()
                .configure(env.app(APP), &EnvOverrides::default().port(tap));
        }
    }
    nodes.start_all(START_TIMEOUT).await
}

#[tokio::test]
#[ignore] // Run with --ignored flag
async fn test_native_link_local_ping() {
    let Some(env) = HardwareEnv::from_env() else {
        return;
    };
    let orchestrator = env.local_orchestrator();

    orchestrator
        .run(&ctx("hardware", "native_ping"), &natives(), |nodes: NodeSet| async move {
            start_on_taps(&nodes, &env).await?;
            let (pinger, target) = (nodes.get(0).unwrap(), nodes.get(1).unwrap());
            let (_, addr) = target.lock().lladdr()?;

            let res = pinger.lock().ping6(&addr, 100, 10, 1024)?;
            println!("{} -> {addr}: {}% loss", pinger.lock().name(), res.stats.packet_loss);
            assert!(res.stats.packet_loss < 10);

            for ctrl in nodes.iter() {
                assert!(ctrl.lock().pktbuf_stats()?.is_empty(), "packet buffer not empty");
            }
            Ok::<(), HarnessError>(())
        })
        .await
        .unwrap();
}

#[tokio::test]
#[ignore]
async fn test_native_udp_exchange() {
    let Some(env) = HardwareEnv::from_env() else {
        return;
    };
    let orchestrator = env.local_orchestrator();

    orchestrator
        .run(&ctx("hardware", "native_udp"), &natives(), |nodes: NodeSet| async move {
            start_on_taps(&nodes, &env).await?;
            let (server, client) = (nodes.get(0).unwrap(), nodes.get(1).unwrap());
            let (_, addr) = server.lock().lladdr()?;

            server.lock().udp_server_start(1337)?;
            client.lock().udp_client_send(&addr, 1337, "abcdefgh", 10, 100)?;
            let loss = server.lock().udp_server_check_output(10, 100)?;
            server.lock().udp_server_stop()?;

            assert!(loss < 10.0, "{loss}% UDP loss");
            Ok::<(), HarnessError>(())
        })
        .await
        .unwrap();
}
