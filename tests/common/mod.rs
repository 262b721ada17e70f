//! Common test utilities and helpers
//!
//! A small fake of RIOT's `gnrc_networking` shell plus builders for an
//! orchestrator wired to mock firmware and a mock testbed.

#![allow(dead_code)]

use parking_lot::Mutex;
use release_specs::config::ShellConfig;
use release_specs::firmware::MockFirmware;
use release_specs::orchestrator::{Orchestrator, OrchestratorSettings, SessionRegistry};
use release_specs::term::MockTransport;
use release_specs::testbed::{ExperimentClient, MockTestbed};
use release_specs::LogContext;
use std::sync::Arc;
use std::time::Duration;

/// Cross-component event log shared by mocks.
pub type Journal = Arc<Mutex<Vec<String>>>;

pub const APP: &str = "examples/networking/gnrc/gnrc_networking";

pub fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

/// Position of the first journal entry equal to `entry`.
pub fn position(journal: &Journal, entry: &str) -> Option<usize> {
    journal.lock().iter().position(|e| e == entry)
}

/// Link-local address of the `id`-th fake device.
pub fn lladdr(id: usize) -> String {
    format!("fe80::2a3b:{:x}", id + 1)
}

/// A `LogContext` with a fixed timestamp.
pub fn test_ctx(function: &str) -> LogContext {
    LogContext {
        module: "integration".into(),
        function: function.into(),
        time: 0,
    }
}

/// Shell timeouts short enough for tests.
pub fn shell_config() -> ShellConfig {
    ShellConfig {
        command_timeout_ms: 500,
        reboot_timeout_ms: 500,
        ..ShellConfig::default()
    }
}

fn pktdump(payload: &str, port: u16) -> String {
    let len = payload.len();
    format!(
        "PKTDUMP: data received:\n\
         ~~ SNIP  0 - size: {len:>3} byte, type: NETTYPE_UNDEF (0)\n\
         00000000  41  41  41  41  41  41  41  41\n\
         ~~ SNIP  1 - size:   8 byte, type: NETTYPE_UDP (4)\n\
         \x20  src-port: {port:>5}  dst-port: {port:>5}\n\
         ~~ SNIP  2 - size:  40 byte, type: NETTYPE_IPV6 (2)\n\
         ~~ SNIP  3 - size:  20 byte, type: NETTYPE_NETIF (-1)\n\
         ~~ PKT    -  4 snips, total size: {:>3} byte\n",
        len + 68
    )
}

struct Device {
    lladdr: String,
    server: Option<u16>,
    terminal: Option<MockTransport>,
}

/// Fake link shared by every device it attaches.
///
/// Devices answer `ifconfig`, `udp server start|stop`, `udp send` and
/// `reboot`. A datagram reaches a device only while its server listens on
/// the destination port, in which case the device prints a packet dump.
/// Two devices sending to each other at the same instant are not supported.
#[derive(Clone, Default)]
pub struct FakeNetwork {
    devices: Arc<Mutex<Vec<Device>>>,
}

impl FakeNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Boot a device and return its terminal.
    pub fn attach(&self, name: &str) -> MockTransport {
        let id = {
            let mut devices = self.devices.lock();
            let index = devices.len();
            devices.push(Device {
                lladdr: lladdr(index),
                server: None,
                terminal: None,
            });
            devices.len() - 1
        };
        let net = self.clone();
        let terminal = MockTransport::with_responder(name, Box::new(move |line| Some(net.respond(id, line))));
        self.devices.lock()[id].terminal = Some(terminal.clone());
        terminal
    }

    /// Mock firmware whose nodes all join this network.
    pub fn firmware(&self) -> MockFirmware {
        let net = self.clone();
        MockFirmware::new().with_shell(move |target| net.attach(&target.node))
    }

    pub fn device_count(&self) -> usize {
        self.devices.lock().len()
    }

    fn respond(&self, id: usize, line: &str) -> String {
        let (reply, own_dumps) = self.handle(id, line);
        let mut out = format!("{line}\n");
        if !reply.is_empty() {
            out.push_str(&reply);
            out.push('\n');
        }
        out.push_str("> ");
        out.push_str(&own_dumps);
        out
    }

    /// Reply to `line` and any packet dumps for the sending device itself.
    fn handle(&self, id: usize, line: &str) -> (String, String) {
        let args: Vec<&str> = line.split_whitespace().collect();
        match args.as_slice() {
            ["ifconfig"] => {
                let addr = self.devices.lock()[id].lladdr.clone();
                (
                    format!(
                        "Iface  6  HWaddr: 2A:3B  Channel: 26  Page: 0  NID: 0x23\n\
                         \x20         inet6 addr: {addr}  scope: link  VAL\n\
                         \x20         inet6 group: ff02::1"
                    ),
                    String::new(),
                )
            }
            ["udp", "server", "start", port] => {
                let mut devices = self.devices.lock();
                match (devices[id].server, port.parse::<u16>()) {
                    (Some(running), _) => (format!("Error: server already running on port {running}"), String::new()),
                    (None, Ok(port)) => {
                        devices[id].server = Some(port);
                        (format!("Success: started UDP server on port {port}"), String::new())
                    }
                    (None, Err(_)) => ("Error: invalid port specified".into(), String::new()),
                }
            }
            ["udp", "server", "stop"] => match self.devices.lock()[id].server.take() {
                Some(_) => ("Success: stopped UDP server".into(), String::new()),
                None => ("Error: server was not running".into(), String::new()),
            },
            ["udp", "send", dst, port, payload, rest @ ..] => {
                let Ok(port) = port.parse::<u16>() else {
                    return ("Error: invalid port specified".into(), String::new());
                };
                let count = rest.first().and_then(|c| c.parse::<usize>().ok()).unwrap_or(1);
                let sent = (0..count)
                    .map(|_| format!("Success: sent {} byte(s) to [{dst}]:{port}", payload.len()))
                    .collect::<Vec<_>>()
                    .join("\n");
                let dumps = pktdump(payload, port).repeat(count);
                let receiver = {
                    let devices = self.devices.lock();
                    devices
                        .iter()
                        .position(|d| d.lladdr == *dst && d.server == Some(port))
                        .map(|rx| (rx, devices[rx].terminal.clone()))
                };
                match receiver {
                    Some((rx, _)) if rx == id => (sent, dumps),
                    Some((_, Some(terminal))) => {
                        terminal.enqueue_read(dumps.as_bytes());
                        (sent, String::new())
                    }
                    _ => (sent, String::new()),
                }
            }
            ["reboot"] => (
                "main(): This is RIOT! (Version: 2024.10-RC1)\nRIOT network stack example application".into(),
                String::new(),
            ),
            [] => (String::new(), String::new()),
            [command, ..] => (format!("shell: command not found: {command}"), String::new()),
        }
    }
}

/// Orchestrator plus the mocks behind it.
pub struct Harness {
    pub api: Arc<MockTestbed>,
    pub firmware: Arc<MockFirmware>,
    pub registry: Arc<SessionRegistry>,
    pub orchestrator: Orchestrator,
}

/// Build an orchestrator on `api` and `firmware`, polling the testbed fast.
pub fn harness(api: MockTestbed, firmware: MockFirmware) -> Harness {
    harness_with(api, firmware, OrchestratorSettings {
        shell: shell_config(),
        ..OrchestratorSettings::default()
    })
}

pub fn harness_with(api: MockTestbed, firmware: MockFirmware, settings: OrchestratorSettings) -> Harness {
    let api = Arc::new(api);
    let firmware = Arc::new(firmware);
    let registry = SessionRegistry::new();
    let client = Arc::new(ExperimentClient::new(
        api.clone(),
        Duration::from_millis(1),
        Duration::from_millis(200),
    ));
    let orchestrator = Orchestrator::new(settings, firmware.clone(), registry.clone()).with_testbed(client);
    Harness {
        api,
        firmware,
        registry,
        orchestrator,
    }
}

/// Harness whose firmware and testbed both write into `journal`.
pub fn journaled_harness(net: &FakeNetwork, journal: &Journal) -> Harness {
    harness(
        MockTestbed::new().with_journal(journal.clone()),
        net.firmware().with_journal(journal.clone()),
    )
}
