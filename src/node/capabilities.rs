//! Shell command families as independent capabilities.
//!
//! A test asks only for what it uses, e.g. `fn run(node: &mut (impl Ifconfig
//! + Ping6))`. Every capability is built on [`Shell`]; [`NodeController`]
//! implements all of them.

use super::{NodeController, NodeError};
use crate::parsers::{
    IfconfigParser, Interfaces, JoinOutcome, LoramacGetParser, LoramacJoinParser, ParseError,
    PingParser, PingResult, PktbufParser, PktbufStats, RplParser, RplStatus, ShellParser,
    TwrMeasurement, TwrRequestParser, UdpSendParser, UdpSendReport,
};
use crate::term::{MatchResult, ShellError};
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;

static RIOT_BANNER_RE: Lazy<Regex> = Lazy::new(|| Regex::new("RIOT").expect("banner regex is valid"));
static UDP_RECEIVED_RE: Lazy<[Regex; 2]> = Lazy::new(|| {
    [
        Regex::new(r"Packets received:\s+\d").expect("udp received regex is valid"),
        Regex::new(r"PKTDUMP: data received:").expect("pktdump regex is valid"),
    ]
});
static PKTDUMP_SNIPS_RE: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"~~ SNIP  0 - size:\s+\d+ byte, type: NETTYPE_UNDEF \(\d+\)",
        r"~~ SNIP  1 - size:\s+\d+ byte, type: NETTYPE_UDP \(\d+\)",
        r"~~ SNIP  2 - size:\s+40 byte, type: NETTYPE_IPV6 \(\d+\)",
        r"~~ SNIP  3 - size:\s+\d+ byte, type: NETTYPE_NETIF \(-1\)",
        r"~~ PKT\s+-\s+4 snips, total size:\s+\d+ byte",
    ]
    .iter()
    .map(|re| Regex::new(re).expect("pktdump snip regex is valid"))
    .collect()
});

/// Line-oriented access to a node's shell.
pub trait Shell {
    fn shell_name(&self) -> String;

    fn command_timeout(&self) -> Duration;

    fn reboot_timeout(&self) -> Duration {
        self.command_timeout()
    }

    /// Run `command` and return its output.
    fn run(&mut self, command: &str, timeout: Duration) -> Result<String, NodeError>;

    fn send_expect(
        &mut self,
        command: &str,
        pattern: &Regex,
        timeout: Duration,
    ) -> Result<MatchResult, NodeError>;

    /// Wait for unsolicited output.
    fn wait_for(&mut self, patterns: &[Regex], timeout: Duration) -> Result<(usize, MatchResult), NodeError>;

    fn cmd(&mut self, command: &str) -> Result<String, NodeError> {
        let timeout = self.command_timeout();
        self.run(command, timeout)
    }
}

/// Fail with `CommandFailed` unless the device acknowledged with `success`.
fn expect_success<S: Shell + ?Sized>(shell: &S, command: &str, output: String) -> Result<String, NodeError> {
    if output.contains("success") {
        Ok(output)
    } else {
        Err(ShellError::failed(shell.shell_name(), command, output).into())
    }
}

pub trait Reboot: Shell {
    /// Reboot and wait for the boot banner.
    fn reboot(&mut self) -> Result<(), NodeError> {
        let timeout = self.reboot_timeout();
        self.send_expect("reboot", &RIOT_BANNER_RE, timeout)?;
        Ok(())
    }
}

pub trait Ifconfig: Shell {
    fn ifconfig_list(&mut self, netif: Option<&str>) -> Result<Interfaces, NodeError> {
        let command = match netif {
            Some(netif) => format!("ifconfig {netif}"),
            None => "ifconfig".to_string(),
        };
        let output = self.cmd(&command)?;
        Ok(IfconfigParser.parse(&output)?)
    }

    fn ifconfig_set_chan(&mut self, netif: &str, channel: u16) -> Result<String, NodeError> {
        let command = format!("ifconfig {netif} set chan {channel}");
        let output = self.cmd(&command)?;
        expect_success(self, &command, output)
    }

    fn ifconfig_add(&mut self, netif: &str, addr: &str) -> Result<String, NodeError> {
        let command = format!("ifconfig {netif} add {addr}");
        let output = self.cmd(&command)?;
        expect_success(self, &command, output)
    }

    fn ifconfig_l2filter_add(&mut self, netif: &str, addr: &str) -> Result<String, NodeError> {
        let command = format!("ifconfig {netif} l2filter add {addr}");
        let output = self.cmd(&command)?;
        expect_success(self, &command, output)
    }

    fn ifconfig_disable_rtr_adv(&mut self, netif: &str) -> Result<String, NodeError> {
        let command = format!("ifconfig {netif} -rtr_adv");
        let output = self.cmd(&command)?;
        expect_success(self, &command, output)
    }

    /// First interface and its link-local address.
    fn lladdr(&mut self) -> Result<(String, String), NodeError> {
        let interfaces = self.ifconfig_list(None)?;
        let found = interfaces
            .iter()
            .find_map(|netif| netif.lladdr().map(|a| (netif.name.clone(), a.to_string())));
        found.ok_or_else(|| ParseError::new("ifconfig", "no link-local address", &format!("{interfaces:?}")).into())
    }

    /// First interface and its global address.
    fn global_addr(&mut self) -> Result<(String, String), NodeError> {
        let interfaces = self.ifconfig_list(None)?;
        let found = interfaces
            .iter()
            .find_map(|netif| netif.global_addr().map(|a| (netif.name.clone(), a.to_string())));
        found.ok_or_else(|| ParseError::new("ifconfig", "no global address", &format!("{interfaces:?}")).into())
    }
}

pub trait Ping6: Shell {
    /// `ping6` `host`; waits `count * interval` plus the command timeout.
    fn ping6(&mut self, host: &str, count: u32, interval_ms: u64, packet_size: usize) -> Result<PingResult, NodeError> {
        let command = format!("ping6 -c {count} -i {interval_ms} -s {packet_size} {host}");
        let timeout = Duration::from_millis(u64::from(count) * interval_ms) + self.command_timeout();
        let output = self.run(&command, timeout)?;
        Ok(PingParser.parse(&output)?)
    }
}

pub trait Pktbuf: Shell {
    fn pktbuf_stats(&mut self) -> Result<PktbufStats, NodeError> {
        let output = self.cmd("pktbuf")?;
        Ok(PktbufParser.parse(&output)?)
    }
}

/// `udp` command of `gnrc_networking` and `tests/net/gnrc_udp`.
pub trait Udp: Shell {
    fn udp_server_start(&mut self, port: u16) -> Result<String, NodeError> {
        let command = format!("udp server start {port}");
        let output = self.cmd(&command)?;
        if !output.contains("Success:") {
            return Err(ShellError::failed(self.shell_name(), command, output).into());
        }
        Ok(output)
    }

    fn udp_server_stop(&mut self) -> Result<String, NodeError> {
        self.cmd("udp server stop")
    }

    /// Send `count` datagrams `delay_ms` apart.
    fn udp_client_send(
        &mut self,
        dst: &str,
        port: u16,
        payload: &str,
        count: u32,
        delay_ms: u64,
    ) -> Result<Vec<UdpSendReport>, NodeError> {
        let timeout = if delay_ms > 0 {
            // Half a second of slack per ten datagrams.
            Duration::from_secs((delay_ms * u64::from(count)).div_ceil(1000))
                + Duration::from_millis(500 * u64::from(count) / 10)
        } else {
            Duration::from_secs(u64::from(count))
        };
        let command = format!("udp send {dst} {port} {payload} {count} {}", delay_ms * 1000);
        let output = self.run(&command, timeout.max(self.command_timeout()))?;
        if output.contains("Error:") {
            return Err(ShellError::failed(self.shell_name(), command, output).into());
        }
        Ok(UdpSendParser.parse(&output)?)
    }

    /// Count the datagrams a running server reports and return the loss in
    /// percent.
    fn udp_server_check_output(&mut self, count: u32, delay_ms: u64) -> Result<f64, NodeError> {
        if count == 0 {
            return Ok(0.0);
        }
        let timeout = if delay_ms > 0 {
            Duration::from_millis(delay_ms * 10)
        } else {
            Duration::from_secs(1)
        };
        let snip_timeout = self.command_timeout();
        let mut lost = 0u32;
        for _ in 0..count {
            let index = match self.wait_for(&UDP_RECEIVED_RE[..], timeout) {
                Ok((index, _)) => index,
                Err(e) if e.is_timeout() => {
                    lost += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };
            if index == 0 {
                continue;
            }
            for snip in PKTDUMP_SNIPS_RE.iter() {
                match self.wait_for(std::slice::from_ref(snip), snip_timeout) {
                    Ok(_) => {}
                    Err(e) if e.is_timeout() => {
                        lost += 1;
                        break;
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(f64::from(lost) / f64::from(count) * 100.0)
    }
}

pub trait Rpl: Shell {
    fn rpl_init(&mut self, netif: &str) -> Result<String, NodeError> {
        let command = format!("rpl init {netif}");
        let output = self.cmd(&command)?;
        expect_success(self, &command, output)
    }

    fn rpl_root(&mut self, instance_id: u8, dodag_id: &str) -> Result<String, NodeError> {
        let command = format!("rpl root {instance_id} {dodag_id}");
        let output = self.cmd(&command)?;
        expect_success(self, &command, output)
    }

    fn rpl_show(&mut self) -> Result<RplStatus, NodeError> {
        let output = self.cmd("rpl")?;
        Ok(RplParser.parse(&output)?)
    }
}

/// Two-way ranging of the `twr_aloha` application.
pub trait Twr: Shell {
    fn twr_listen(&mut self, on: bool) -> Result<String, NodeError> {
        self.cmd(if on { "twr lst on" } else { "twr lst off" })
    }

    fn twr_request(
        &mut self,
        addr: &str,
        count: u32,
        interval_ms: u64,
        proto: &str,
        timeout: Duration,
    ) -> Result<Vec<TwrMeasurement>, NodeError> {
        let command = format!("twr req {addr} -c {count} -i {interval_ms} -p {proto}");
        let output = self.run(&command, timeout)?;
        Ok(TwrRequestParser.parse(&output)?)
    }
}

pub trait Loramac: Shell {
    fn loramac_set(&mut self, key: &str, value: &str) -> Result<String, NodeError> {
        let command = format!("loramac set {key} {value}");
        let output = self.cmd(&command)?;
        if output.contains("Usage") || output.to_lowercase().contains("error") {
            return Err(ShellError::failed(self.shell_name(), command, output).into());
        }
        Ok(output)
    }

    fn loramac_get(&mut self, key: &str) -> Result<String, NodeError> {
        let output = self.cmd(&format!("loramac get {key}"))?;
        Ok(LoramacGetParser.parse(&output)?)
    }

    /// `mode` is `otaa` or `abp`.
    fn loramac_join(&mut self, mode: &str, timeout: Duration) -> Result<JoinOutcome, NodeError> {
        let output = self.run(&format!("loramac join {mode}"), timeout)?;
        Ok(LoramacJoinParser.parse(&output)?)
    }
}

impl Shell for NodeController {
    fn shell_name(&self) -> String {
        self.name()
    }

    fn command_timeout(&self) -> Duration {
        NodeController::command_timeout(self)
    }

    fn reboot_timeout(&self) -> Duration {
        NodeController::reboot_timeout(self)
    }

    fn run(&mut self, command: &str, timeout: Duration) -> Result<String, NodeError> {
        self.cmd_timeout(command, timeout)
    }

    fn send_expect(
        &mut self,
        command: &str,
        pattern: &Regex,
        timeout: Duration,
    ) -> Result<MatchResult, NodeError> {
        self.send_and_expect(command, pattern, timeout)
    }

    fn wait_for(&mut self, patterns: &[Regex], timeout: Duration) -> Result<(usize, MatchResult), NodeError> {
        self.expect_any(patterns, timeout)
    }

    fn cmd(&mut self, command: &str) -> Result<String, NodeError> {
        NodeController::cmd(self, command)
    }
}

impl Reboot for NodeController {}
impl Ifconfig for NodeController {}
impl Ping6 for NodeController {}
impl Pktbuf for NodeController {}
impl Udp for NodeController {}
impl Rpl for NodeController {}
impl Twr for NodeController {}
impl Loramac for NodeController {}
