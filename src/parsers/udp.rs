//! `udp send` reports of the `gnrc_networking` / `gnrc_udp` applications.

use super::{ParseError, ShellParser};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

static SUCCESS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"Success:\s+sen[td]\s+(?P<payload_len>\d+)\s+byte(?:\(s\))?\s+to\s+\[(?P<dst>[0-9a-fA-F:]+(?:%\S+)?)\]:(?P<dport>\d+)$",
    )
    .expect("udp send regex is valid")
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UdpSendReport {
    pub payload_len: usize,
    pub dst: String,
    pub dport: u16,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UdpSendParser;

impl ShellParser for UdpSendParser {
    type Output = Vec<UdpSendReport>;

    fn command(&self) -> &'static str {
        "udp send"
    }

    fn parse(&self, output: &str) -> Result<Vec<UdpSendReport>, ParseError> {
        let mut reports = Vec::new();
        for line in output.lines() {
            let Some(caps) = SUCCESS_RE.captures(line.trim()) else {
                continue;
            };
            reports.push(UdpSendReport {
                payload_len: caps["payload_len"]
                    .parse()
                    .map_err(|_| ParseError::new("udp send", "bad payload length", output))?,
                dst: caps["dst"].to_string(),
                dport: caps["dport"]
                    .parse()
                    .map_err(|_| ParseError::new("udp send", "port out of range", output))?,
            });
        }
        if reports.is_empty() {
            return Err(ParseError::new("udp send", "no send report", output));
        }
        Ok(reports)
    }
}
