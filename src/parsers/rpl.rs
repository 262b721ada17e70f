//! `rpl` (`rpl show`) status.

use super::{ParseError, ShellParser};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

static INSTANCE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"instance \[(?P<id>\d+) \| Iface: (?P<iface>\d+)").expect("rpl instance regex is valid")
});
static DODAG_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"dodag \[(?P<id>[0-9a-fA-F:]+) \| R: (?P<rank>\d+) \| OP: (?P<op>\w+)")
        .expect("rpl dodag regex is valid")
});
static PARENT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"parent \[addr: (?P<addr>[0-9a-fA-F:]+) \| rank: (?P<rank>\d+)")
        .expect("rpl parent regex is valid")
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RplDodag {
    pub instance_id: u8,
    pub iface: String,
    pub dodag_id: String,
    pub rank: u16,
    pub operating_as: String,
    pub parent: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RplStatus {
    pub dodags: Vec<RplDodag>,
}

impl RplStatus {
    pub fn joined(&self, dodag_id: &str) -> bool {
        self.dodags.iter().any(|d| d.dodag_id == dodag_id)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RplParser;

impl ShellParser for RplParser {
    type Output = RplStatus;

    fn command(&self) -> &'static str {
        "rpl"
    }

    /// A node that has not joined any DODAG prints no `instance` lines and
    /// parses to an empty status. A `dodag` line without its `instance`
    /// line is malformed.
    fn parse(&self, output: &str) -> Result<RplStatus, ParseError> {
        let mut status = RplStatus::default();
        let mut instance: Option<(u8, String)> = None;

        for line in output.lines() {
            if let Some(caps) = INSTANCE_RE.captures(line) {
                let id = caps["id"]
                    .parse()
                    .map_err(|_| ParseError::new("rpl", "instance id out of range", output))?;
                instance = Some((id, caps["iface"].to_string()));
            } else if let Some(caps) = DODAG_RE.captures(line) {
                let (instance_id, iface) = instance
                    .clone()
                    .ok_or_else(|| ParseError::new("rpl", "dodag outside of an instance", output))?;
                status.dodags.push(RplDodag {
                    instance_id,
                    iface,
                    dodag_id: caps["id"].to_lowercase(),
                    rank: caps["rank"]
                        .parse()
                        .map_err(|_| ParseError::new("rpl", "rank out of range", output))?,
                    operating_as: caps["op"].to_string(),
                    parent: None,
                });
            } else if let Some(caps) = PARENT_RE.captures(line) {
                if let Some(dodag) = status.dodags.last_mut() {
                    dodag.parent = Some(caps["addr"].to_lowercase());
                }
            }
        }
        Ok(status)
    }
}
