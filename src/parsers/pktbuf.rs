//! `pktbuf` statistics.

use super::{ParseError, ShellParser};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

static HEADER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"packet buffer: first byte: (?P<first>0x[0-9a-fA-F]+), last byte: (?P<last>0x[0-9a-fA-F]+) \(size: +(?P<size>\d+)\)",
    )
    .expect("pktbuf header regex is valid")
});

static LAST_USED_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"position of last byte used: (?P<pos>\d+)").expect("pktbuf usage regex is valid")
});

static UNUSED_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"unused: (?P<start>0x[0-9a-fA-F]+) \(next: (?P<next>\(nil\)|0x[0-9a-fA-F]+), size: +(?P<size>\d+)\)",
    )
    .expect("pktbuf unused regex is valid")
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnusedChunk {
    pub start: u64,
    pub next: Option<u64>,
    pub size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PktbufStats {
    pub first_byte: u64,
    pub last_byte: u64,
    pub size: usize,
    pub last_byte_used: Option<usize>,
    /// Free-list chunks in the order the device printed them.
    pub unused: Vec<UnusedChunk>,
}

impl PktbufStats {
    /// The buffer is empty when its first free chunk starts at the first
    /// byte and spans the whole buffer.
    pub fn is_empty(&self) -> bool {
        self.unused
            .first()
            .is_some_and(|chunk| chunk.start == self.first_byte && chunk.size == self.size)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PktbufParser;

fn hex(value: &str, output: &str) -> Result<u64, ParseError> {
    let digits = value.trim_start_matches("0x");
    u64::from_str_radix(digits, 16)
        .map_err(|e| ParseError::new("pktbuf", format!("bad address '{value}': {e}"), output))
}

fn dec(value: &str, output: &str) -> Result<usize, ParseError> {
    value
        .parse()
        .map_err(|e| ParseError::new("pktbuf", format!("bad size '{value}': {e}"), output))
}

impl ShellParser for PktbufParser {
    type Output = PktbufStats;

    fn command(&self) -> &'static str {
        "pktbuf"
    }

    fn parse(&self, output: &str) -> Result<PktbufStats, ParseError> {
        let header = HEADER_RE
            .captures(output)
            .ok_or_else(|| ParseError::new("pktbuf", "no packet buffer header", output))?;

        let last_byte_used = LAST_USED_RE
            .captures(output)
            .map(|caps| dec(&caps["pos"], output))
            .transpose()?;

        let unused = UNUSED_RE
            .captures_iter(output)
            .map(|caps| {
                let next = match &caps["next"] {
                    "(nil)" => None,
                    addr => Some(hex(addr, output)?),
                };
                Ok(UnusedChunk {
                    start: hex(&caps["start"], output)?,
                    next,
                    size: dec(&caps["size"], output)?,
                })
            })
            .collect::<Result<Vec<_>, ParseError>>()?;

        if unused.is_empty() {
            return Err(ParseError::new("pktbuf", "no unused chunk listed", output));
        }

        Ok(PktbufStats {
            first_byte: hex(&header["first"], output)?,
            last_byte: hex(&header["last"], output)?,
            size: dec(&header["size"], output)?,
            last_byte_used,
            unused,
        })
    }
}
