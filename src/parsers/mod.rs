//! Parsers for RIOT shell command output.
//!
//! The shell's textual output is the wire contract with the device. Each
//! parser here is a pure function from one command's captured text to a
//! structured result, so a change to RIOT's output format only touches the
//! matching parser. A parser that finds its marker but not the structure it
//! expects returns [`ParseError`] with the offending text; none of them fall
//! back to zero-filled results.

use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

pub mod ifconfig;
pub mod loramac;
pub mod ping;
pub mod pktbuf;
pub mod rpl;
pub mod twr;
pub mod udp;

pub use ifconfig::{IfconfigParser, Interfaces, Ipv6Addr, Netif};
pub use loramac::{JoinOutcome, LoramacGetParser, LoramacJoinParser};
pub use ping::{PingParser, PingReply, PingResult, PingStats, RoundTrip};
pub use pktbuf::{PktbufParser, PktbufStats, UnusedChunk};
pub use rpl::{RplDodag, RplParser, RplStatus};
pub use twr::{TwrMeasurement, TwrRequestParser};
pub use udp::{UdpSendParser, UdpSendReport};

/// Output that appeared but did not have the expected structure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{parser}: {reason}\n--- output ---\n{text}")]
pub struct ParseError {
    pub parser: &'static str,
    pub reason: String,
    /// The raw text that failed to parse.
    pub text: String,
}

impl ParseError {
    pub fn new(parser: &'static str, reason: impl Into<String>, text: &str) -> Self {
        Self {
            parser,
            reason: reason.into(),
            text: text.to_string(),
        }
    }
}

/// A parser for the output of one shell command family.
pub trait ShellParser {
    type Output;

    /// Name of the shell command this parser decodes.
    fn command(&self) -> &'static str;

    fn parse(&self, output: &str) -> Result<Self::Output, ParseError>;
}

/// Result of a parser looked up by command name.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "command", content = "result", rename_all = "snake_case")]
pub enum ParsedOutput {
    Ifconfig(Interfaces),
    Ping6(PingResult),
    Pktbuf(PktbufStats),
    Rpl(RplStatus),
    Twr(Vec<TwrMeasurement>),
    Udp(Vec<UdpSendReport>),
    LoramacGet(String),
    LoramacJoin(JoinOutcome),
}

type ParseFn = fn(&str) -> Result<ParsedOutput, ParseError>;

static PARSERS: Lazy<BTreeMap<&'static str, ParseFn>> = Lazy::new(|| {
    let mut parsers: BTreeMap<&'static str, ParseFn> = BTreeMap::new();
    parsers.insert(IfconfigParser.command(), |out| {
        IfconfigParser.parse(out).map(ParsedOutput::Ifconfig)
    });
    parsers.insert(PingParser.command(), |out| {
        PingParser.parse(out).map(ParsedOutput::Ping6)
    });
    parsers.insert(PktbufParser.command(), |out| {
        PktbufParser.parse(out).map(ParsedOutput::Pktbuf)
    });
    parsers.insert(RplParser.command(), |out| {
        RplParser.parse(out).map(ParsedOutput::Rpl)
    });
    parsers.insert(TwrRequestParser.command(), |out| {
        TwrRequestParser.parse(out).map(ParsedOutput::Twr)
    });
    parsers.insert(UdpSendParser.command(), |out| {
        UdpSendParser.parse(out).map(ParsedOutput::Udp)
    });
    parsers.insert(LoramacGetParser.command(), |out| {
        LoramacGetParser.parse(out).map(ParsedOutput::LoramacGet)
    });
    parsers.insert(LoramacJoinParser.command(), |out| {
        LoramacJoinParser.parse(out).map(ParsedOutput::LoramacJoin)
    });
    parsers
});

/// Names of all commands with a registered parser.
pub fn registered_commands() -> impl Iterator<Item = &'static str> {
    PARSERS.keys().copied()
}

/// Parse `output` with the parser registered for `command_line`.
///
/// The longest registered command that prefixes the command line wins, so
/// `udp send ...` is decoded by the `udp send` parser. Returns `None` when no
/// parser is registered.
pub fn parse_output(command_line: &str, output: &str) -> Option<Result<ParsedOutput, ParseError>> {
    let command_line = command_line.trim();
    PARSERS
        .iter()
        .filter(|(name, _)| {
            command_line
                .strip_prefix(**name)
                .is_some_and(|rest| rest.is_empty() || rest.starts_with(' '))
        })
        .max_by_key(|(name, _)| name.len())
        .map(|(_, parse)| parse(output))
}
