//! `loramac get` and `loramac join` output.

use super::{ParseError, ShellParser};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

static VALUE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<key>[A-Za-z][A-Za-z ]*):\s*(?P<value>\S.*)$").expect("loramac value regex is valid")
});

/// Value printed by `loramac get <key>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoramacGetParser;

impl ShellParser for LoramacGetParser {
    type Output = String;

    fn command(&self) -> &'static str {
        "loramac get"
    }

    fn parse(&self, output: &str) -> Result<String, ParseError> {
        output
            .lines()
            .filter_map(|line| VALUE_RE.captures(line.trim()))
            .find(|caps| !caps["key"].eq_ignore_ascii_case("usage"))
            .map(|caps| caps["value"].trim().to_string())
            .ok_or_else(|| ParseError::new("loramac get", "no value printed", output))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinOutcome {
    Joined,
    AlreadyJoined,
    Failed,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LoramacJoinParser;

impl ShellParser for LoramacJoinParser {
    type Output = JoinOutcome;

    fn command(&self) -> &'static str {
        "loramac join"
    }

    fn parse(&self, output: &str) -> Result<JoinOutcome, ParseError> {
        if output.contains("Join procedure succeeded") {
            Ok(JoinOutcome::Joined)
        } else if output.contains("Warning: already joined") {
            Ok(JoinOutcome::AlreadyJoined)
        } else if output.contains("Join procedure failed") {
            Ok(JoinOutcome::Failed)
        } else {
            Err(ParseError::new("loramac join", "no join result", output))
        }
    }
}
