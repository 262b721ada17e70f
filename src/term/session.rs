//! Line-oriented send/expect interaction with a RIOT shell.

use super::error::ShellError;
use super::traits::Transport;
use memchr::memchr_iter;
use regex::Regex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Longest single wait on the transport, so deadlines are checked often.
const READ_SLICE: Duration = Duration::from_millis(100);

/// What an `expect` matched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchResult {
    /// Output received before the match.
    pub before: String,
    pub matched: String,
    /// Positional capture groups, group 0 excluded.
    pub groups: Vec<Option<String>>,
    pub named: HashMap<String, String>,
}

impl MatchResult {
    fn from_captures(pattern: &Regex, caps: &regex::Captures<'_>, before: &str) -> Self {
        let named = pattern
            .capture_names()
            .flatten()
            .filter_map(|name| caps.name(name).map(|m| (name.to_string(), m.as_str().to_string())))
            .collect();
        Self {
            before: before.to_string(),
            matched: caps.get(0).map(|m| m.as_str().to_string()).unwrap_or_default(),
            groups: caps
                .iter()
                .skip(1)
                .map(|g| g.map(|m| m.as_str().to_string()))
                .collect(),
            named,
        }
    }

    /// Named group, if it participated in the match.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.named.get(name).map(String::as_str)
    }
}

/// Interactive session with one node's shell.
///
/// Exactly one command is outstanding at a time: every method takes
/// `&mut self`, so commands reach the device in the order they were issued.
#[derive(Debug)]
pub struct ShellSession {
    transport: Box<dyn Transport>,
    node: String,
    prompt: Regex,
    /// Decoded output not yet consumed by an `expect`.
    buffer: String,
    /// Trailing bytes of an incomplete UTF-8 sequence.
    partial: Vec<u8>,
    /// Bytes of the line currently being logged.
    log_line: Vec<u8>,
    show_output: bool,
}

impl ShellSession {
    /// Wrap `transport`. `prompt` is the literal shell prompt, e.g. `"> "`;
    /// it is matched at the start of a line.
    pub fn new(node: impl Into<String>, transport: Box<dyn Transport>, prompt: &str) -> Self {
        let prompt = Regex::new(&format!("(?m)^{}", regex::escape(prompt)))
            .expect("escaped prompt is a valid regex");
        Self {
            transport,
            node: node.into(),
            prompt,
            buffer: String::new(),
            partial: Vec::new(),
            log_line: Vec::new(),
            show_output: true,
        }
    }

    /// Stop echoing node output into the log (`--hide-output`).
    pub fn hide_output(mut self, hide: bool) -> Self {
        self.show_output = !hide;
        self
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn prompt(&self) -> &Regex {
        &self.prompt
    }

    /// Write one line terminated by `\n`.
    pub fn send_line(&mut self, line: &str) -> Result<(), ShellError> {
        debug!(node = %self.node, "> {line}");
        let mut data = Vec::with_capacity(line.len() + 1);
        data.extend_from_slice(line.as_bytes());
        data.push(b'\n');
        self.transport.write_bytes(&data)?;
        Ok(())
    }

    /// Block until `pattern` matches the output received so far.
    ///
    /// Output up to the end of the match is consumed.
    pub fn expect(&mut self, pattern: &Regex, timeout: Duration) -> Result<MatchResult, ShellError> {
        self.expect_any(std::slice::from_ref(pattern), timeout)
            .map(|(_, result)| result)
    }

    /// Like [`expect`](Self::expect) with several patterns; the earliest match
    /// in the output wins. Returns the index of the matching pattern.
    pub fn expect_any(
        &mut self,
        patterns: &[Regex],
        timeout: Duration,
    ) -> Result<(usize, MatchResult), ShellError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(found) = self.try_match(patterns) {
                return Ok(found);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(ShellError::CommandTimeout {
                    node: self.node.clone(),
                    pattern: patterns
                        .iter()
                        .map(Regex::as_str)
                        .collect::<Vec<_>>()
                        .join("|"),
                    timeout,
                    output: self.buffer.clone(),
                });
            }
            self.fill((deadline - now).min(READ_SLICE))?;
        }
    }

    /// Send `line`, wait for the next prompt and return what the command
    /// printed, without the echoed command line and without `\r`.
    pub fn cmd(&mut self, line: &str, timeout: Duration) -> Result<String, ShellError> {
        self.drain()?;
        self.send_line(line)?;
        let prompt = self.prompt.clone();
        let result = self.expect(&prompt, timeout)?;
        Ok(strip_echo(&result.before.replace('\r', ""), line))
    }

    /// Discard output that arrived outside of any command, e.g. the prompt
    /// printed after boot or a late reply to an abandoned command.
    pub fn drain(&mut self) -> Result<(), ShellError> {
        while self.fill(Duration::ZERO)? > 0 {}
        if !self.buffer.is_empty() {
            debug!(node = %self.node, bytes = self.buffer.len(), "discarding stale output");
            self.buffer.clear();
        }
        Ok(())
    }

    /// Output received but not consumed yet.
    pub fn pending_output(&self) -> &str {
        &self.buffer
    }

    pub fn close(&mut self) -> Result<(), ShellError> {
        self.flush_log_line();
        self.transport.close()
    }

    fn try_match(&mut self, patterns: &[Regex]) -> Option<(usize, MatchResult)> {
        let (index, result, end) = patterns
            .iter()
            .enumerate()
            .filter_map(|(i, p)| p.captures(&self.buffer).map(|caps| (i, p, caps)))
            .min_by_key(|(_, _, caps)| caps.get(0).map(|m| m.start()).unwrap_or(usize::MAX))
            .map(|(i, p, caps)| {
                let m = caps.get(0).map(|m| (m.start(), m.end())).unwrap_or((0, 0));
                (i, MatchResult::from_captures(p, &caps, &self.buffer[..m.0]), m.1)
            })?;
        self.buffer.drain(..end);
        Some((index, result))
    }

    /// Read once from the transport. Returns the number of bytes received.
    fn fill(&mut self, timeout: Duration) -> Result<usize, ShellError> {
        let mut chunk = [0u8; 1024];
        let n = match self.transport.read_bytes(&mut chunk, timeout) {
            Ok(n) => n,
            Err(ShellError::Closed { node, .. }) => {
                self.flush_log_line();
                return Err(ShellError::Closed {
                    node,
                    output: self.buffer.clone(),
                });
            }
            Err(e) => return Err(e),
        };
        if n == 0 {
            return Ok(0);
        }
        self.log_output(&chunk[..n]);

        self.partial.extend_from_slice(&chunk[..n]);
        let valid = match std::str::from_utf8(&self.partial) {
            Ok(_) => self.partial.len(),
            // Incomplete sequence at the end: keep it for the next read.
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(_) => self.partial.len(),
        };
        let decoded: Vec<u8> = self.partial.drain(..valid).collect();
        self.buffer.push_str(&String::from_utf8_lossy(&decoded));
        Ok(n)
    }

    fn log_output(&mut self, data: &[u8]) {
        if !self.show_output {
            return;
        }
        self.log_line.extend_from_slice(data);
        let mut start = 0;
        let ends: Vec<usize> = memchr_iter(b'\n', &self.log_line).collect();
        for end in ends {
            let line = String::from_utf8_lossy(&self.log_line[start..end]);
            info!(target: "node", "{}: {}", self.node, line.trim_end_matches('\r'));
            start = end + 1;
        }
        self.log_line.drain(..start);
    }

    fn flush_log_line(&mut self) {
        if self.show_output && !self.log_line.is_empty() {
            let line = String::from_utf8_lossy(&self.log_line);
            info!(target: "node", "{}: {}", self.node, line.trim_end());
        }
        self.log_line.clear();
    }
}

/// Drop the device's echo of `command`, which is the first line of the
/// output when the shell echoes input.
fn strip_echo(output: &str, command: &str) -> String {
    let trimmed = output.trim_start_matches('\n');
    match trimmed.split_once('\n') {
        Some((first, rest)) if first.trim_end() == command => rest.to_string(),
        None if trimmed.trim_end() == command => String::new(),
        _ => trimmed.to_string(),
    }
}
