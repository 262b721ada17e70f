//! Shell interaction errors.
//!
//! `CommandTimeout` and [`ParseError`](crate::parsers::ParseError) are kept
//! apart: a timeout means the expected output never appeared, the command
//! may still have run on the device.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ShellError {
    /// Expected output did not appear in time.
    #[error("timed out after {timeout:?} waiting for /{pattern}/ on {node}; output so far:\n{output}")]
    CommandTimeout {
        node: String,
        pattern: String,
        timeout: Duration,
        output: String,
    },

    /// The device reported a failure for a command.
    #[error("'{command}' failed on {node}:\n{output}")]
    CommandFailed {
        node: String,
        command: String,
        output: String,
    },

    /// The terminal process exited or the port went away.
    #[error("terminal of {node} closed; last output:\n{output}")]
    Closed { node: String, output: String },

    /// The controller was stopped and cannot run commands any more.
    #[error("node {0} is stopped")]
    Stopped(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),
}

impl ShellError {
    pub fn failed(node: impl Into<String>, command: impl Into<String>, output: impl Into<String>) -> Self {
        Self::CommandFailed {
            node: node.into(),
            command: command.into(),
            output: output.into(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::CommandTimeout { .. })
    }
}
