//! The byte transport behind a shell session.

use super::error::ShellError;
use std::time::Duration;

/// Byte-level channel to one node's terminal.
///
/// Implementations own the underlying process or port exclusively; no two
/// sessions ever share a transport.
pub trait Transport: Send + std::fmt::Debug {
    /// Write bytes to the node. Returns the number of bytes written.
    fn write_bytes(&mut self, data: &[u8]) -> Result<usize, ShellError>;

    /// Read whatever arrives within `timeout`.
    ///
    /// Returns `Ok(0)` when nothing arrived in time and
    /// [`ShellError::Closed`] once the other side is gone for good.
    fn read_bytes(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<usize, ShellError>;

    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Terminate the process or release the port. Must be idempotent.
    fn close(&mut self) -> Result<(), ShellError>;
}
