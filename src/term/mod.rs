//! Terminal layer: byte transports to a node and the line-oriented shell
//! session built on top of them.
//!
//! A [`Transport`] moves bytes to and from one node, whether that node is a
//! `make term` child process, a directly opened serial port, or the
//! in-memory [`MockTransport`] used by tests. [`ShellSession`] adds the
//! send-line / expect-pattern interaction every shell command goes through.

pub mod error;
pub mod mock;
pub mod process;
pub mod serial;
pub mod session;
pub mod traits;

pub use error::ShellError;
pub use mock::{MockTransport, Responder};
pub use process::ProcessTransport;
pub use serial::SerialTransport;
pub use session::{MatchResult, ShellSession};
pub use traits::Transport;
