use crate::boards::ConfigurationError;
use crate::config::ConfigError;
use crate::firmware::FirmwareError;
use crate::node::NodeError;
use crate::parsers::ParseError;
use crate::term::ShellError;
use crate::testbed::ReservationError;
use thiserror::Error;

/// A specialized `Result` type for harness operations.
pub type HarnessResult<T> = Result<T, HarnessError>;

/// Unified error type of the harness.
///
/// Every module keeps its own error enum; this one only wraps them so a test
/// body can use `?` across modules.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Reservation(#[from] ReservationError),

    #[error(transparent)]
    Firmware(#[from] FirmwareError),

    #[error(transparent)]
    Shell(#[from] ShellError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Node(#[from] NodeError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("interrupted by operator")]
    Interrupted,

    #[error("node task failed: {0}")]
    Task(String),

    /// A bounded gather ran out of time; results are possibly incomplete.
    #[error("{abandoned} of {total} node operations did not finish in time")]
    Incomplete { abandoned: usize, total: usize },
}

impl HarnessError {
    /// Whether the failure was a shell command running out of time.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Shell(e) => e.is_timeout(),
            Self::Node(e) => e.is_timeout(),
            _ => false,
        }
    }
}
