//! RIOT release-test harness library
//!
//! Drives RIOT nodes (native instances, local boards and FIT IoT-LAB nodes)
//! through their shell for release testing.
//!
//! # Modules
//!
//! - `config`: Configuration management with TOML support
//! - `logging`: `tracing` subscriber setup
//! - `error`: Unified error handling
//! - `boards`: Board/architecture map and node spec validation
//! - `testbed`: IoT-LAB experiments (reserve, wait, bind, release)
//! - `term`: Byte transports and the send/expect shell session
//! - `firmware`: Build, flash and terminal attach through the RIOT build system
//! - `parsers`: Pure parsers for shell command output
//! - `node`: Nodes, node controllers and their shell capabilities
//! - `orchestrator`: Per-test acquire/release, interrupt sweep, gather
//! - `release`: Runner helpers and skip checks

pub mod boards;
pub mod config;
pub mod error;
pub mod firmware;
pub mod logging;
pub mod node;
pub mod orchestrator;
pub mod parsers;
pub mod release;
pub mod term;
pub mod testbed;

// Re-export commonly used types for convenience
pub use boards::{ConfigurationError, NodeSpec};
pub use error::{HarnessError, HarnessResult};
pub use node::{
    EnvOverrides, Ifconfig, LogContext, Loramac, Node, NodeController, Ping6, Pktbuf, Reboot, Rpl,
    SharedController, Shell, Twr, Udp,
};
pub use orchestrator::{gather, Acquisition, NodeSet, Orchestrator, OrchestratorSettings, SessionRegistry};
pub use parsers::{parse_output, ParseError, ShellParser};
pub use term::ShellError;
pub use testbed::{Experiment, ExperimentClient, ReservationError, TestbedApi};

// Re-export config types
pub use config::{Config, ConfigError, ConfigLoader, ConfigResult};
