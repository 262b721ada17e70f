//! Building, flashing and attaching to RIOT applications.
//!
//! The RIOT build system is driven entirely through `make` with environment
//! variables (`BOARD`, `USEMODULE`, `CFLAGS`, `PORT`, `IOTLAB_NODE`, …). A
//! [`FirmwareTool`] takes one [`FirmwareTarget`] through the three steps a
//! node needs before its shell can be used.

use crate::term::Transport;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

pub mod make;
pub mod mock;

pub use make::MakeFirmware;
pub use mock::MockFirmware;

#[derive(Debug, Error)]
pub enum FirmwareError {
    #[error("building {app} for {board} ({node}) failed with exit code {code:?}\n{output}")]
    Build {
        node: String,
        board: String,
        app: String,
        code: Option<i32>,
        output: String,
    },

    #[error("flashing {app} onto {board} ({node}) failed with exit code {code:?}\n{output}")]
    Flash {
        node: String,
        board: String,
        app: String,
        code: Option<i32>,
        output: String,
    },

    #[error("cannot attach to the terminal of {node}: {reason}")]
    Terminal { node: String, reason: String },

    #[error("cannot run '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// How the shell of a started node is reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachMode {
    /// `make term`, which knows native, local boards and IoT-LAB nodes.
    #[default]
    MakeTerm,
    /// Open `PORT` directly.
    Serial,
}

/// Everything the build system needs to know about one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareTarget {
    /// Name used in logs and errors.
    pub node: String,
    pub board: String,
    pub app_dir: PathBuf,
    /// Environment passed to every `make` invocation, `BOARD` excluded.
    pub env: BTreeMap<String, String>,
}

impl FirmwareTarget {
    pub fn app_name(&self) -> String {
        self.app_dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.app_dir.display().to_string())
    }
}

/// Build, flash and terminal access for RIOT applications.
///
/// Implementations are blocking; callers in async code run them on the
/// blocking pool.
pub trait FirmwareTool: Send + Sync + std::fmt::Debug {
    fn build(&self, target: &FirmwareTarget) -> Result<(), FirmwareError>;

    fn flash(&self, target: &FirmwareTarget) -> Result<(), FirmwareError>;

    /// Open the node's terminal. The returned transport owns whatever
    /// process or port backs it.
    fn attach(&self, target: &FirmwareTarget) -> Result<Box<dyn Transport>, FirmwareError>;
}
