//! Test participants: a [`Node`] describes one RIOT instance, a
//! [`NodeController`] owns its firmware build and shell session.

use crate::boards::is_local_board;
use crate::firmware::FirmwareError;
use crate::parsers::ParseError;
use crate::term::ShellError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub mod capabilities;
pub mod controller;

pub use crate::boards::NodeSpec;
pub use capabilities::{Ifconfig, Loramac, Ping6, Pktbuf, Reboot, Rpl, Shell, Twr, Udp};
pub use controller::{ControllerState, NodeController, SharedController};

static NON_WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\W+").expect("non-word regex is valid"));

/// Default log file name used when `--log-file-fmt` is given without value.
pub const DEFAULT_LOG_FILE_FMT: &str = "{module}-{function}-{node}-{time}.log";

#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Firmware(#[from] FirmwareError),

    #[error(transparent)]
    Shell(#[from] ShellError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("no application set for {0}")]
    NoApplication(String),
}

impl NodeError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Shell(e) if e.is_timeout())
    }
}

/// Per-start environment overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverrides {
    pub modules: Option<Vec<String>>,
    pub cflags: Option<String>,
    pub port: Option<String>,
    pub termflags: Option<String>,
}

impl EnvOverrides {
    pub fn modules<I, S>(mut self, modules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.modules = Some(modules.into_iter().map(Into::into).collect());
        self
    }

    pub fn cflags(mut self, cflags: impl Into<String>) -> Self {
        self.cflags = Some(cflags.into());
        self
    }

    pub fn port(mut self, port: impl Into<String>) -> Self {
        self.port = Some(port.into());
        self
    }

    pub fn termflags(mut self, termflags: impl Into<String>) -> Self {
        self.termflags = Some(termflags.into());
        self
    }

    /// Write the overrides into `env`.
    ///
    /// With `build_in_docker`, `USEMODULE` is also forwarded into the build
    /// container through `DOCKER_ENVIRONMENT_CMDLINE`, which does not pass
    /// it on by itself.
    pub fn apply(&self, env: &mut BTreeMap<String, String>, build_in_docker: bool) {
        if let Some(modules) = &self.modules {
            env.insert("USEMODULE".into(), modules.join(" "));
        }
        if build_in_docker {
            if let Some(modules) = env.get("USEMODULE").cloned() {
                let cmdline = env.entry("DOCKER_ENVIRONMENT_CMDLINE".into()).or_default();
                cmdline.push_str(&format!(" -e 'USEMODULE={modules}'"));
            }
        }
        if let Some(cflags) = &self.cflags {
            env.insert("CFLAGS".into(), cflags.clone());
        }
        if let Some(port) = &self.port {
            env.insert("PORT".into(), port.clone());
        }
        if let Some(termflags) = &self.termflags {
            env.insert("TERMFLAGS".into(), termflags.clone());
        }
    }
}

/// Values for the `{module}`, `{function}` and `{time}` fields of a
/// log-file template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogContext {
    pub module: String,
    pub function: String,
    /// Unix timestamp.
    pub time: i64,
}

impl LogContext {
    pub fn now(module: impl Into<String>, function: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            function: function.into(),
            time: chrono::Utc::now().timestamp(),
        }
    }

    pub fn render(&self, template: &str, node: &str) -> String {
        template
            .replace("{module}", &self.module)
            .replace("{function}", &self.function)
            .replace("{node}", node)
            .replace("{time}", &self.time.to_string())
    }
}

/// One logical test participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    index: usize,
    board: String,
    address: Option<String>,
    env: BTreeMap<String, String>,
}

impl Node {
    /// A node on a local board (native or attached over USB).
    pub fn local(index: usize, board: impl Into<String>) -> Self {
        Self {
            index,
            board: board.into(),
            address: None,
            env: BTreeMap::new(),
        }
    }

    /// A node bound to a testbed address of a running experiment.
    pub fn remote(index: usize, board: impl Into<String>, address: impl Into<String>, exp_id: u64) -> Self {
        let address = address.into();
        let mut env = BTreeMap::new();
        env.insert("IOTLAB_NODE".to_string(), address.clone());
        env.insert("IOTLAB_EXP_ID".to_string(), exp_id.to_string());
        Self {
            index,
            board: board.into(),
            address: Some(address),
            env,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn board(&self) -> &str {
        &self.board
    }

    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    pub fn is_local(&self) -> bool {
        self.address.is_none() || is_local_board(&self.board)
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    pub fn env_mut(&mut self) -> &mut BTreeMap<String, String> {
        &mut self.env
    }

    pub fn set_env(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.env.insert(key.into(), value.into());
    }

    /// Name used in logs: the testbed address, `<board>-<port>` for local
    /// boards with a `PORT`, `<board>-<index>` otherwise.
    pub fn name(&self) -> String {
        if let Some(address) = &self.address {
            return address.clone();
        }
        match self.env.get("PORT") {
            Some(port) => format!("{}-{}", self.board, NON_WORD_RE.replace_all(port, "-")),
            None => format!("{}-{}", self.board, self.index),
        }
    }

    /// Point `TERMLOG` at the rendered log-file template, relative to
    /// `base_dir`.
    pub fn set_termlog(&mut self, template: &str, context: &LogContext, base_dir: &Path) -> PathBuf {
        let path = base_dir.join(context.render(template, &self.name()));
        self.env.insert("TERMLOG".into(), path.display().to_string());
        path
    }
}
