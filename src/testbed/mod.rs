//! FIT IoT-LAB testbed: reservation API, credentials and experiments.
//!
//! [`TestbedApi`] is the narrow REST surface the harness needs. Everything
//! above it ([`ExperimentClient`], [`Experiment`]) is written against the
//! trait, so tests swap in [`MockTestbed`] and never touch the network.

use crate::boards::ConfigurationError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub mod client;
pub mod credentials;
pub mod experiment;
pub mod mock;
pub mod rest;

pub use client::{match_addresses, ExperimentClient};
pub use credentials::Credentials;
pub use experiment::{Experiment, Phase, RemoteNode};
pub use mock::MockTestbed;
pub use rest::RestTestbed;

#[derive(Debug, Error)]
pub enum ReservationError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("IoT-LAB request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success answer from the API, body passed through unchanged.
    #[error("IoT-LAB API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("experiment {id} cannot start: state {state}")]
    Failed { id: ReservationId, state: ExperimentState },

    #[error("experiment {id} not running after {waited:?}")]
    Timeout { id: ReservationId, waited: Duration },

    #[error("no reserved node left for {0}")]
    Unmatched(String),

    #[error("no alive {name} node at {site}")]
    NoNodeAvailable { name: String, site: String },

    #[error("IoT-LAB credentials unavailable: {0}")]
    Credentials(String),
}

impl ReservationError {
    pub fn api(status: u16, body: impl Into<String>) -> Self {
        Self::Api {
            status,
            body: body.into(),
        }
    }
}

/// Experiment id assigned by the testbed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReservationId(pub u64);

impl fmt::Display for ReservationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Experiment state as reported by the API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExperimentState {
    Waiting,
    ToLaunch,
    Launching,
    Running,
    Finishing,
    Terminated,
    Stopped,
    Error,
    Other(String),
}

impl ExperimentState {
    /// States from which the experiment will never reach `Running`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminated | Self::Stopped | Self::Error | Self::Finishing)
    }
}

impl From<&str> for ExperimentState {
    fn from(value: &str) -> Self {
        match value {
            "Waiting" => Self::Waiting,
            "toLaunch" | "ToLaunch" => Self::ToLaunch,
            "Launching" => Self::Launching,
            "Running" => Self::Running,
            "Finishing" => Self::Finishing,
            "Terminated" => Self::Terminated,
            "Stopped" => Self::Stopped,
            "Error" => Self::Error,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for ExperimentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Other(state) => f.write_str(state),
            known => write!(f, "{known:?}"),
        }
    }
}

impl<'de> Deserialize<'de> for ExperimentState {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::from(raw.as_str()))
    }
}

impl Serialize for ExperimentState {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

/// Nodes requested by one experiment. The testbed cannot mix both kinds in a
/// single submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Resources {
    /// `count` nodes of an architecture, chosen by the testbed.
    Alias { count: usize, archi: String, site: String },
    /// Explicit node addresses.
    Physical { addresses: Vec<String> },
}

impl Resources {
    pub fn len(&self) -> usize {
        match self {
            Self::Alias { count, .. } => *count,
            Self::Physical { addresses } => addresses.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExperimentRequest {
    pub name: String,
    /// Minutes.
    pub duration: u32,
    pub resources: Resources,
}

/// One entry of the testbed's node inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestbedNode {
    pub network_address: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub archi: String,
    #[serde(default)]
    pub site: String,
}

impl TestbedNode {
    pub fn is_alive(&self) -> bool {
        self.state == "Alive"
    }
}

/// The IoT-LAB REST calls the harness relies on.
#[async_trait]
pub trait TestbedApi: Send + Sync + fmt::Debug {
    async fn submit(&self, request: &ExperimentRequest) -> Result<ReservationId, ReservationError>;

    async fn state(&self, id: ReservationId) -> Result<ExperimentState, ReservationError>;

    /// Network addresses of the nodes bound to the experiment, in API order.
    async fn nodes(&self, id: ReservationId) -> Result<Vec<String>, ReservationError>;

    async fn stop(&self, id: ReservationId) -> Result<(), ReservationError>;

    /// Node inventory of a site.
    async fn site_nodes(&self, site: &str) -> Result<Vec<TestbedNode>, ReservationError>;
}
