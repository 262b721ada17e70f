//! Board-architecture map and node specification validation.
//!
//! IoT-LAB names its hardware differently from RIOT's `BOARD` identifiers
//! (`iotlab-m3` is `m3:at86rf231` on the testbed, `samr21-xpro` is
//! `samr21:at86rf233`). Every translation between the two goes through
//! [`BOARD_ARCHI_MAP`], so supporting a new board is a one-line change.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Invalid or contradictory node/site specification.
///
/// Always a local configuration mistake; never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("BOARD {0} unsupported in iotlab")]
    UnsupportedBoard(String),

    #[error("no board known for IoT-LAB architecture '{0}'")]
    UnknownArchitecture(String),

    #[error(
        "unable to parse {0} as IoT-LAB node name of format \
         <node-name>-<id>.<site-name>.<domain>"
    )]
    MalformedAddress(String),

    #[error("node {address} is not on site {site}: all nodes must share a site")]
    SiteMismatch { address: String, site: String },

    #[error("all nodes must share a site (got {first} and {second})")]
    MixedSites { first: String, second: String },

    #[error("IOTLAB_NODE {address} doesn't match BOARD {board}")]
    BoardMismatch { address: String, board: String },

    #[error("BOARD or IOTLAB_NODE must be set")]
    MissingBoard,

    #[error("iotlab site must be one of {allowed:?}, got '{site}'")]
    UnknownSite { site: String, allowed: Vec<String> },
}

/// One row of the board-architecture map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoardArchi {
    /// RIOT `BOARD` identifier.
    pub board: &'static str,
    /// IoT-LAB node name; also the prefix of the node's network address.
    pub name: &'static str,
    /// Radio suffix of the IoT-LAB archi string, if the board has one.
    pub radio: Option<&'static str>,
}

impl BoardArchi {
    /// IoT-LAB `archi` string, e.g. `m3:at86rf231`, or just the name when
    /// the testbed does not list a radio for the board.
    pub fn archi(&self) -> String {
        match self.radio {
            Some(radio) => format!("{}:{}", self.name, radio),
            None => self.name.to_string(),
        }
    }

    /// Whether `address` names a node of this architecture.
    pub fn matches_address(&self, address: &str) -> bool {
        address
            .strip_prefix(self.name)
            .is_some_and(|rest| rest.starts_with('-'))
    }
}

const fn archi(board: &'static str, name: &'static str, radio: Option<&'static str>) -> BoardArchi {
    BoardArchi { board, name, radio }
}

/// Static lookup from RIOT board to IoT-LAB architecture.
pub static BOARD_ARCHI_MAP: &[BoardArchi] = &[
    archi("arduino-zero", "arduino-zero", Some("xbee")),
    archi("b-l072z-lrwan1", "st-lrwan1", Some("sx1276")),
    archi("b-l475e-iot01a", "st-iotnode", Some("multi")),
    archi("dwm1001", "dwm1001", Some("dw1000")),
    archi("firefly", "firefly", Some("multi")),
    archi("frdm-kw41z", "frdm-kw41z", Some("multi")),
    archi("iotlab-a8-m3", "a8", Some("at86rf231")),
    archi("iotlab-m3", "m3", Some("at86rf231")),
    archi("microbit", "microbit", Some("ble")),
    archi("nrf51dk", "nrf51dk", Some("ble")),
    archi("nrf52dk", "nrf52dk", Some("ble")),
    archi("nrf52832-mdk", "nrf52832mdk", Some("ble")),
    archi("nrf52840dk", "nrf52840dk", Some("multi")),
    archi("nrf52840-mdk", "nrf52840mdk", Some("multi")),
    archi("openmote-b", "openmoteb", None),
    archi("pba-d-01-kw2x", "phynode", Some("kw2xrf")),
    archi("samr21-xpro", "samr21", Some("at86rf233")),
    archi("samr30-xpro", "samr30", Some("at86rf212b")),
];

static NODE_ADDRESS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<name>[0-9A-Za-z\-]+)-(?P<id>\d+)\.(?P<site>[a-z]+)\.(?P<domain>[0-9A-Za-z\-.]+)$")
        .expect("node address regex is valid")
});

/// Look up the map row for a RIOT board.
pub fn lookup(board: &str) -> Option<&'static BoardArchi> {
    BOARD_ARCHI_MAP.iter().find(|entry| entry.board == board)
}

/// Whether `board` can be reserved on the testbed.
pub fn valid_board(board: &str) -> bool {
    lookup(board).is_some()
}

/// Boards that run on the host and never need a reservation.
pub fn is_local_board(board: &str) -> bool {
    board.starts_with("native")
}

/// The parts of a testbed node address `<name>-<id>.<site>.<domain>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAddress {
    pub name: String,
    pub id: u32,
    pub site: String,
    pub domain: String,
}

impl NodeAddress {
    pub fn parse(address: &str) -> Result<Self, ConfigurationError> {
        let caps = NODE_ADDRESS_RE
            .captures(address)
            .ok_or_else(|| ConfigurationError::MalformedAddress(address.to_string()))?;
        let id = caps["id"]
            .parse()
            .map_err(|_| ConfigurationError::MalformedAddress(address.to_string()))?;
        Ok(Self {
            name: caps["name"].to_string(),
            id,
            site: caps["site"].to_string(),
            domain: caps["domain"].to_string(),
        })
    }
}

/// Return the RIOT board for a testbed node address.
pub fn board_from_address(address: &str) -> Result<&'static str, ConfigurationError> {
    let parsed = NodeAddress::parse(address)?;
    BOARD_ARCHI_MAP
        .iter()
        .find(|entry| entry.name == parsed.name)
        .map(|entry| entry.board)
        .ok_or(ConfigurationError::UnknownArchitecture(parsed.name))
}

/// What a test asks for: a board type, an explicit testbed address, or both.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub board: Option<String>,
    pub address: Option<String>,
}

impl NodeSpec {
    pub fn board(board: impl Into<String>) -> Self {
        Self {
            board: Some(board.into()),
            address: None,
        }
    }

    pub fn address(address: impl Into<String>) -> Self {
        Self {
            board: None,
            address: Some(address.into()),
        }
    }

    /// Interpret one `--boards` entry: known boards and local boards stay
    /// boards, anything else is taken to be a testbed node address.
    pub fn from_cli(value: &str, local: bool) -> Result<Self, ConfigurationError> {
        if local || is_local_board(value) || valid_board(value) {
            return Ok(Self::board(value));
        }
        let board = board_from_address(value)?;
        Ok(Self {
            board: Some(board.to_string()),
            address: Some(value.to_string()),
        })
    }

    /// Whether the spec can be satisfied without the testbed.
    pub fn is_local(&self) -> bool {
        self.address.is_none() && self.board.as_deref().is_some_and(is_local_board)
    }
}

/// Validate a remote node specification against the experiment site.
///
/// Returns the resolved RIOT board.
pub fn validate(spec: &NodeSpec, site: &str) -> Result<String, ConfigurationError> {
    match (&spec.board, &spec.address) {
        (None, None) => Err(ConfigurationError::MissingBoard),
        (Some(board), None) => {
            if valid_board(board) {
                Ok(board.clone())
            } else {
                Err(ConfigurationError::UnsupportedBoard(board.clone()))
            }
        }
        (board, Some(address)) => {
            let parsed = NodeAddress::parse(address)?;
            if parsed.site != site {
                return Err(ConfigurationError::SiteMismatch {
                    address: address.clone(),
                    site: site.to_string(),
                });
            }
            let resolved = board_from_address(address)?;
            match board {
                Some(board) if board != resolved => Err(ConfigurationError::BoardMismatch {
                    address: address.clone(),
                    board: board.clone(),
                }),
                _ => Ok(resolved.to_string()),
            }
        }
    }
}

/// Site shared by every explicit address in `specs`, if any has one.
pub fn common_site(specs: &[NodeSpec]) -> Result<Option<String>, ConfigurationError> {
    let mut common: Option<String> = None;
    for address in specs.iter().filter_map(|spec| spec.address.as_deref()) {
        let site = NodeAddress::parse(address)?.site;
        match &common {
            Some(first) if *first != site => {
                return Err(ConfigurationError::MixedSites {
                    first: first.clone(),
                    second: site,
                })
            }
            Some(_) => {}
            None => common = Some(site),
        }
    }
    Ok(common)
}

/// Check that `site` is one of the testbed's sites.
pub fn check_site(site: &str, allowed: &[String]) -> Result<(), ConfigurationError> {
    if allowed.iter().any(|s| s == site) {
        Ok(())
    } else {
        Err(ConfigurationError::UnknownSite {
            site: site.to_string(),
            allowed: allowed.to_vec(),
        })
    }
}
