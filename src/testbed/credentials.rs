//! IoT-LAB credentials as stored by `iotlab-auth` in `~/.iotlabrc`.
//!
//! The file holds a single line `<user>:<base64 password>`.

use super::ReservationError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }

    /// `~/.iotlabrc`, if a home directory can be determined.
    pub fn default_path() -> Option<PathBuf> {
        directories::BaseDirs::new().map(|dirs| dirs.home_dir().join(".iotlabrc"))
    }

    pub fn load(path: &Path) -> Result<Self, ReservationError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ReservationError::Credentials(format!("{}: {e}", path.display())))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ReservationError> {
        let line = content.lines().next().unwrap_or_default().trim();
        let (user, encoded) = line
            .split_once(':')
            .filter(|(user, _)| !user.is_empty())
            .ok_or_else(|| ReservationError::Credentials("expected <user>:<base64 password>".into()))?;
        let decoded = STANDARD
            .decode(encoded.trim())
            .map_err(|e| ReservationError::Credentials(format!("password is not base64: {e}")))?;
        let password = String::from_utf8(decoded)
            .map_err(|_| ReservationError::Credentials("password is not UTF-8".into()))?;
        Ok(Self::new(user, password))
    }

    /// Whether usable credentials are stored at `path`.
    pub fn available(path: &Path) -> bool {
        Self::load(path).is_ok()
    }

    /// The line `iotlab-auth` would write for these credentials.
    pub fn encode(&self) -> String {
        format!("{}:{}", self.user, STANDARD.encode(&self.password))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}
