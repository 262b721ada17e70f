//! Runner helpers: option parsing and the checks that decide whether a
//! release test can run on this machine.

use crate::config::ConfigError;
use crate::node::DEFAULT_LOG_FILE_FMT;
use crate::testbed::Credentials;
use crate::HarnessError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

static RC_TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"tag:\s\d{4}.\d{2}-RC\d+").expect("rc tag regex is valid"));

/// Split a space separated option value, dropping empty items.
pub fn list_from_string(value: Option<&str>) -> Vec<String> {
    value
        .unwrap_or_default()
        .split(' ')
        .filter(|item| !item.is_empty())
        .map(String::from)
        .collect()
}

/// Resolve `--log-file-fmt`: absent disables terminal logs, an empty value
/// selects the default template in the current directory.
pub fn log_file_fmt(value: Option<&str>) -> Result<Option<String>, HarnessError> {
    match value {
        None => Ok(None),
        Some("") => {
            let cwd = std::env::current_dir()?;
            Ok(Some(cwd.join(DEFAULT_LOG_FILE_FMT).display().to_string()))
        }
        Some(fmt) => Ok(Some(fmt.to_string())),
    }
}

/// Value of a required environment variable.
pub fn required_env(name: &str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingEnv(name.to_string()))
}

/// Whether `git log --decorate` output shows a release-candidate tag.
pub fn is_rc_log(log: &str) -> bool {
    RC_TAG_RE.is_match(log)
}

/// Whether the RIOT tree at `riotbase` is checked out at a release
/// candidate.
pub fn is_release_candidate(riotbase: &Path) -> Result<bool, HarnessError> {
    let output = Command::new("git")
        .arg("-C")
        .arg(riotbase)
        .args(["log", "-1", "--oneline", "--decorate"])
        .output()?;
    if !output.status.success() {
        return Err(HarnessError::Io(std::io::Error::other(format!(
            "git log in {} failed: {}",
            riotbase.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        ))));
    }
    Ok(is_rc_log(&String::from_utf8_lossy(&output.stdout)))
}

/// Why a class of tests is skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "skip", rename_all = "snake_case")]
pub enum SkipReason {
    NotReleaseCandidate,
    MissingCredentials { path: PathBuf },
    NoSshAccess { host: String },
    LocalOnly,
    NeedsRoot,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotReleaseCandidate => f.write_str("RIOT version under test is not a release candidate"),
            Self::MissingCredentials { path } => write!(
                f,
                "Test requires IoT-LAB credentials in {}. Use `iotlab-auth` to create",
                path.display()
            ),
            Self::NoSshAccess { host } => write!(
                f,
                "Can't access IoT-LAB front-end {host} via SSH. Use key without password or `ssh-agent`"
            ),
            Self::LocalOnly => f.write_str("Test can't run on IoT-LAB"),
            Self::NeedsRoot => f.write_str("Test needs sudo to run"),
        }
    }
}

pub fn check_rc(only_rc_allowed: bool, riotbase: &Path) -> Result<Option<SkipReason>, HarnessError> {
    if only_rc_allowed && !is_release_candidate(riotbase)? {
        return Ok(Some(SkipReason::NotReleaseCandidate));
    }
    Ok(None)
}

/// Local-only tests are skipped unless running locally.
pub fn check_local(run_local: bool) -> Option<SkipReason> {
    (!run_local).then_some(SkipReason::LocalOnly)
}

/// SSH front-end of an IoT-LAB site.
pub fn frontend_host(site: &str) -> String {
    format!("{site}.iot-lab.info")
}

/// Whether `user` can log into `host` without a password prompt.
pub fn check_ssh(user: &str, host: &str) -> bool {
    let output = Command::new("ssh")
        .args(["-o", "BatchMode=yes", "-o", "ConnectTimeout=5"])
        .arg(format!("{user}@{host}"))
        .arg("echo $USER")
        .stdin(Stdio::null())
        .output();
    match output {
        Ok(output) => output.status.success() && String::from_utf8_lossy(&output.stdout).trim() == user,
        Err(e) => {
            tracing::debug!("cannot run ssh: {e}");
            false
        }
    }
}

/// Remote tests need credentials in `path` and SSH access to the front-end
/// of `site`.
pub fn check_credentials(run_local: bool, path: &Path, site: &str) -> Option<SkipReason> {
    check_credentials_with(run_local, path, site, check_ssh)
}

/// [`check_credentials`] with the SSH check supplied by the caller.
pub fn check_credentials_with<F>(run_local: bool, path: &Path, site: &str, ssh: F) -> Option<SkipReason>
where
    F: FnOnce(&str, &str) -> bool,
{
    if run_local {
        return None;
    }
    let Ok(credentials) = Credentials::load(path) else {
        return Some(SkipReason::MissingCredentials {
            path: path.to_path_buf(),
        });
    };
    let host = frontend_host(site);
    (!ssh(&credentials.user, &host)).then_some(SkipReason::NoSshAccess { host })
}

#[cfg(unix)]
pub fn check_sudo() -> Option<SkipReason> {
    // SAFETY: geteuid has no preconditions and cannot fail.
    let euid = unsafe { libc::geteuid() };
    (euid != 0).then_some(SkipReason::NeedsRoot)
}

#[cfg(not(unix))]
pub fn check_sudo() -> Option<SkipReason> {
    Some(SkipReason::NeedsRoot)
}
