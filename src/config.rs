//! Configuration loading and startup validation.
//!
//! crhub reads a TOML file naming the tracked repositories and their
//! per-repo gating policy, plus the storage location and listen address.
//! The GitHub token is taken from the `GITHUB_PERSONAL_TOKEN` environment
//! variable so it never lands in the config file.
//!
//! Missing required settings are fatal: the process refuses to start rather
//! than run with a partial configuration.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::types::RepoId;

/// Environment variable holding the GitHub API token.
pub const TOKEN_ENV_VAR: &str = "GITHUB_PERSONAL_TOKEN";

/// Default protected branch when a repository doesn't name one.
pub const DEFAULT_PROTECTED_BRANCH: &str = "master";

/// Errors raised during configuration loading.
///
/// All of these are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML.
    #[error("cannot parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// The GitHub token environment variable is missing or empty.
    #[error("missing GitHub token: set the {TOKEN_ENV_VAR} environment variable")]
    MissingToken,

    /// No repositories are configured.
    #[error("no repositories configured: the gate needs at least one [repos] entry")]
    NoRepositories,

    /// A repository full name is not of the form `owner/repo`.
    #[error("invalid repository full name: {0:?}")]
    InvalidRepoName(String),

}

/// Per-repository gating policy.
///
/// Immutable at runtime; changing policy means restarting the process.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepoPolicy {
    /// Whether an author may review their own PR by assigning it to
    /// themselves. When false, a self-assigned PR fails the gate outright.
    #[serde(default = "default_true")]
    pub with_self_assign: bool,

    /// Authors whose PRs always pass, regardless of assignment or score.
    #[serde(default)]
    pub users_bypass: HashSet<String>,

    /// The single branch the gate enforces; PRs targeting any other branch
    /// receive no status at all.
    #[serde(default = "default_protected_branch")]
    pub protected_branch: String,
}

fn default_true() -> bool {
    true
}

fn default_protected_branch() -> String {
    DEFAULT_PROTECTED_BRANCH.to_string()
}

impl Default for RepoPolicy {
    fn default() -> Self {
        RepoPolicy {
            with_self_assign: true,
            users_bypass: HashSet::new(),
            protected_branch: default_protected_branch(),
        }
    }
}

/// Raw TOML shape of the config file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    /// Address to bind the webhook server to.
    #[serde(default = "default_listen_addr")]
    listen_addr: SocketAddr,

    /// Path of the SQLite database file.
    #[serde(default = "default_database_path")]
    database_path: PathBuf,

    /// Shared secret for webhook signature verification.
    webhook_secret: String,

    /// Seconds between reconciliation passes over all open PRs.
    #[serde(default = "default_poll_interval_secs")]
    poll_interval_secs: u64,

    /// Tracked repositories, keyed by `owner/repo` full name.
    #[serde(default)]
    repos: HashMap<String, RepoPolicy>,
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 3000))
}

fn default_database_path() -> PathBuf {
    PathBuf::from("crhub.db")
}

fn default_poll_interval_secs() -> u64 {
    60
}

/// Validated runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address to bind the webhook server to.
    pub listen_addr: SocketAddr,

    /// Path of the SQLite database file.
    pub database_path: PathBuf,

    /// Shared secret for webhook signature verification.
    pub webhook_secret: Vec<u8>,

    /// Seconds between reconciliation passes.
    pub poll_interval_secs: u64,

    /// GitHub API token for status publishing.
    pub github_token: String,

    /// Tracked repositories and their policies.
    pub repos: HashMap<RepoId, RepoPolicy>,
}

impl Config {
    /// Loads and validates configuration from a TOML file, taking the GitHub
    /// token from the environment.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let raw: RawConfig = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        let token = std::env::var(TOKEN_ENV_VAR).unwrap_or_default();

        Config::from_parts(raw, token)
    }

    fn from_parts(raw: RawConfig, github_token: String) -> Result<Config, ConfigError> {
        if github_token.is_empty() {
            return Err(ConfigError::MissingToken);
        }
        if raw.repos.is_empty() {
            return Err(ConfigError::NoRepositories);
        }

        let mut repos = HashMap::with_capacity(raw.repos.len());
        for (full_name, policy) in raw.repos {
            let id = RepoId::parse_full_name(&full_name)
                .ok_or_else(|| ConfigError::InvalidRepoName(full_name.clone()))?;
            repos.insert(id, policy);
        }

        Ok(Config {
            listen_addr: raw.listen_addr,
            database_path: raw.database_path,
            webhook_secret: raw.webhook_secret.into_bytes(),
            poll_interval_secs: raw.poll_interval_secs,
            github_token,
            repos,
        })
    }

    /// Returns the policy for a repository, if tracked.
    pub fn policy(&self, repo: &RepoId) -> Option<&RepoPolicy> {
        self.repos.get(repo)
    }
}
