//! Repository declarations and run configuration.
//!
//! Repositories are declared as configuration entries whose key starts with
//! `REPO_` and whose value has the form `owner/name:storage_path`. Entries are
//! processed in key order so a run visits repositories deterministically,
//! whatever order the host hands the entries over in.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Key prefix marking a repository declaration.
pub const REPO_KEY_PREFIX: &str = "REPO_";

/// Default interval between scheduled checks (7 days).
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(604_800);

/// Default upper bound for one full sync run (10 minutes).
pub const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(600);

/// Default number of trigger history entries kept.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

pub const DEFAULT_API_BASE: &str = "https://api.github.com";

/// One mirrored repository and the bucket path its artifacts live under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoConfig {
    pub repo: String,
    pub storage_path: String,
}

impl RepoConfig {
    pub fn new(repo: impl Into<String>, storage_path: impl Into<String>) -> Self {
        Self {
            repo: repo.into(),
            storage_path: storage_path.into(),
        }
    }

    /// Parse an `owner/name:storage_path` declaration. Only the first `:`
    /// separates the two halves. Returns `None` when the repository half or
    /// its short name is empty (`owner/`).
    pub fn parse(value: &str) -> Option<Self> {
        let (repo, path) = match value.split_once(':') {
            Some((repo, path)) => (repo.trim(), path.trim()),
            None => (value.trim(), ""),
        };
        let config = Self::new(repo, path);
        if config.short_name().is_empty() {
            return None;
        }
        Some(config)
    }

    /// The `name` half of `owner/name`.
    pub fn short_name(&self) -> &str {
        self.repo.rsplit('/').next().unwrap_or(&self.repo)
    }

    /// Bucket key prefix for this repository: the storage path without a
    /// leading slash and with exactly one trailing slash, or empty.
    pub fn key_prefix(&self) -> String {
        normalize_prefix(&self.storage_path)
    }
}

/// Normalise a configured storage path into a bucket key prefix.
pub fn normalize_prefix(storage_path: &str) -> String {
    let trimmed = storage_path.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}/")
    }
}

/// Collect every repository declaration out of a set of configuration
/// entries. Output is sorted by entry key; a repository declared twice keeps
/// its first declaration.
pub fn list_configs<I, K, V>(entries: I) -> Vec<RepoConfig>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let declarations: BTreeMap<String, String> = entries
        .into_iter()
        .filter(|(key, _)| key.as_ref().starts_with(REPO_KEY_PREFIX))
        .map(|(key, value)| (key.as_ref().to_string(), value.as_ref().to_string()))
        .collect();

    let mut configs: Vec<RepoConfig> = Vec::with_capacity(declarations.len());
    for (key, value) in declarations {
        match RepoConfig::parse(&value) {
            Some(config) => {
                if configs.iter().any(|c| c.repo == config.repo) {
                    warn!(key = %key, repo = %config.repo, "Duplicate repository declaration ignored");
                    continue;
                }
                debug!(key = %key, repo = %config.repo, path = %config.storage_path, "Parsed repository declaration");
                configs.push(config);
            }
            None => {
                warn!(key = %key, value = %value, "Repository declaration without a repository name discarded");
            }
        }
    }
    configs
}

/// Everything a sync run needs to know besides its backends.
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    pub repos: Vec<RepoConfig>,
    pub github_token: Option<String>,
    pub api_base: String,
    pub check_interval: Duration,
    pub sync_timeout: Duration,
    pub history_limit: usize,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            repos: Vec::new(),
            github_token: None,
            api_base: DEFAULT_API_BASE.to_string(),
            check_interval: DEFAULT_CHECK_INTERVAL,
            sync_timeout: DEFAULT_SYNC_TIMEOUT,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl MirrorConfig {
    /// Build a configuration from flat key/value entries (environment-style):
    /// `REPO_*` declarations, `GITHUB_TOKEN` and `CHECK_INTERVAL` in seconds.
    pub fn from_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let entries: Vec<(String, String)> = entries
            .into_iter()
            .map(|(k, v)| (k.as_ref().to_string(), v.as_ref().to_string()))
            .collect();

        let lookup = |name: &str| {
            entries
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let check_interval = match lookup("CHECK_INTERVAL") {
            Some(raw) => parse_interval(&raw).unwrap_or_else(|| {
                warn!(value = %raw, "CHECK_INTERVAL is not a number of seconds, using default");
                DEFAULT_CHECK_INTERVAL
            }),
            None => DEFAULT_CHECK_INTERVAL,
        };

        let config = Self {
            repos: list_configs(entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))),
            github_token: lookup("GITHUB_TOKEN"),
            check_interval,
            ..Self::default()
        };
        config.trace_loaded();
        config
    }

    pub fn find_repo(&self, repo: &str) -> Option<&RepoConfig> {
        self.repos.iter().find(|c| c.repo == repo)
    }

    pub fn trace_loaded(&self) {
        info!(
            repos = self.repos.len(),
            token_set = self.github_token.is_some(),
            check_interval_secs = self.check_interval.as_secs(),
            "Loaded mirror config"
        );
    }
}

/// Parse an interval given in whole seconds.
pub fn parse_interval(raw: &str) -> Option<Duration> {
    raw.trim().parse::<u64>().ok().map(Duration::from_secs)
}
