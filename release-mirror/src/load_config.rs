//! `load_config`: reads the YAML config file and merges environment overrides
//! into a [`CliConfig`].
//!
//! This is the only place where untrusted YAML is parsed. The file holds no
//! secrets; the GitHub token only ever comes from the environment.
//!
//! # Accepted schema
//! ```yaml
//! storage:
//!   bucket_dir: ./mirror/bucket   # omitted: bucket unbound, every sync refused
//!   state_dir: ./mirror/state     # omitted: no key-value store (degraded mode)
//! github:
//!   api_base: https://api.github.com
//! check_interval: 604800          # seconds
//! sync_timeout: 600               # seconds
//! history_limit: 50
//! repos:
//!   REPO_1: "octo/cli:tools/"
//! ```
//!
//! # Environment
//! `GITHUB_TOKEN`, `CHECK_INTERVAL` (seconds) and any `REPO_*` variable. A
//! `REPO_*` variable replaces a file entry with the same key.

use anyhow::{Context, Result};
use release_mirror_core::config::{
    list_configs, parse_interval, MirrorConfig, DEFAULT_API_BASE, DEFAULT_HISTORY_LIMIT,
    REPO_KEY_PREFIX,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Default, Deserialize)]
pub struct StorageSection {
    #[serde(default)]
    pub bucket_dir: Option<PathBuf>,
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
pub struct GithubSection {
    #[serde(default)]
    pub api_base: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    storage: StorageSection,
    #[serde(default)]
    github: GithubSection,
    #[serde(default)]
    check_interval: Option<u64>,
    #[serde(default)]
    sync_timeout: Option<u64>,
    #[serde(default)]
    history_limit: Option<usize>,
    #[serde(default)]
    repos: BTreeMap<String, String>,
}

/// Loaded configuration: backend locations plus the core mirror config.
#[derive(Debug)]
pub struct CliConfig {
    pub storage: StorageSection,
    pub mirror: MirrorConfig,
}

/// Load `path` and apply overrides from the process environment.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CliConfig> {
    load_config_with_env(path, std::env::vars())
}

/// Load `path` and apply overrides from `env`.
pub fn load_config_with_env<P, I>(path: P, env: I) -> Result<CliConfig>
where
    P: AsRef<Path>,
    I: IntoIterator<Item = (String, String)>,
{
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let content = fs::read_to_string(path_ref)
        .map_err(|e| {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            e
        })
        .with_context(|| format!("Failed to read config file {path_ref:?}"))?;

    let raw: RawConfig = serde_yaml::from_str(&content)
        .map_err(|e| {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            e
        })
        .context("Failed to parse config YAML")?;

    let env: BTreeMap<String, String> = env.into_iter().collect();

    let mut declarations = raw.repos;
    for (key, value) in env.iter().filter(|(k, _)| k.starts_with(REPO_KEY_PREFIX)) {
        if declarations.insert(key.clone(), value.clone()).is_some() {
            info!(key = %key, "Repository declaration overridden from environment");
        }
    }
    let unprefixed: Vec<&String> = declarations
        .keys()
        .filter(|k| !k.starts_with(REPO_KEY_PREFIX))
        .collect();
    if !unprefixed.is_empty() {
        warn!(keys = ?unprefixed, "Ignoring repos entries without the REPO_ prefix");
    }

    let file_interval = raw
        .check_interval
        .map(Duration::from_secs)
        .unwrap_or(MirrorConfig::default().check_interval);
    let check_interval = match env.get("CHECK_INTERVAL") {
        Some(raw_interval) => parse_interval(raw_interval).unwrap_or_else(|| {
            warn!(value = %raw_interval, "CHECK_INTERVAL is not a number of seconds, ignoring");
            file_interval
        }),
        None => file_interval,
    };

    let mirror = MirrorConfig {
        repos: list_configs(&declarations),
        github_token: env
            .get("GITHUB_TOKEN")
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty()),
        api_base: raw
            .github
            .api_base
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
        check_interval,
        sync_timeout: raw
            .sync_timeout
            .map(Duration::from_secs)
            .unwrap_or(MirrorConfig::default().sync_timeout),
        history_limit: raw.history_limit.unwrap_or(DEFAULT_HISTORY_LIMIT),
    };
    mirror.trace_loaded();

    Ok(CliConfig {
        storage: raw.storage,
        mirror,
    })
}
