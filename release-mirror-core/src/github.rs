//! GitHub release API client.
//!
//! Fetches `GET /repos/{owner}/{name}/releases/latest`, stamps every asset
//! with the repository it came from, downloads asset bodies, and keeps a
//! rate-limit snapshot parsed from the `x-ratelimit-*` headers of every
//! response that carries them.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::config::MirrorConfig;
use crate::contract::{Asset, RateLimitSnapshot, ReleaseInfo, ReleaseSource};
use crate::error::{MirrorError, Result};

const USER_AGENT: &str = concat!("release-mirror/", env!("CARGO_PKG_VERSION"));
const GITHUB_ACCEPT: &str = "application/vnd.github+json";

#[derive(Debug, Deserialize)]
struct GitHubRelease {
    tag_name: String,
    #[serde(default)]
    published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    assets: Vec<GitHubAsset>,
}

#[derive(Debug, Deserialize)]
struct GitHubAsset {
    name: String,
    browser_download_url: String,
}

impl GitHubRelease {
    fn into_release_info(self, repo: &str) -> ReleaseInfo {
        ReleaseInfo {
            tag: self.tag_name,
            published_at: self.published_at,
            assets: self
                .assets
                .into_iter()
                .map(|a| Asset {
                    name: a.name,
                    download_url: a.browser_download_url,
                    source_repo: repo.to_string(),
                })
                .collect(),
        }
    }
}

/// Parse `x-ratelimit-{remaining,limit,reset}`. All three must be present and
/// numeric; otherwise `None`.
pub fn parse_rate_limit(headers: &HeaderMap) -> Option<RateLimitSnapshot> {
    let read = |name: &str| -> Option<i64> {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<i64>().ok())
    };
    let remaining = u32::try_from(read("x-ratelimit-remaining")?).ok()?;
    let limit = u32::try_from(read("x-ratelimit-limit")?).ok()?;
    let reset_at = DateTime::from_timestamp(read("x-ratelimit-reset")?, 0)?;
    Some(RateLimitSnapshot {
        remaining,
        limit,
        reset_at,
    })
}

#[derive(Clone)]
pub struct GitHubReleaseClient {
    client: Client,
    api_base: String,
    token: Option<String>,
    rate_limit: Arc<Mutex<Option<RateLimitSnapshot>>>,
}

impl GitHubReleaseClient {
    pub fn new(api_base: impl Into<String>, token: Option<String>) -> Result<Self> {
        let client = Client::builder().user_agent(USER_AGENT).build()?;
        let api_base = api_base.into().trim_end_matches('/').to_string();
        info!(api_base = %api_base, token_set = token.is_some(), "Initialised GitHub release client");
        Ok(Self {
            client,
            api_base,
            token,
            rate_limit: Arc::new(Mutex::new(None)),
        })
    }

    pub fn from_config(config: &MirrorConfig) -> Result<Self> {
        Self::new(config.api_base.clone(), config.github_token.clone())
    }

    fn api_get(&self, url: &str) -> reqwest::RequestBuilder {
        let request = self.client.get(url).header(ACCEPT, GITHUB_ACCEPT);
        match &self.token {
            Some(token) => request.header(AUTHORIZATION, format!("Bearer {token}")),
            None => request,
        }
    }

    fn record_rate_limit(&self, headers: &HeaderMap) {
        let Some(snapshot) = parse_rate_limit(headers) else {
            return;
        };
        debug!(
            remaining = snapshot.remaining,
            limit = snapshot.limit,
            reset_at = %snapshot.reset_at,
            "GitHub rate limit updated"
        );
        if let Ok(mut guard) = self.rate_limit.lock() {
            *guard = Some(snapshot);
        }
    }
}

fn reason(status: StatusCode) -> String {
    status.canonical_reason().unwrap_or("").to_string()
}

#[async_trait]
impl ReleaseSource for GitHubReleaseClient {
    async fn fetch_latest_release(&self, repo: &str) -> Result<ReleaseInfo> {
        let url = format!("{}/repos/{}/releases/latest", self.api_base, repo);
        info!(repo = %repo, url = %url, "Fetching latest release");

        let response = self.api_get(&url).send().await?;
        self.record_rate_limit(response.headers());

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(repo = %repo, status = %status, body = %body, "GitHub API returned error for latest release");
            return Err(MirrorError::Upstream {
                repo: repo.to_string(),
                status: status.as_u16(),
                reason: reason(status),
            });
        }

        let release: GitHubRelease = response.json().await?;
        let info = release.into_release_info(repo);
        info!(repo = %repo, tag = %info.tag, assets = info.assets.len(), "Fetched latest release");
        Ok(info)
    }

    async fn download_asset(&self, asset: &Asset) -> Result<Vec<u8>> {
        debug!(asset = %asset.name, url = %asset.download_url, "Downloading asset");
        let response = self.client.get(&asset.download_url).send().await?;
        let status = response.status();
        if !status.is_success() {
            error!(asset = %asset.name, url = %asset.download_url, status = %status, "Asset download failed");
            return Err(MirrorError::Download {
                url: asset.download_url.clone(),
                status: status.as_u16(),
                reason: reason(status),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }

    async fn fetch_rate_limit(&self) -> Option<RateLimitSnapshot> {
        let url = format!("{}/rate_limit", self.api_base);
        match self.api_get(&url).send().await {
            Ok(response) => {
                self.record_rate_limit(response.headers());
                if !response.status().is_success() {
                    warn!(status = %response.status(), "GitHub rate limit probe returned error");
                }
            }
            Err(e) => warn!(error = %e, "GitHub rate limit probe failed"),
        }
        self.rate_limit()
    }

    fn rate_limit(&self) -> Option<RateLimitSnapshot> {
        self.rate_limit.lock().ok().and_then(|guard| *guard)
    }
}
