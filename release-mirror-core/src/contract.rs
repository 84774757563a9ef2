//! # contract: capability interfaces for the mirror's external collaborators
//!
//! The reconciliation engine never talks to a concrete bucket, key-value
//! store or release API directly. It goes through the three traits below:
//!
//! - [`KvStore`]: string get/put keyed by arbitrary strings. Holds version
//!   records, last-check timestamps, the sync lock and trigger history.
//! - [`BlobStore`]: the artifact bucket (`list`, `get`, `put`, `delete`).
//! - [`ReleaseSource`]: the upstream release API plus asset downloads and the
//!   rate-limit snapshot it maintains as a side effect.
//!
//! ## Mocking & Testing
//! Every trait is annotated for `mockall`; the generated `Mock*` types are
//! exported under the default `test-export-mocks` feature so integration tests
//! can inject failures. Stateful fakes live in [`crate::memory`].
//!
//! ## Implementations
//! - [`crate::memory`]: in-process stores with operation counters.
//! - [`crate::fs`]: directory-backed stores used by the CLI.
//! - [`crate::github::GitHubReleaseClient`]: reqwest client for the GitHub API.

#![allow(unused)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mockall::{automock, predicate::*};

use crate::error::{MirrorError, StoreError};

/// A downloadable file attached to a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub name: String,
    pub download_url: String,
    /// Repository the asset was fetched from, stamped by the fetcher.
    pub source_repo: String,
}

/// The latest release of a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseInfo {
    pub tag: String,
    pub published_at: Option<DateTime<Utc>>,
    pub assets: Vec<Asset>,
}

/// Upstream API quota as reported by the last response that carried it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitSnapshot {
    pub remaining: u32,
    pub limit: u32,
    pub reset_at: DateTime<Utc>,
}

/// One object listed from the bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobObject {
    pub key: String,
}

/// String key-value store.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

/// Object bucket holding mirrored artifacts.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// List objects whose key starts with `prefix` (empty lists everything),
    /// sorted by key.
    async fn list(&self, prefix: &str) -> Result<Vec<BlobObject>, StoreError>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Write `body` at `key`, replacing any existing object.
    async fn put(&self, key: &str, body: Vec<u8>) -> Result<(), StoreError>;

    /// Remove `key`. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Upstream release API.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ReleaseSource: Send + Sync {
    /// Fetch the latest published release of `repo` (`owner/name`). Every
    /// returned asset has `source_repo == repo`.
    async fn fetch_latest_release(&self, repo: &str) -> Result<ReleaseInfo, MirrorError>;

    /// Download an asset body.
    async fn download_asset(&self, asset: &Asset) -> Result<Vec<u8>, MirrorError>;

    /// Standalone rate-limit probe. Transport failures are logged and
    /// swallowed; the returned value is the snapshot after the probe.
    async fn fetch_rate_limit(&self) -> Option<RateLimitSnapshot>;

    /// Last rate-limit snapshot seen by this source, if any.
    fn rate_limit(&self) -> Option<RateLimitSnapshot>;
}
