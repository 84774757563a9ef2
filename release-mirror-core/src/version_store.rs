//! Durable per-repository version records.
//!
//! Records live in the key-value store under `repo:{owner/name}` as camelCase
//! JSON. The `filePaths` manifest is the authoritative list of bucket keys the
//! mirror wrote for the record's version; [`VersionStore::clear_manifest`] is
//! the checkpoint taken before any destructive bucket operation so an
//! interrupted sync leaves a record the next run recognises as incomplete.
//!
//! # Failure policy
//! A missing key-value binding, or a backend error, never aborts the caller:
//! reads behave as "no record" (which forces a full re-sync) and writes are
//! skipped with a logged warning.
//!
//! # Staleness
//! A record left in `syncing` for longer than [`STALE_SYNC_WINDOW`] is treated
//! as abandoned. It is rewritten to `error` the next time it is read.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::RepoConfig;
use crate::contract::{BlobStore, KvStore};
use crate::error::Result;

/// Maximum time a record may stay in `syncing`.
pub const STALE_SYNC_WINDOW: Duration = Duration::from_secs(20 * 60);

/// Version string used before any release has been recorded.
pub const UNKNOWN_VERSION: &str = "unknown";

pub fn record_key(repo: &str) -> String {
    format!("repo:{repo}")
}

/// Key of the version file older deployments wrote into the bucket next to
/// the artifacts: `<prefix><owner>-<name>-version.json`.
pub fn legacy_version_key(config: &RepoConfig) -> String {
    format!(
        "{}{}-version.json",
        config.key_prefix(),
        config.repo.replace('/', "-")
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Pending,
    Syncing,
    Synced,
    Updated,
    #[default]
    Latest,
    Error,
}

impl SyncStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Synced => "synced",
            SyncStatus::Updated => "updated",
            SyncStatus::Latest => "latest",
            SyncStatus::Error => "error",
        }
    }

    /// Statuses claiming the bucket holds a complete artifact set.
    pub fn is_complete(self) -> bool {
        matches!(self, SyncStatus::Synced | SyncStatus::Updated | SyncStatus::Latest)
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn unknown_version() -> String {
    UNKNOWN_VERSION.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionRecord {
    pub repo: String,
    #[serde(default = "unknown_version")]
    pub version: String,
    #[serde(default)]
    pub status: SyncStatus,
    #[serde(default, alias = "updatedAt")]
    pub last_update: DateTime<Utc>,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub file_paths: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VersionRecord {
    /// Record for a repository that has no persisted state yet.
    pub fn new(config: &RepoConfig, status: SyncStatus) -> Self {
        Self {
            repo: config.repo.clone(),
            version: unknown_version(),
            status,
            last_update: Utc::now(),
            path: config.storage_path.clone(),
            file_paths: Vec::new(),
            error: None,
        }
    }

    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        let Ok(window) = chrono::Duration::from_std(STALE_SYNC_WINDOW) else {
            return false;
        };
        self.status == SyncStatus::Syncing && now - self.last_update > window
    }
}

/// Version file shape written by older deployments into the bucket.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyVersionFile {
    version: String,
    #[serde(default, alias = "updatedAt")]
    last_update: Option<DateTime<Utc>>,
}

/// Read/write access to version records.
#[derive(Clone, Default)]
pub struct VersionStore {
    kv: Option<Arc<dyn KvStore>>,
    legacy_bucket: Option<Arc<dyn BlobStore>>,
}

impl VersionStore {
    pub fn new(kv: Option<Arc<dyn KvStore>>, legacy_bucket: Option<Arc<dyn BlobStore>>) -> Self {
        Self { kv, legacy_bucket }
    }

    pub fn is_persistent(&self) -> bool {
        self.kv.is_some()
    }

    /// Load the record of `repo`, applying staleness recovery. Backend and
    /// parse failures are returned to the caller.
    pub async fn try_get(&self, repo: &str) -> Result<Option<VersionRecord>> {
        let Some(kv) = &self.kv else {
            debug!(repo = %repo, "[STORE] No key-value binding, version record unavailable");
            return Ok(None);
        };
        let Some(raw) = kv.get(&record_key(repo)).await? else {
            return Ok(None);
        };
        let record: VersionRecord = serde_json::from_str(&raw)?;
        Ok(Some(self.recover_stale(record, Utc::now()).await))
    }

    /// Like [`VersionStore::try_get`], but any failure reads as "no record".
    pub async fn get(&self, repo: &str) -> Option<VersionRecord> {
        match self.try_get(repo).await {
            Ok(record) => record,
            Err(e) => {
                error!(repo = %repo, error = %e, "[STORE] Failed to read version record, treating as absent");
                None
            }
        }
    }

    /// Load the record of a configured repository, falling back to the legacy
    /// bucket version file when no key-value store is bound.
    pub async fn load(&self, config: &RepoConfig) -> Option<VersionRecord> {
        if self.kv.is_some() {
            return self.get(&config.repo).await;
        }
        self.read_legacy(config).await
    }

    async fn read_legacy(&self, config: &RepoConfig) -> Option<VersionRecord> {
        let bucket = self.legacy_bucket.as_ref()?;
        let key = legacy_version_key(config);
        let body = match bucket.get(&key).await {
            Ok(Some(body)) => body,
            Ok(None) => return None,
            Err(e) => {
                error!(repo = %config.repo, key = %key, error = %e, "[STORE] Failed to read legacy version file");
                return None;
            }
        };
        match serde_json::from_slice::<LegacyVersionFile>(&body) {
            Ok(legacy) => {
                info!(repo = %config.repo, version = %legacy.version, "[STORE] Using legacy bucket version file");
                Some(VersionRecord {
                    version: legacy.version,
                    status: SyncStatus::Latest,
                    last_update: legacy.last_update.unwrap_or_default(),
                    ..VersionRecord::new(config, SyncStatus::Latest)
                })
            }
            Err(e) => {
                warn!(repo = %config.repo, key = %key, error = %e, "[STORE] Unparseable legacy version file");
                None
            }
        }
    }

    /// Overwrite the whole record of `repo`.
    pub async fn put(&self, repo: &str, record: &VersionRecord) {
        let Some(kv) = &self.kv else {
            warn!(repo = %repo, "[STORE] No key-value binding, version record not saved");
            return;
        };
        let raw = match serde_json::to_string(record) {
            Ok(raw) => raw,
            Err(e) => {
                error!(repo = %repo, error = %e, "[STORE] Failed to serialise version record");
                return;
            }
        };
        match kv.put(&record_key(repo), &raw).await {
            Ok(()) => debug!(repo = %repo, status = %record.status, version = %record.version, "[STORE] Saved version record"),
            Err(e) => error!(repo = %repo, error = %e, "[STORE] Failed to save version record"),
        }
    }

    /// Reset the manifest of `repo` and mark it `syncing`. No-op when the
    /// repository has no record yet.
    pub async fn clear_manifest(&self, repo: &str) {
        let Some(mut record) = self.get(repo).await else {
            debug!(repo = %repo, "[STORE] No record to clear");
            return;
        };
        record.file_paths.clear();
        record.status = SyncStatus::Syncing;
        record.last_update = Utc::now();
        self.put(repo, &record).await;
        info!(repo = %repo, "[STORE] Cleared manifest before replacing artifacts");
    }

    /// Append `key` to the manifest of `config.repo` unless already present,
    /// creating a minimal `syncing` record when none exists.
    pub async fn append_file_path(&self, config: &RepoConfig, key: &str) {
        let mut record = match self.get(&config.repo).await {
            Some(record) => record,
            None => VersionRecord::new(config, SyncStatus::Syncing),
        };
        if record.file_paths.iter().any(|existing| existing == key) {
            return;
        }
        record.file_paths.push(key.to_string());
        record.last_update = Utc::now();
        self.put(&config.repo, &record).await;
    }

    /// Rewrite an abandoned `syncing` record to `error`. Its partial manifest
    /// is dropped so the next run replaces the whole artifact set.
    pub async fn recover_stale(&self, mut record: VersionRecord, now: DateTime<Utc>) -> VersionRecord {
        if !record.is_stale(now) {
            return record;
        }
        warn!(
            repo = %record.repo,
            last_update = %record.last_update,
            "[STORE] Record stuck in syncing past the staleness window, marking as error"
        );
        record.file_paths.clear();
        record.status = SyncStatus::Error;
        record.error = Some(format!(
            "sync abandoned: record stayed in syncing since {}",
            record.last_update.to_rfc3339()
        ));
        record.last_update = now;
        let repo = record.repo.clone();
        self.put(&repo, &record).await;
        record
    }
}
