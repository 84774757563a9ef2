//! Per-repository reconciliation: bring the bucket contents of one repository
//! in line with its latest upstream release.
//!
//! A reconciliation walks through these states:
//!
//! ```text
//! Fetching -> DecidingUpdate -> Skip
//!                            -> ClearingManifest -> DeletingOldFiles
//!                               -> UploadingAssets -> PersistingVersion
//! ```
//!
//! # Ordering
//! Within one reconciliation the manifest reset is persisted before any
//! delete, every delete finishes before the first upload, and the final
//! record is written after the last upload. A process that dies anywhere in
//! between leaves a record in `syncing` (or one with an emptied manifest),
//! which the next run treats as needing an update.
//!
//! # Failure handling
//! - Fetch and listing failures end the reconciliation; the error is
//!   persisted on the record and returned to the caller.
//! - A failed delete or a failed asset is logged, reported as progress and
//!   skipped.
//!
//! # Navigation
//! - Entry point: [`RepoReconciler::reconcile`]
//! - Update decision: [`decide_update`]

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::artifact::{is_mirrorable, ArtifactSyncer};
use crate::config::{normalize_prefix, RepoConfig};
use crate::contract::{Asset, BlobStore, ReleaseInfo, ReleaseSource};
use crate::error::Result;
use crate::ownership::Ownership;
use crate::platform::Platform;
use crate::progress::{ProgressEvent, ProgressSink};
use crate::version_store::{SyncStatus, VersionRecord, VersionStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileState {
    Fetching,
    DecidingUpdate,
    Skip,
    ClearingManifest,
    DeletingOldFiles,
    UploadingAssets,
    PersistingVersion,
    Done,
    Error,
}

impl fmt::Display for ReconcileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReconcileState::Fetching => "fetching",
            ReconcileState::DecidingUpdate => "deciding_update",
            ReconcileState::Skip => "skip",
            ReconcileState::ClearingManifest => "clearing_manifest",
            ReconcileState::DeletingOldFiles => "deleting_old_files",
            ReconcileState::UploadingAssets => "uploading_assets",
            ReconcileState::PersistingVersion => "persisting_version",
            ReconcileState::Done => "done",
            ReconcileState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Why a repository does or does not need an update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateDecision {
    /// No record exists yet.
    FirstSync,
    /// The previous run cleared the manifest but never reached its final
    /// write.
    Interrupted(SyncStatus),
    /// The configured storage path changed.
    Moved { from: String, to: String },
    NewVersion { from: String, to: String },
    /// Same version, but fewer attributable files than expected.
    Incomplete { expected: usize, actual: usize },
    UpToDate,
}

impl UpdateDecision {
    pub fn needs_update(&self) -> bool {
        !matches!(self, UpdateDecision::UpToDate)
    }
}

impl fmt::Display for UpdateDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateDecision::FirstSync => f.write_str("first sync"),
            UpdateDecision::Interrupted(status) => {
                write!(f, "previous run left the record in {status}")
            }
            UpdateDecision::Moved { from, to } => {
                write!(f, "storage path moved from '{from}' to '{to}'")
            }
            UpdateDecision::NewVersion { from, to } => write!(f, "new version {from} -> {to}"),
            UpdateDecision::Incomplete { expected, actual } => {
                write!(f, "incomplete: {actual} of {expected} files present")
            }
            UpdateDecision::UpToDate => f.write_str("up to date"),
        }
    }
}

/// Decide whether `config` needs an update to reach `release`.
///
/// `listing` is the bucket listing under the repository's storage prefix and
/// `ownership` the view built from the stored manifest.
pub fn decide_update(
    record: Option<&VersionRecord>,
    config: &RepoConfig,
    release: &ReleaseInfo,
    ownership: &Ownership,
    listing: &[String],
) -> UpdateDecision {
    let Some(record) = record else {
        return UpdateDecision::FirstSync;
    };

    // An error left behind by a failed fetch keeps its manifest and goes
    // through the regular checks below.
    let interrupted = match record.status {
        SyncStatus::Syncing => true,
        SyncStatus::Error | SyncStatus::Pending => record.file_paths.is_empty(),
        _ => false,
    };
    if interrupted {
        return UpdateDecision::Interrupted(record.status);
    }

    if normalize_prefix(&record.path) != config.key_prefix() {
        return UpdateDecision::Moved {
            from: record.path.clone(),
            to: config.storage_path.clone(),
        };
    }

    if record.version != release.tag {
        return UpdateDecision::NewVersion {
            from: record.version.clone(),
            to: release.tag.clone(),
        };
    }

    let (expected, actual) = if record.file_paths.is_empty() {
        let expected = release.assets.iter().filter(|a| is_mirrorable(&a.name)).count();
        (expected, ownership.attributable(listing).len())
    } else {
        let present = record
            .file_paths
            .iter()
            .filter(|key| listing.contains(key))
            .count();
        (record.file_paths.len(), present)
    };

    if actual < expected {
        return UpdateDecision::Incomplete { expected, actual };
    }
    UpdateDecision::UpToDate
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    UpToDate,
    Updated {
        uploaded: Vec<String>,
        deleted: usize,
        failed: usize,
        rejected: usize,
        platform_counts: BTreeMap<Platform, usize>,
    },
}

#[derive(Debug, Clone)]
pub struct ReconcileReport {
    pub repo: String,
    pub version: String,
    pub decision: UpdateDecision,
    pub outcome: ReconcileOutcome,
}

/// Reconciles single repositories against the shared bucket.
#[derive(Clone)]
pub struct RepoReconciler {
    source: Arc<dyn ReleaseSource>,
    bucket: Arc<dyn BlobStore>,
    versions: VersionStore,
    configs: Vec<RepoConfig>,
    syncer: ArtifactSyncer,
}

impl RepoReconciler {
    /// `configs` is every configured repository; it is consulted to keep
    /// other repositories' files out of the delete sweep.
    pub fn new(
        source: Arc<dyn ReleaseSource>,
        bucket: Arc<dyn BlobStore>,
        versions: VersionStore,
        configs: Vec<RepoConfig>,
    ) -> Self {
        let syncer = ArtifactSyncer::new(source.clone(), bucket.clone(), versions.clone());
        Self {
            source,
            bucket,
            versions,
            configs,
            syncer,
        }
    }

    pub fn versions(&self) -> &VersionStore {
        &self.versions
    }

    /// Reconcile one repository. On failure the error is recorded on the
    /// repository's version record before being returned.
    pub async fn reconcile(&self, config: &RepoConfig, progress: &ProgressSink) -> Result<ReconcileReport> {
        match self.try_reconcile(config, progress).await {
            Ok(report) => Ok(report),
            Err(e) => {
                error!(repo = %config.repo, state = %ReconcileState::Error, error = %e, "[SYNC][ERROR] Reconciliation failed");
                self.persist_error(config, &e.to_string()).await;
                progress.emit(ProgressEvent::RepoFailed {
                    repo: config.repo.clone(),
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn try_reconcile(&self, config: &RepoConfig, progress: &ProgressSink) -> Result<ReconcileReport> {
        let repo = config.repo.as_str();
        info!(repo = %repo, state = %ReconcileState::Fetching, "[SYNC] Starting reconciliation");
        progress.emit(ProgressEvent::RepoStarted { repo: repo.to_string() });

        let release = self.source.fetch_latest_release(repo).await?;
        progress.emit(ProgressEvent::ReleaseFetched {
            repo: repo.to_string(),
            tag: release.tag.clone(),
            published_at: release.published_at,
        });

        debug!(repo = %repo, state = %ReconcileState::DecidingUpdate, "[SYNC] Deciding update");
        let record = self.versions.load(config).await;
        let manifest = record.as_ref().map(|r| r.file_paths.clone()).unwrap_or_default();
        let ownership = Ownership::build(config, &self.configs, &self.versions, &manifest).await;
        let listing: Vec<String> = self
            .bucket
            .list(&config.key_prefix())
            .await?
            .into_iter()
            .map(|o| o.key)
            .collect();

        let decision = decide_update(record.as_ref(), config, &release, &ownership, &listing);
        info!(repo = %repo, tag = %release.tag, decision = %decision, "[SYNC] Update decision");

        if !decision.needs_update() {
            self.persist_up_to_date(config, record, &release, &ownership, &listing)
                .await;
            progress.emit(ProgressEvent::UpToDate {
                repo: repo.to_string(),
                tag: release.tag.clone(),
            });
            return Ok(ReconcileReport {
                repo: repo.to_string(),
                version: release.tag,
                decision,
                outcome: ReconcileOutcome::UpToDate,
            });
        }

        info!(repo = %repo, state = %ReconcileState::ClearingManifest, "[SYNC] Resetting manifest");
        match &record {
            Some(_) => self.versions.clear_manifest(repo).await,
            None => {
                self.versions
                    .put(repo, &VersionRecord::new(config, SyncStatus::Syncing))
                    .await
            }
        }

        info!(repo = %repo, state = %ReconcileState::DeletingOldFiles, "[SYNC] Removing previous artifacts");
        progress.emit(ProgressEvent::RemovingOldFiles { repo: repo.to_string() });
        let deleted = self
            .delete_previous(repo, &ownership.deletion_candidates(&listing))
            .await;
        progress.emit(ProgressEvent::RemovedOldFiles {
            repo: repo.to_string(),
            count: deleted,
        });

        info!(repo = %repo, state = %ReconcileState::UploadingAssets, "[SYNC] Mirroring release assets");
        let assets: Vec<&Asset> = release.assets.iter().filter(|a| is_mirrorable(&a.name)).collect();
        progress.emit(ProgressEvent::DownloadStarted {
            repo: repo.to_string(),
            valid_assets: assets.len(),
        });

        let mut uploaded = Vec::new();
        let mut failed = 0;
        let mut rejected = 0;
        let mut platform_counts: BTreeMap<Platform, usize> = BTreeMap::new();
        for (index, asset) in assets.iter().enumerate() {
            progress.emit(ProgressEvent::AssetStarted {
                index: index + 1,
                total: assets.len(),
                name: asset.name.clone(),
            });
            let platform = Platform::classify(&asset.name);
            match self.syncer.sync_asset(asset, config, platform).await {
                Ok(Some(key)) => {
                    *platform_counts.entry(platform).or_default() += 1;
                    progress.emit(ProgressEvent::AssetUploaded {
                        name: asset.name.clone(),
                        platform,
                        key: key.clone(),
                    });
                    uploaded.push(key);
                }
                Ok(None) => {
                    rejected += 1;
                    progress.emit(ProgressEvent::AssetRejected {
                        name: asset.name.clone(),
                        source_repo: asset.source_repo.clone(),
                    });
                }
                Err(e) => {
                    failed += 1;
                    warn!(repo = %repo, asset = %asset.name, error = %e, "[SYNC] Asset failed, continuing");
                    progress.emit(ProgressEvent::AssetFailed {
                        name: asset.name.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(repo = %repo, state = %ReconcileState::PersistingVersion, files = uploaded.len(), "[SYNC] Persisting version");
        let final_record = VersionRecord {
            repo: repo.to_string(),
            version: release.tag.clone(),
            status: SyncStatus::Updated,
            last_update: Utc::now(),
            path: config.storage_path.clone(),
            file_paths: uploaded.clone(),
            error: None,
        };
        self.versions.put(repo, &final_record).await;

        progress.emit(ProgressEvent::RepoComplete {
            repo: repo.to_string(),
            tag: release.tag.clone(),
            files: uploaded.len(),
            platform_counts: platform_counts.clone(),
        });
        info!(
            repo = %repo,
            state = %ReconcileState::Done,
            version = %release.tag,
            uploaded = uploaded.len(),
            deleted,
            failed,
            rejected,
            "[SYNC] Reconciliation complete"
        );

        Ok(ReconcileReport {
            repo: repo.to_string(),
            version: release.tag,
            decision,
            outcome: ReconcileOutcome::Updated {
                uploaded,
                deleted,
                failed,
                rejected,
                platform_counts,
            },
        })
    }

    /// Deletes run one at a time; a failure is logged and the sweep goes on.
    async fn delete_previous(&self, repo: &str, keys: &[String]) -> usize {
        let mut deleted = 0;
        for key in keys {
            match self.bucket.delete(key).await {
                Ok(()) => {
                    debug!(repo = %repo, key = %key, "[SYNC] Deleted previous artifact");
                    deleted += 1;
                }
                Err(e) => warn!(repo = %repo, key = %key, error = %e, "[SYNC] Failed to delete previous artifact"),
            }
        }
        deleted
    }

    async fn persist_up_to_date(
        &self,
        config: &RepoConfig,
        record: Option<VersionRecord>,
        release: &ReleaseInfo,
        ownership: &Ownership,
        listing: &[String],
    ) {
        info!(repo = %config.repo, state = %ReconcileState::Skip, "[SYNC] Already up to date");
        let mut record = record.unwrap_or_else(|| VersionRecord::new(config, SyncStatus::Synced));
        if record.file_paths.is_empty() {
            let adopted = ownership.attributable(listing);
            if !adopted.is_empty() {
                info!(repo = %config.repo, files = adopted.len(), "[SYNC] Adopting present artifacts as manifest");
                record.file_paths = adopted;
            }
        }
        record.version = release.tag.clone();
        record.status = SyncStatus::Synced;
        record.last_update = Utc::now();
        record.path = config.storage_path.clone();
        record.error = None;
        self.versions.put(&config.repo, &record).await;
    }

    async fn persist_error(&self, config: &RepoConfig, message: &str) {
        let mut record = self
            .versions
            .get(&config.repo)
            .await
            .unwrap_or_else(|| VersionRecord::new(config, SyncStatus::Error));
        if record.status == SyncStatus::Syncing {
            record.file_paths.clear();
        }
        record.status = SyncStatus::Error;
        record.error = Some(message.to_string());
        record.last_update = Utc::now();
        self.versions.put(&config.repo, &record).await;
    }
}
