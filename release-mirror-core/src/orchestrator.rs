//! Sync runs over every configured repository, or a single requested one.
//!
//! [`SyncOrchestrator::run_sync`] validates the request, takes the global
//! run guard and spawns the run on the tokio runtime. The caller gets a
//! [`SyncRun`]: the progress stream plus a join handle resolving to the
//! [`RunSummary`]. Dropping the stream does not cancel the run.
//!
//! # Run guard
//! Only one run may be in flight. The guard is an in-process flag backed by a
//! persisted lock (`system:sync_lock`) holding the run's start time, so a
//! second process sharing the key-value store is refused too. A persisted
//! lock older than the larger of the run timeout and the staleness window is
//! considered abandoned.
//!
//! # Persisted keys
//! - `system:last_manual_check` / `system:last_scheduled_check`: RFC 3339
//!   completion time of the last run per trigger kind.
//! - `system:rate_limit`: last known upstream rate-limit snapshot.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{MirrorConfig, RepoConfig};
use crate::contract::{BlobStore, KvStore, RateLimitSnapshot, ReleaseSource};
use crate::error::{MirrorError, Result};
use crate::progress::{self, ProgressEvent, ProgressSink, ProgressStream};
use crate::synchronise::RepoReconciler;
use crate::version_store::{SyncStatus, VersionRecord, VersionStore, STALE_SYNC_WINDOW};

pub const SYNC_LOCK_KEY: &str = "system:sync_lock";
pub const RATE_LIMIT_KEY: &str = "system:rate_limit";
pub const LAST_MANUAL_CHECK_KEY: &str = "system:last_manual_check";
pub const LAST_SCHEDULED_CHECK_KEY: &str = "system:last_scheduled_check";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    Manual,
    Scheduled,
}

impl TriggerKind {
    pub fn last_check_key(self) -> &'static str {
        match self {
            TriggerKind::Manual => LAST_MANUAL_CHECK_KEY,
            TriggerKind::Scheduled => LAST_SCHEDULED_CHECK_KEY,
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerKind::Manual => f.write_str("manual"),
            TriggerKind::Scheduled => f.write_str("scheduled"),
        }
    }
}

/// What happened during one run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub id: Uuid,
    pub trigger: TriggerKind,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub succeeded: Vec<String>,
    pub failed: Vec<(String, String)>,
    pub timed_out: bool,
}

/// A started run.
pub struct SyncRun {
    pub id: Uuid,
    pub events: ProgressStream,
    pub handle: JoinHandle<RunSummary>,
}

impl SyncRun {
    /// Drain every progress line, then wait for the run to finish.
    pub async fn wait(self) -> Result<(Vec<String>, RunSummary)> {
        let lines = self.events.collect_lines().await;
        let summary = self.handle.await?;
        Ok((lines, summary))
    }
}

/// Read-only snapshot for the status query.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub repos: Vec<VersionRecord>,
    pub rate_limit: Option<RateLimitSnapshot>,
    pub sync_in_progress: bool,
    pub last_manual_check: Option<DateTime<Utc>>,
    pub last_scheduled_check: Option<DateTime<Utc>>,
}

struct Inner {
    config: MirrorConfig,
    source: Arc<dyn ReleaseSource>,
    bucket: Option<Arc<dyn BlobStore>>,
    kv: Option<Arc<dyn KvStore>>,
    versions: VersionStore,
    in_flight: AtomicBool,
}

/// Releases the in-process flag when the run ends, however it ends.
struct InFlightGuard {
    inner: Arc<Inner>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.inner.in_flight.store(false, Ordering::SeqCst);
    }
}

#[derive(Clone)]
pub struct SyncOrchestrator {
    inner: Arc<Inner>,
}

impl SyncOrchestrator {
    /// `bucket` and `kv` are optional bindings. Without a bucket every run is
    /// refused; without a key-value store the mirror runs degraded (no
    /// manifests, every run re-syncs).
    pub fn new(
        config: MirrorConfig,
        source: Arc<dyn ReleaseSource>,
        bucket: Option<Arc<dyn BlobStore>>,
        kv: Option<Arc<dyn KvStore>>,
    ) -> Self {
        let versions = VersionStore::new(kv.clone(), bucket.clone());
        Self {
            inner: Arc::new(Inner {
                config,
                source,
                bucket,
                kv,
                versions,
                in_flight: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &MirrorConfig {
        &self.inner.config
    }

    pub fn versions(&self) -> &VersionStore {
        &self.inner.versions
    }

    pub(crate) fn kv(&self) -> Option<&Arc<dyn KvStore>> {
        self.inner.kv.as_ref()
    }

    /// Start a run over `target` (or every configured repository).
    pub async fn run_sync(&self, target: Option<&str>, trigger: TriggerKind) -> Result<SyncRun> {
        let bucket = self
            .inner
            .bucket
            .clone()
            .ok_or_else(|| MirrorError::StoreUnavailable("artifact bucket is not bound".into()))?;

        let targets: Vec<RepoConfig> = match target {
            Some(repo) => match self.inner.config.find_repo(repo) {
                Some(config) => vec![config.clone()],
                None => {
                    warn!(repo = %repo, "[SYNC] Requested repository is not configured");
                    return Err(MirrorError::NotFound(repo.to_string()));
                }
            },
            None => self.inner.config.repos.clone(),
        };

        let guard = self.acquire().await?;
        let id = Uuid::new_v4();
        let (sink, events) = progress::channel();
        info!(run_id = %id, trigger = %trigger, repos = targets.len(), "[SYNC] Starting sync run");

        let inner = self.inner.clone();
        let handle = tokio::spawn(execute(inner, bucket, targets, trigger, id, sink, guard));
        Ok(SyncRun { id, events, handle })
    }

    /// Start a run and wait for it, collecting every progress line.
    pub async fn run_to_completion(
        &self,
        target: Option<&str>,
        trigger: TriggerKind,
    ) -> Result<(Vec<String>, RunSummary)> {
        self.run_sync(target, trigger).await?.wait().await
    }

    async fn acquire(&self) -> Result<InFlightGuard> {
        if self
            .inner
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            info!("[SYNC] Sync already running in this process, request rejected");
            return Err(MirrorError::SyncInProgress);
        }
        let guard = InFlightGuard {
            inner: self.inner.clone(),
        };

        if let Some(started) = self.persisted_lock().await {
            info!(locked_since = %started, "[SYNC] Persisted sync lock held, request rejected");
            return Err(MirrorError::SyncInProgress);
        }
        self.write_system_key(SYNC_LOCK_KEY, &Utc::now().to_rfc3339()).await;
        Ok(guard)
    }

    /// Start time of a live persisted lock, if any.
    async fn persisted_lock(&self) -> Option<DateTime<Utc>> {
        let started = self.read_timestamp(SYNC_LOCK_KEY).await?;
        let window = self.inner.config.sync_timeout.max(STALE_SYNC_WINDOW);
        let window = chrono::Duration::from_std(window).ok()?;
        if Utc::now() - started > window {
            warn!(locked_since = %started, "[SYNC] Ignoring abandoned persisted sync lock");
            return None;
        }
        Some(started)
    }

    pub async fn is_sync_in_progress(&self) -> bool {
        self.inner.in_flight.load(Ordering::SeqCst) || self.persisted_lock().await.is_some()
    }

    pub async fn last_check(&self, trigger: TriggerKind) -> Option<DateTime<Utc>> {
        self.read_timestamp(trigger.last_check_key()).await
    }

    /// Probe the upstream rate limit and persist the result.
    pub async fn probe_rate_limit(&self) -> Option<RateLimitSnapshot> {
        let snapshot = self.inner.source.fetch_rate_limit().await;
        persist_rate_limit(&self.inner, snapshot).await;
        snapshot
    }

    /// Status of every configured repository. Never fails as a whole: a
    /// missing record reads as `pending`, an unreadable one as `error`.
    pub async fn status(&self) -> StatusReport {
        let mut repos = Vec::with_capacity(self.inner.config.repos.len());
        for config in &self.inner.config.repos {
            let loaded = if self.inner.versions.is_persistent() {
                self.inner.versions.try_get(&config.repo).await
            } else {
                Ok(self.inner.versions.load(config).await)
            };
            let record = match loaded {
                Ok(Some(record)) => record,
                Ok(None) => VersionRecord::new(config, SyncStatus::Pending),
                Err(e) => {
                    error!(repo = %config.repo, error = %e, "[STORE] Could not load record for status");
                    let mut record = VersionRecord::new(config, SyncStatus::Error);
                    record.error = Some(e.to_string());
                    record
                }
            };
            repos.push(record);
        }

        let rate_limit = match self.inner.source.rate_limit() {
            Some(snapshot) => Some(snapshot),
            None => self.read_system_key(RATE_LIMIT_KEY).await.and_then(|raw| {
                serde_json::from_str(&raw)
                    .map_err(|e| warn!(error = %e, "[STORE] Unparseable persisted rate limit"))
                    .ok()
            }),
        };

        StatusReport {
            repos,
            rate_limit,
            sync_in_progress: self.is_sync_in_progress().await,
            last_manual_check: self.last_check(TriggerKind::Manual).await,
            last_scheduled_check: self.last_check(TriggerKind::Scheduled).await,
        }
    }

    async fn read_timestamp(&self, key: &str) -> Option<DateTime<Utc>> {
        let raw = self.read_system_key(key).await?;
        DateTime::parse_from_rfc3339(raw.trim())
            .map(|at| at.with_timezone(&Utc))
            .ok()
    }

    pub(crate) async fn read_system_key(&self, key: &str) -> Option<String> {
        read_system_key(&self.inner, key).await
    }

    pub(crate) async fn write_system_key(&self, key: &str, value: &str) {
        write_system_key(&self.inner, key, value).await
    }
}

async fn read_system_key(inner: &Inner, key: &str) -> Option<String> {
    let kv = inner.kv.as_ref()?;
    match kv.get(key).await {
        Ok(value) => value.filter(|v| !v.is_empty()),
        Err(e) => {
            warn!(key = %key, error = %e, "[STORE] Failed to read system key");
            None
        }
    }
}

async fn write_system_key(inner: &Inner, key: &str, value: &str) {
    let Some(kv) = inner.kv.as_ref() else {
        debug!(key = %key, "[STORE] No key-value binding, system key not written");
        return;
    };
    if let Err(e) = kv.put(key, value).await {
        warn!(key = %key, error = %e, "[STORE] Failed to write system key");
    }
}

async fn persist_rate_limit(inner: &Inner, snapshot: Option<RateLimitSnapshot>) {
    let Some(snapshot) = snapshot else {
        return;
    };
    match serde_json::to_string(&snapshot) {
        Ok(raw) => write_system_key(inner, RATE_LIMIT_KEY, &raw).await,
        Err(e) => warn!(error = %e, "[STORE] Failed to serialise rate limit"),
    }
}

/// Body of a spawned run.
async fn execute(
    inner: Arc<Inner>,
    bucket: Arc<dyn BlobStore>,
    targets: Vec<RepoConfig>,
    trigger: TriggerKind,
    id: Uuid,
    sink: ProgressSink,
    guard: InFlightGuard,
) -> RunSummary {
    let reconciler = RepoReconciler::new(
        inner.source.clone(),
        bucket,
        inner.versions.clone(),
        inner.config.repos.clone(),
    );
    let started_at = Utc::now();
    let mut succeeded = Vec::new();
    let mut failed = Vec::new();

    let work = async {
        for config in &targets {
            match reconciler.reconcile(config, &sink).await {
                Ok(report) => succeeded.push(report.repo),
                Err(e) => failed.push((config.repo.clone(), e.to_string())),
            }
        }
    };
    let timeout = inner.config.sync_timeout;
    let timed_out = tokio::time::timeout(timeout, work).await.is_err();

    if timed_out {
        let err = MirrorError::Timeout(timeout);
        error!(run_id = %id, error = %err, "[SYNC][ERROR] Sync run timed out");
        mark_timed_out(&inner.versions, &targets, &err.to_string()).await;
        sink.emit(ProgressEvent::RunFailed {
            error: err.to_string(),
        });
    }

    let finished_at = Utc::now();
    write_system_key(&inner, trigger.last_check_key(), &finished_at.to_rfc3339()).await;
    persist_rate_limit(&inner, inner.source.rate_limit()).await;
    write_system_key(&inner, SYNC_LOCK_KEY, "").await;
    drop(guard);

    info!(
        run_id = %id,
        trigger = %trigger,
        succeeded = succeeded.len(),
        failed = failed.len(),
        timed_out,
        "[SYNC] Sync run finished"
    );
    sink.emit(ProgressEvent::AllComplete);

    RunSummary {
        id,
        trigger,
        started_at,
        finished_at,
        succeeded,
        failed,
        timed_out,
    }
}

async fn mark_timed_out(versions: &VersionStore, targets: &[RepoConfig], message: &str) {
    for config in targets {
        let Some(mut record) = versions.get(&config.repo).await else {
            continue;
        };
        if record.status != SyncStatus::Syncing {
            continue;
        }
        warn!(repo = %config.repo, "[SYNC] Marking repository as failed after timeout");
        record.file_paths.clear();
        record.status = SyncStatus::Error;
        record.error = Some(message.to_string());
        record.last_update = Utc::now();
        versions.put(&config.repo, &record).await;
    }
}
