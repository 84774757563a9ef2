#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use release_mirror_core::contract::{
    Asset, BlobObject, BlobStore, KvStore, RateLimitSnapshot, ReleaseInfo, ReleaseSource,
};
use release_mirror_core::error::{MirrorError, StoreError};
use release_mirror_core::memory::{MemoryBucket, MemoryKvStore};

/// Shared, ordered log of store operations, e.g. `kv:put:repo:octo/cli` or
/// `bucket:delete:tools/a.exe`.
pub type OpLog = Arc<Mutex<Vec<String>>>;

pub fn op_log() -> OpLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Release source serving canned releases.
#[derive(Default)]
pub struct FakeReleases {
    releases: Mutex<HashMap<String, ReleaseInfo>>,
    failing_repos: Mutex<HashSet<String>>,
    failing_assets: Mutex<HashSet<String>>,
    download_delay: Mutex<Option<Duration>>,
    downloads: AtomicUsize,
    rate_limit: Mutex<Option<RateLimitSnapshot>>,
}

impl FakeReleases {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `tag` for `repo` with the given asset names, stamped with `repo`.
    pub fn publish(&self, repo: &str, tag: &str, names: &[&str]) {
        let assets = names
            .iter()
            .map(|name| Asset {
                name: name.to_string(),
                download_url: format!("https://downloads.test/{repo}/{tag}/{name}"),
                source_repo: repo.to_string(),
            })
            .collect();
        self.publish_release(
            repo,
            ReleaseInfo {
                tag: tag.to_string(),
                published_at: None,
                assets,
            },
        );
    }

    pub fn publish_release(&self, repo: &str, release: ReleaseInfo) {
        self.releases
            .lock()
            .unwrap()
            .insert(repo.to_string(), release);
    }

    pub fn fail_repo(&self, repo: &str) {
        self.failing_repos.lock().unwrap().insert(repo.to_string());
    }

    pub fn recover_repo(&self, repo: &str) {
        self.failing_repos.lock().unwrap().remove(repo);
    }

    pub fn fail_asset(&self, name: &str) {
        self.failing_assets.lock().unwrap().insert(name.to_string());
    }

    pub fn delay_downloads(&self, delay: Duration) {
        *self.download_delay.lock().unwrap() = Some(delay);
    }

    pub fn set_rate_limit(&self, snapshot: RateLimitSnapshot) {
        *self.rate_limit.lock().unwrap() = Some(snapshot);
    }

    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReleaseSource for FakeReleases {
    async fn fetch_latest_release(&self, repo: &str) -> Result<ReleaseInfo, MirrorError> {
        if self.failing_repos.lock().unwrap().contains(repo) {
            return Err(MirrorError::Upstream {
                repo: repo.to_string(),
                status: 502,
                reason: "Bad Gateway".into(),
            });
        }
        self.releases
            .lock()
            .unwrap()
            .get(repo)
            .cloned()
            .ok_or_else(|| MirrorError::Upstream {
                repo: repo.to_string(),
                status: 404,
                reason: "Not Found".into(),
            })
    }

    async fn download_asset(&self, asset: &Asset) -> Result<Vec<u8>, MirrorError> {
        let delay = *self.download_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing_assets.lock().unwrap().contains(&asset.name) {
            return Err(MirrorError::Download {
                url: asset.download_url.clone(),
                status: 500,
                reason: "Internal Server Error".into(),
            });
        }
        self.downloads.fetch_add(1, Ordering::SeqCst);
        Ok(asset.download_url.clone().into_bytes())
    }

    async fn fetch_rate_limit(&self) -> Option<RateLimitSnapshot> {
        self.rate_limit()
    }

    fn rate_limit(&self) -> Option<RateLimitSnapshot> {
        *self.rate_limit.lock().unwrap()
    }
}

/// Bucket recording every mutation into an [`OpLog`].
pub struct RecordingBucket {
    pub inner: MemoryBucket,
    log: OpLog,
}

impl RecordingBucket {
    pub fn new(log: OpLog) -> Self {
        Self {
            inner: MemoryBucket::new(),
            log,
        }
    }
}

#[async_trait]
impl BlobStore for RecordingBucket {
    async fn list(&self, prefix: &str) -> Result<Vec<BlobObject>, StoreError> {
        self.inner.list(prefix).await
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, body: Vec<u8>) -> Result<(), StoreError> {
        self.log.lock().unwrap().push(format!("bucket:put:{key}"));
        self.inner.put(key, body).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.log.lock().unwrap().push(format!("bucket:delete:{key}"));
        self.inner.delete(key).await
    }
}

/// Key-value store recording every write into an [`OpLog`] together with
/// the written value.
pub struct RecordingKv {
    pub inner: MemoryKvStore,
    log: OpLog,
}

impl RecordingKv {
    pub fn new(log: OpLog) -> Self {
        Self {
            inner: MemoryKvStore::new(),
            log,
        }
    }
}

#[async_trait]
impl KvStore for RecordingKv {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.log
            .lock()
            .unwrap()
            .push(format!("kv:put:{key}={value}"));
        self.inner.put(key, value).await
    }
}

/// Bucket whose deletes of the listed keys fail.
pub struct FlakyDeleteBucket {
    pub inner: MemoryBucket,
    failing: HashSet<String>,
}

impl FlakyDeleteBucket {
    pub fn new(failing: &[&str]) -> Self {
        Self {
            inner: MemoryBucket::new(),
            failing: failing.iter().map(|k| k.to_string()).collect(),
        }
    }
}

#[async_trait]
impl BlobStore for FlakyDeleteBucket {
    async fn list(&self, prefix: &str) -> Result<Vec<BlobObject>, StoreError> {
        self.inner.list(prefix).await
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, body: Vec<u8>) -> Result<(), StoreError> {
        self.inner.put(key, body).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        if self.failing.contains(key) {
            return Err(StoreError::Backend(format!("delete of {key} refused")));
        }
        self.inner.delete(key).await
    }
}
