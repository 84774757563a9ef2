//! Builds the concrete backends named by a [`CliConfig`] and hands them to
//! the core orchestrator.

use std::sync::Arc;

use anyhow::{Context, Result};
use release_mirror_core::contract::{BlobStore, KvStore};
use release_mirror_core::fs::{FsBucket, FsKvStore};
use release_mirror_core::github::GitHubReleaseClient;
use release_mirror_core::orchestrator::SyncOrchestrator;
use tracing::{info, warn};

use crate::load_config::CliConfig;

pub fn build_orchestrator(config: &CliConfig) -> Result<SyncOrchestrator> {
    let source = GitHubReleaseClient::from_config(&config.mirror)
        .context("Failed to construct GitHub client")?;

    let bucket: Option<Arc<dyn BlobStore>> = match &config.storage.bucket_dir {
        Some(dir) => {
            info!(bucket_dir = ?dir, "Using directory bucket");
            Some(Arc::new(FsBucket::new(dir)))
        }
        None => {
            warn!("No bucket_dir configured, sync requests will be refused");
            None
        }
    };

    let kv: Option<Arc<dyn KvStore>> = match &config.storage.state_dir {
        Some(dir) => {
            info!(state_dir = ?dir, "Using directory key-value store");
            Some(Arc::new(FsKvStore::new(dir)))
        }
        None => {
            warn!("No state_dir configured, running without persisted version records");
            None
        }
    };

    Ok(SyncOrchestrator::new(
        config.mirror.clone(),
        Arc::new(source),
        bucket,
        kv,
    ))
}
