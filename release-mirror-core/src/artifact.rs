//! Single-artifact transfer from the release source into the bucket.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::config::RepoConfig;
use crate::contract::{Asset, BlobStore, ReleaseSource};
use crate::error::{MirrorError, Result};
use crate::platform::Platform;
use crate::version_store::VersionStore;

/// Extensions kept together when inserting a repository suffix.
const COMPOUND_EXTENSIONS: [&str; 4] = [".tar.gz", ".tar.xz", ".tar.bz2", ".tar.zst"];

/// False for source archives and signature/checksum files, which are never
/// mirrored.
pub fn is_mirrorable(name: &str) -> bool {
    let lower = name.to_lowercase();
    let words = lower.replace(['-', '_'], " ");
    !(words.contains("source code") || lower.ends_with(".sha256") || lower.ends_with(".asc"))
}

/// Insert `_<short_name>` before the extension unless the name already
/// mentions the repository (case-insensitive).
pub fn disambiguate_filename(name: &str, short_name: &str) -> String {
    let lower = name.to_lowercase();
    if short_name.is_empty() || lower.contains(&short_name.to_lowercase()) {
        return name.to_string();
    }

    let ascii = name.to_ascii_lowercase();
    let split_at = COMPOUND_EXTENSIONS
        .iter()
        .find(|ext| ascii.ends_with(*ext) && ascii.len() > ext.len())
        .map(|ext| name.len() - ext.len())
        .or_else(|| name.rfind('.').filter(|idx| *idx > 0));

    match split_at {
        Some(idx) => format!("{}_{}{}", &name[..idx], short_name, &name[idx..]),
        None => format!("{name}_{short_name}"),
    }
}

/// Bucket key an asset of `config` is stored under.
pub fn destination_key(config: &RepoConfig, platform: Platform, name: &str) -> String {
    let filename = disambiguate_filename(name, config.short_name());
    match platform.directory() {
        Some(dir) => format!("{}{}/{}", config.key_prefix(), dir, filename),
        None => format!("{}{}", config.key_prefix(), filename),
    }
}

/// Downloads one asset, writes it to the bucket and records the key in the
/// repository's manifest.
#[derive(Clone)]
pub struct ArtifactSyncer {
    source: Arc<dyn ReleaseSource>,
    bucket: Arc<dyn BlobStore>,
    versions: VersionStore,
}

impl ArtifactSyncer {
    pub fn new(source: Arc<dyn ReleaseSource>, bucket: Arc<dyn BlobStore>, versions: VersionStore) -> Self {
        Self {
            source,
            bucket,
            versions,
        }
    }

    /// Returns the written key, or `None` when the asset was rejected because
    /// it was fetched for a different repository.
    pub async fn sync_asset(
        &self,
        asset: &Asset,
        config: &RepoConfig,
        platform: Platform,
    ) -> Result<Option<String>> {
        if asset.source_repo != config.repo {
            warn!(
                asset = %asset.name,
                source_repo = %asset.source_repo,
                repo = %config.repo,
                "[UPLOAD] Rejected asset fetched for another repository"
            );
            return Ok(None);
        }

        let body = self.source.download_asset(asset).await?;
        let key = destination_key(config, platform, &asset.name);
        let size = body.len();

        self.bucket.put(&key, body).await.map_err(|source| {
            error!(key = %key, error = %source, "[UPLOAD] Bucket write failed");
            MirrorError::Upload {
                key: key.clone(),
                source,
            }
        })?;
        info!(repo = %config.repo, key = %key, bytes = size, platform = %platform, "[UPLOAD] Stored artifact");

        self.versions.append_file_path(config, &key).await;
        Ok(Some(key))
    }
}
