//! Directory-backed stores.
//!
//! [`FsBucket`] maps every object key onto a file below a root directory
//! (`tools/Windows/cli.exe` becomes `<root>/tools/Windows/cli.exe`).
//! [`FsKvStore`] keeps one file per key with the key percent-encoded into a
//! flat file name. Listing walks the tree on the blocking pool.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, error};
use walkdir::WalkDir;

use crate::contract::{BlobObject, BlobStore, KvStore};
use crate::error::StoreError;

pub struct FsBucket {
    root: PathBuf,
}

impl FsBucket {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(key);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if key.is_empty() || escapes {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

/// Every file below `root` as a `/`-separated key starting with `prefix`,
/// sorted.
fn walk_keys(root: &Path, prefix: &str) -> Result<Vec<String>, StoreError> {
    if !root.exists() {
        return Ok(Vec::new());
    }
    let mut keys = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry.map_err(|e| {
            error!(error = %e, root = %root.display(), "[STORE] Failed to walk bucket directory");
            StoreError::Io(e.into())
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let key = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if key.starts_with(prefix) {
            keys.push(key);
        }
    }
    keys.sort();
    Ok(keys)
}

#[async_trait]
impl BlobStore for FsBucket {
    async fn list(&self, prefix: &str) -> Result<Vec<BlobObject>, StoreError> {
        let root = self.root.clone();
        let owned_prefix = prefix.to_string();
        let keys = tokio::task::spawn_blocking(move || walk_keys(&root, &owned_prefix))
            .await
            .map_err(|e| StoreError::Backend(format!("bucket listing task failed: {e}")))??;
        debug!(prefix = %prefix, count = keys.len(), "[STORE] Listed bucket objects");
        Ok(keys.into_iter().map(|key| BlobObject { key }).collect())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.object_path(key)?;
        match fs::read(&path).await {
            Ok(body) => Ok(Some(body)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, key: &str, body: Vec<u8>) -> Result<(), StoreError> {
        let path = self.object_path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, body).await?;
        debug!(key = %key, path = %path.display(), "[STORE] Wrote bucket object");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = self.object_path(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

pub struct FsKvStore {
    root: PathBuf,
}

impl FsKvStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// One flat file per key; `/` and `:` are percent-encoded away.
    fn entry_path(&self, key: &str) -> Result<PathBuf, StoreError> {
        let name = urlencoding::encode(key);
        if name.is_empty() || name == "." || name == ".." {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(name.as_ref()))
    }
}

#[async_trait]
impl KvStore for FsKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(self.entry_path(key)?).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let path = self.entry_path(key)?;
        fs::create_dir_all(&self.root).await?;
        fs::write(path, value).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn kv_keys_map_to_flat_distinct_file_names() {
        let store = FsKvStore::new("/state");
        assert_eq!(
            store.entry_path("repo:octo/cli").unwrap(),
            PathBuf::from("/state/repo%3Aocto%2Fcli")
        );
        assert_ne!(store.entry_path("a/b").unwrap(), store.entry_path("a_b").unwrap());
        assert!(matches!(store.entry_path(".."), Err(StoreError::InvalidKey(_))));
        assert!(matches!(store.entry_path(""), Err(StoreError::InvalidKey(_))));
    }

    #[tokio::test]
    async fn bucket_put_list_get_delete() {
        let dir = tempdir().unwrap();
        let bucket = FsBucket::new(dir.path());

        bucket.put("tools/Windows/cli.exe", b"exe".to_vec()).await.unwrap();
        bucket.put("tools/readme.txt", b"txt".to_vec()).await.unwrap();
        bucket.put("other/x.bin", b"x".to_vec()).await.unwrap();

        let keys: Vec<String> = bucket
            .list("tools/")
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.key)
            .collect();
        assert_eq!(keys, vec!["tools/Windows/cli.exe", "tools/readme.txt"]);

        assert_eq!(
            bucket.get("tools/Windows/cli.exe").await.unwrap().as_deref(),
            Some(&b"exe"[..])
        );
        bucket.delete("tools/Windows/cli.exe").await.unwrap();
        bucket.delete("tools/Windows/cli.exe").await.unwrap();
        assert_eq!(bucket.get("tools/Windows/cli.exe").await.unwrap(), None);
    }

    #[tokio::test]
    async fn bucket_rejects_escaping_keys() {
        let dir = tempdir().unwrap();
        let bucket = FsBucket::new(dir.path());
        let err = bucket.put("../outside", b"x".to_vec()).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidKey(_)));
    }

    #[tokio::test]
    async fn listing_walks_nested_directories_in_key_order() {
        let dir = tempdir().unwrap();
        let bucket = FsBucket::new(dir.path());
        bucket.put("b/Linux/deep/z.deb", b"z".to_vec()).await.unwrap();
        bucket.put("a.txt", b"a".to_vec()).await.unwrap();
        bucket.put("b/Android/app.apk", b"apk".to_vec()).await.unwrap();

        let keys: Vec<String> = bucket.list("").await.unwrap().into_iter().map(|o| o.key).collect();
        assert_eq!(keys, vec!["a.txt", "b/Android/app.apk", "b/Linux/deep/z.deb"]);
    }

    #[tokio::test]
    async fn listing_a_missing_root_is_empty() {
        let dir = tempdir().unwrap();
        let bucket = FsBucket::new(dir.path().join("not-created"));
        assert!(bucket.list("").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn kv_store_persists_across_instances() {
        let dir = tempdir().unwrap();
        FsKvStore::new(dir.path())
            .put("repo:octo/cli", "{\"version\":\"v1\"}")
            .await
            .unwrap();

        let reopened = FsKvStore::new(dir.path());
        assert_eq!(
            reopened.get("repo:octo/cli").await.unwrap().as_deref(),
            Some("{\"version\":\"v1\"}")
        );
        assert_eq!(reopened.get("repo:other/x").await.unwrap(), None);
    }
}
