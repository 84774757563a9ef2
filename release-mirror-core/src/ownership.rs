//! Decides which bucket keys belong to a repository.
//!
//! Several repositories may share one storage path, so a key under a
//! repository's prefix is not automatically its own. Ownership is resolved
//! in this order:
//!
//! 1. Keys listed in another configured repository's manifest, and the legacy
//!    `-version.json` files, are protected and never attributed to anybody.
//! 2. A non-empty manifest of the repository itself is authoritative.
//! 3. Without a manifest, a filename heuristic applies: the repository's short
//!    name must appear as a delimited token in the key (relative to the
//!    storage prefix). A key that any other configured repository matches
//!    as well is ambiguous and left alone. An empty short name claims
//!    nothing.

use std::collections::HashSet;

use regex::Regex;
use tracing::{debug, warn};

use crate::config::RepoConfig;
use crate::version_store::{legacy_version_key, VersionStore};

/// Matches `short_name` surrounded by path or filename delimiters.
fn token_pattern(short_name: &str) -> Option<Regex> {
    if short_name.is_empty() {
        return None;
    }
    let pattern = format!(
        r"(?i)(^|[/_\-.\s]){}($|[/_\-.\s])",
        regex::escape(short_name)
    );
    match Regex::new(&pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            warn!(short_name = %short_name, error = %e, "Could not build ownership pattern");
            None
        }
    }
}

struct Claimant {
    prefix: String,
    pattern: Option<Regex>,
}

impl Claimant {
    fn new(config: &RepoConfig) -> Self {
        Self {
            prefix: config.key_prefix(),
            pattern: token_pattern(config.short_name()),
        }
    }

    fn matches(&self, key: &str) -> bool {
        let Some(relative) = key.strip_prefix(self.prefix.as_str()) else {
            return false;
        };
        self.pattern
            .as_ref()
            .is_some_and(|re| re.is_match(relative))
    }
}

/// Ownership view of one repository against every other configured one.
pub struct Ownership {
    repo: String,
    me: Claimant,
    manifest: HashSet<String>,
    protected: HashSet<String>,
    others: Vec<Claimant>,
}

impl Ownership {
    /// Build the view for `config`. `manifest` is the repository's own
    /// manifest as it was before any reset. Manifests of the other configured
    /// repositories are loaded from `versions`.
    pub async fn build(
        config: &RepoConfig,
        configs: &[RepoConfig],
        versions: &VersionStore,
        manifest: &[String],
    ) -> Self {
        let mut protected: HashSet<String> = configs.iter().map(legacy_version_key).collect();
        protected.insert(legacy_version_key(config));

        let mut others = Vec::new();
        for other in configs.iter().filter(|c| c.repo != config.repo) {
            if let Some(record) = versions.get(&other.repo).await {
                protected.extend(record.file_paths);
            }
            others.push(Claimant::new(other));
        }

        debug!(
            repo = %config.repo,
            manifest = manifest.len(),
            protected = protected.len(),
            "Built ownership view"
        );

        Self {
            repo: config.repo.clone(),
            me: Claimant::new(config),
            manifest: manifest.iter().cloned().collect(),
            protected,
            others,
        }
    }

    pub fn has_manifest(&self) -> bool {
        !self.manifest.is_empty()
    }

    /// True when `key` must never be removed on behalf of this repository.
    pub fn is_protected(&self, key: &str) -> bool {
        self.protected.contains(key)
    }

    /// Filename heuristic only, ignoring manifests.
    pub fn heuristic_match(&self, key: &str) -> bool {
        if !self.me.matches(key) {
            return false;
        }
        let contested = self
            .others
            .iter()
            .any(|other| other.matches(key));
        if contested {
            debug!(repo = %self.repo, key = %key, "Key also claimed by another repository, leaving it");
        }
        !contested
    }

    /// True when `key` belongs to this repository.
    pub fn owns(&self, key: &str) -> bool {
        if self.is_protected(key) {
            return false;
        }
        if self.has_manifest() {
            return self.manifest.contains(key);
        }
        self.heuristic_match(key)
    }

    /// Keys to remove before uploading a new artifact set. With a manifest
    /// these are the manifest entries (wherever they live); otherwise the
    /// heuristically attributable keys of `listing`.
    pub fn deletion_candidates(&self, listing: &[String]) -> Vec<String> {
        let mut keys: Vec<String> = if self.has_manifest() {
            self.manifest
                .iter()
                .filter(|key| !self.is_protected(key))
                .cloned()
                .collect()
        } else {
            listing
                .iter()
                .filter(|key| self.owns(key))
                .cloned()
                .collect()
        };
        keys.sort();
        keys
    }

    /// Keys of `listing` attributable to this repository.
    pub fn attributable(&self, listing: &[String]) -> Vec<String> {
        listing
            .iter()
            .filter(|key| self.owns(key))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryKvStore;
    use crate::version_store::{SyncStatus, VersionRecord};
    use std::sync::Arc;

    fn configs() -> Vec<RepoConfig> {
        vec![
            RepoConfig::new("acme/app", "shared"),
            RepoConfig::new("acme/app-pro", "shared"),
        ]
    }

    fn keys(list: &[&str]) -> Vec<String> {
        list.iter().map(|k| k.to_string()).collect()
    }

    #[tokio::test]
    async fn keys_matching_several_repositories_are_left_alone() {
        let configs = configs();
        let versions = VersionStore::default();
        let app = Ownership::build(&configs[0], &configs, &versions, &[]).await;
        let pro = Ownership::build(&configs[1], &configs, &versions, &[]).await;

        let listing = keys(&[
            "shared/Windows/setup_app.exe",
            "shared/Windows/setup_app-pro.exe",
            "shared/Linux/pro_app-pro.deb",
            "shared/readme.txt",
        ]);
        assert_eq!(app.deletion_candidates(&listing), keys(&["shared/Windows/setup_app.exe"]));
        assert!(pro.deletion_candidates(&listing).is_empty());
        assert!(!app.heuristic_match("shared/Windows/setup_app-pro.exe"));
        assert!(!pro.heuristic_match("shared/Windows/setup_app-pro.exe"));
    }

    #[tokio::test]
    async fn empty_short_name_claims_nothing() {
        let configs = vec![RepoConfig::new("octo/", "tools")];
        let view = Ownership::build(&configs[0], &configs, &VersionStore::default(), &[]).await;
        assert!(!view.owns("tools/Windows/cli.exe"));
        assert!(!view.owns("tools/Linux/a..b.deb"));
    }

    #[tokio::test]
    async fn foreign_manifest_entries_are_protected() {
        let configs = configs();
        let kv = Arc::new(MemoryKvStore::new());
        let versions = VersionStore::new(Some(kv), None);
        let mut pro = VersionRecord::new(&configs[1], SyncStatus::Updated);
        pro.file_paths = keys(&["shared/Linux/app-linux.deb"]);
        versions.put("acme/app-pro", &pro).await;

        let app = Ownership::build(&configs[0], &configs, &versions, &[]).await;
        assert!(!app.owns("shared/Linux/app-linux.deb"));
        assert!(app.owns("shared/Linux/app-amd64.deb"));
    }

    #[tokio::test]
    async fn own_manifest_is_authoritative() {
        let configs = configs();
        let manifest = keys(&["old/Windows/app.exe"]);
        let app = Ownership::build(&configs[0], &configs, &VersionStore::default(), &manifest).await;

        assert!(!app.owns("shared/Windows/setup_app.exe"));
        assert_eq!(app.deletion_candidates(&[]), manifest);
    }

    #[tokio::test]
    async fn legacy_version_files_are_never_attributed() {
        let configs = vec![RepoConfig::new("octo/cli", "tools")];
        let view = Ownership::build(&configs[0], &configs, &VersionStore::default(), &[]).await;
        assert!(!view.owns("tools/octo-cli-version.json"));
        assert!(view.owns("tools/Linux/cli-linux.deb"));
    }

    #[tokio::test]
    async fn storage_prefix_does_not_count_as_a_token() {
        let configs = vec![RepoConfig::new("octo/cli", "cli")];
        let view = Ownership::build(&configs[0], &configs, &VersionStore::default(), &[]).await;
        assert!(!view.owns("cli/Windows/unrelated.exe"));
        assert!(view.owns("cli/Windows/cli.exe"));
    }

    #[tokio::test]
    async fn similar_names_are_not_tokens() {
        let configs = vec![
            RepoConfig::new("2dust/v2rayN", "proxy"),
            RepoConfig::new("2dust/v2rayNG", "proxy"),
        ];
        let n = Ownership::build(&configs[0], &configs, &VersionStore::default(), &[]).await;
        assert!(!n.owns("proxy/Android/v2rayNG_1.8.apk"));
        assert!(n.owns("proxy/Windows/v2rayN-windows-64.zip"));
    }
}
