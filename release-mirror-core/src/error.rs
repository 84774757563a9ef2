//! Error types shared by every mirroring component.

use std::time::Duration;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, MirrorError>;

/// Failures raised by key-value and bucket backends.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store binding unavailable: {0}")]
    Unavailable(String),

    #[error("invalid object key: {0}")]
    InvalidKey(String),

    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store backend error: {0}")]
    Backend(String),
}

/// Errors surfaced by the mirroring engine.
#[derive(Debug, Error)]
pub enum MirrorError {
    /// The release API answered with a non-2xx status.
    #[error("fetching latest release of {repo} failed: {status} {reason}")]
    Upstream {
        repo: String,
        status: u16,
        reason: String,
    },

    /// An asset download answered with a non-2xx status.
    #[error("downloading {url} failed: {status} {reason}")]
    Download {
        url: String,
        status: u16,
        reason: String,
    },

    /// Writing an artifact into the bucket failed.
    #[error("uploading {key} failed: {source}")]
    Upload {
        key: String,
        #[source]
        source: StoreError,
    },

    #[error("repository not configured: {0}")]
    NotFound(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("sync run timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("a sync run is already in progress")]
    SyncInProgress,

    #[error("http transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("sync task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl MirrorError {
    /// True for errors that should be shown to the requester rather than
    /// recorded against a single repository.
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            MirrorError::NotFound(_) | MirrorError::StoreUnavailable(_) | MirrorError::SyncInProgress
        )
    }
}
