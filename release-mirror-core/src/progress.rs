//! Progress reporting for sync runs.
//!
//! A run produces [`ProgressEvent`]s into a [`ProgressSink`]; the requester
//! consumes them from the paired [`ProgressStream`]. The channel is unbounded
//! and a dropped stream is ignored by the sink, so a client that disconnects
//! never stalls or cancels the run. Every stream ends with exactly one
//! [`ProgressEvent::AllComplete`], distinct from the per-repository
//! [`ProgressEvent::RepoComplete`] markers.

use std::collections::BTreeMap;
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use futures::Stream;
use tokio::sync::mpsc;

use crate::platform::Platform;

#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProgressEvent {
    RepoStarted {
        repo: String,
    },
    ReleaseFetched {
        repo: String,
        tag: String,
        published_at: Option<DateTime<Utc>>,
    },
    UpToDate {
        repo: String,
        tag: String,
    },
    RemovingOldFiles {
        repo: String,
    },
    RemovedOldFiles {
        repo: String,
        count: usize,
    },
    DownloadStarted {
        repo: String,
        valid_assets: usize,
    },
    AssetStarted {
        index: usize,
        total: usize,
        name: String,
    },
    AssetUploaded {
        name: String,
        platform: Platform,
        key: String,
    },
    AssetRejected {
        name: String,
        source_repo: String,
    },
    AssetFailed {
        name: String,
        error: String,
    },
    /// Per-repository completion marker.
    RepoComplete {
        repo: String,
        tag: String,
        files: usize,
        platform_counts: BTreeMap<Platform, usize>,
    },
    RepoFailed {
        repo: String,
        error: String,
    },
    RunFailed {
        error: String,
    },
    /// Terminal marker, emitted once as the last event of every run.
    AllComplete,
}

impl ProgressEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressEvent::AllComplete)
    }
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgressEvent::RepoStarted { repo } => write!(f, "Starting sync of {repo}..."),
            ProgressEvent::ReleaseFetched {
                repo,
                tag,
                published_at,
            } => match published_at {
                Some(at) => write!(f, "{repo} latest release: {tag}, published {}", at.to_rfc3339()),
                None => write!(f, "{repo} latest release: {tag}"),
            },
            ProgressEvent::UpToDate { repo, tag } => {
                write!(f, "{repo} is already at {tag}, nothing to update")
            }
            ProgressEvent::RemovingOldFiles { repo } => {
                write!(f, "Removing previous files of {repo}...")
            }
            ProgressEvent::RemovedOldFiles { repo, count } => {
                write!(f, "Removed {count} previous files of {repo}")
            }
            ProgressEvent::DownloadStarted { repo, valid_assets } => write!(
                f,
                "Downloading latest files of {repo}: {valid_assets} valid assets"
            ),
            ProgressEvent::AssetStarted { index, total, name } => {
                write!(f, "Processing asset ({index}/{total}): {name}")
            }
            ProgressEvent::AssetUploaded { name, platform, key } => {
                write!(f, "Uploaded: {name} -> {platform} ({key})")
            }
            ProgressEvent::AssetRejected { name, source_repo } => {
                write!(f, "Rejected: {name} belongs to {source_repo}")
            }
            ProgressEvent::AssetFailed { name, error } => {
                write!(f, "Asset failed: {name} - {error}")
            }
            ProgressEvent::RepoComplete {
                repo,
                tag,
                files,
                platform_counts,
            } => {
                let summary = platform_counts
                    .iter()
                    .filter(|(_, count)| **count > 0)
                    .map(|(platform, count)| format!("{platform}: {count}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "{repo} sync complete, version {tag}, {files} files")?;
                if !summary.is_empty() {
                    write!(f, " ({summary})")?;
                }
                Ok(())
            }
            ProgressEvent::RepoFailed { repo, error } => {
                write!(f, "Error while syncing {repo}: {error}")
            }
            ProgressEvent::RunFailed { error } => write!(f, "Sync run failed: {error}"),
            ProgressEvent::AllComplete => f.write_str("All sync tasks complete"),
        }
    }
}

/// Producer half of a progress channel.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    tx: Option<mpsc::UnboundedSender<ProgressEvent>>,
}

impl ProgressSink {
    /// A sink that discards everything.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: ProgressEvent) {
        tracing::debug!(progress = %event, "[SYNC] progress");
        if let Some(tx) = &self.tx {
            // A closed receiver means nobody is listening; the run carries on.
            let _ = tx.send(event);
        }
    }
}

/// Consumer half of a progress channel.
#[derive(Debug)]
pub struct ProgressStream {
    rx: mpsc::UnboundedReceiver<ProgressEvent>,
}

impl ProgressStream {
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        self.rx.recv().await
    }

    /// Drain the stream up to and including the terminal marker.
    pub async fn collect_lines(mut self) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(event) = self.recv().await {
            lines.push(event.to_string());
            if event.is_terminal() {
                break;
            }
        }
        lines
    }
}

impl Stream for ProgressStream {
    type Item = ProgressEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

pub fn channel() -> (ProgressSink, ProgressStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ProgressSink { tx: Some(tx) }, ProgressStream { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dropped_stream_does_not_break_the_sink() {
        let (sink, stream) = channel();
        drop(stream);
        sink.emit(ProgressEvent::AllComplete);
    }

    #[tokio::test]
    async fn collect_lines_stops_at_terminal_marker() {
        let (sink, stream) = channel();
        sink.emit(ProgressEvent::RepoStarted { repo: "octo/cli".into() });
        sink.emit(ProgressEvent::AllComplete);
        sink.emit(ProgressEvent::RepoStarted { repo: "late/event".into() });

        let lines = stream.collect_lines().await;
        assert_eq!(lines, vec!["Starting sync of octo/cli...", "All sync tasks complete"]);
    }

    #[test]
    fn completion_summary_lists_non_empty_platforms() {
        let mut counts = BTreeMap::new();
        counts.insert(Platform::Windows, 1);
        counts.insert(Platform::Linux, 2);
        counts.insert(Platform::Other, 0);
        let line = ProgressEvent::RepoComplete {
            repo: "octo/cli".into(),
            tag: "v2.0.0".into(),
            files: 3,
            platform_counts: counts,
        }
        .to_string();
        assert_eq!(line, "octo/cli sync complete, version v2.0.0, 3 files (Windows: 1, Linux: 2)");
    }

    #[test]
    fn only_all_complete_is_terminal() {
        assert!(ProgressEvent::AllComplete.is_terminal());
        assert!(!ProgressEvent::RepoComplete {
            repo: "a/b".into(),
            tag: "v1".into(),
            files: 0,
            platform_counts: BTreeMap::new(),
        }
        .is_terminal());
    }
}
