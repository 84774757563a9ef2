//! Timer-driven entry point.
//!
//! Each tick compares the last scheduled check against the configured
//! interval and starts a full run when it is due. Every tick outcome is
//! appended to a bounded history kept under `system:trigger_history`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::MirrorError;
use crate::orchestrator::{SyncOrchestrator, SyncRun, TriggerKind};

pub const TRIGGER_HISTORY_KEY: &str = "system:trigger_history";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerStatus {
    Triggered,
    Skipped,
    Error,
}

/// One history entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerRecord {
    pub at: DateTime<Utc>,
    pub status: TriggerStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

pub enum TickOutcome {
    Triggered(SyncRun),
    Skipped(String),
    Errored(MirrorError),
}

impl TickOutcome {
    pub fn status(&self) -> TriggerStatus {
        match self {
            TickOutcome::Triggered(_) => TriggerStatus::Triggered,
            TickOutcome::Skipped(_) => TriggerStatus::Skipped,
            TickOutcome::Errored(_) => TriggerStatus::Error,
        }
    }
}

pub struct ScheduledTrigger {
    orchestrator: SyncOrchestrator,
}

impl ScheduledTrigger {
    pub fn new(orchestrator: SyncOrchestrator) -> Self {
        Self { orchestrator }
    }

    pub async fn tick(&self, now: DateTime<Utc>) -> TickOutcome {
        let outcome = self.evaluate(now).await;
        let detail = match &outcome {
            TickOutcome::Triggered(run) => Some(format!("run {}", run.id)),
            TickOutcome::Skipped(reason) => Some(reason.clone()),
            TickOutcome::Errored(e) => Some(e.to_string()),
        };
        info!(status = ?outcome.status(), detail = ?detail, "[SYNC] Scheduled tick");
        self.record(TriggerRecord {
            at: now,
            status: outcome.status(),
            detail,
        })
        .await;
        outcome
    }

    async fn evaluate(&self, now: DateTime<Utc>) -> TickOutcome {
        let interval = self.orchestrator.config().check_interval;
        if let Some(last) = self.orchestrator.last_check(TriggerKind::Scheduled).await {
            let due = chrono::Duration::from_std(interval)
                .ok()
                .and_then(|interval| last.checked_add_signed(interval));
            if let Some(due) = due {
                if now < due {
                    return TickOutcome::Skipped(format!("next check due at {}", due.to_rfc3339()));
                }
            }
        }

        if self.orchestrator.is_sync_in_progress().await {
            return TickOutcome::Skipped("sync already in progress".into());
        }

        match self.orchestrator.run_sync(None, TriggerKind::Scheduled).await {
            Ok(run) => TickOutcome::Triggered(run),
            Err(MirrorError::SyncInProgress) => {
                TickOutcome::Skipped("sync already in progress".into())
            }
            Err(e) => TickOutcome::Errored(e),
        }
    }

    /// History entries, oldest first.
    pub async fn history(&self) -> Vec<TriggerRecord> {
        let Some(raw) = self.orchestrator.read_system_key(TRIGGER_HISTORY_KEY).await else {
            return Vec::new();
        };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!(error = %e, "[STORE] Unparseable trigger history, starting over");
            Vec::new()
        })
    }

    async fn record(&self, entry: TriggerRecord) {
        if self.orchestrator.kv().is_none() {
            return;
        }
        let limit = self.orchestrator.config().history_limit;
        let mut history = self.history().await;
        history.push(entry);
        if history.len() > limit {
            let excess = history.len() - limit;
            history.drain(..excess);
        }
        match serde_json::to_string(&history) {
            Ok(raw) => {
                self.orchestrator
                    .write_system_key(TRIGGER_HISTORY_KEY, &raw)
                    .await
            }
            Err(e) => warn!(error = %e, "[STORE] Failed to serialise trigger history"),
        }
    }
}
