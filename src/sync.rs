use crate::reconcile::{self, ImportSummary};
use crate::state::AppState;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum SyncStatus {
    Idle,
    Syncing,
    #[serde(rename_all = "camelCase")]
    Synced {
        summary: ImportSummary,
        finished_at: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    Failed {
        message: String,
        finished_at: DateTime<Utc>,
    },
}

impl AppState {
    /// Fetches the remote snapshot and folds it in. The fetch completes before
    /// the engine is locked; a missing snapshot leaves the status idle and
    /// any failure leaves the content untouched.
    pub async fn run_sync(&self) -> SyncStatus {
        let Some(remote) = self.remote.clone() else {
            return SyncStatus::Idle;
        };
        let Ok(_gate) = self.sync_gate.try_lock() else {
            return SyncStatus::Syncing;
        };
        *self.sync_status.write().await = SyncStatus::Syncing;

        let status = match remote.fetch().await {
            Ok(None) => {
                info!("no remote snapshot published");
                SyncStatus::Idle
            }
            Ok(Some(body)) => self.apply_snapshot(&body).await,
            Err(err) => fail(format!("sync fetch failed: {err:#}")),
        };
        *self.sync_status.write().await = status.clone();
        status
    }

    async fn apply_snapshot(&self, body: &str) -> SyncStatus {
        let value: serde_json::Value = match serde_json::from_str(body) {
            Ok(v) => v,
            Err(err) => return fail(format!("sync document is not valid json: {err}")),
        };
        let doc = match reconcile::parse_document(&value) {
            Ok(doc) => doc,
            Err(err) => return fail(format!("sync document rejected: {err}")),
        };
        match self.engine.write().await.import_parsed(doc, None) {
            Ok(summary) => {
                info!(
                    "sync applied: {} modules, {} sub-topics added",
                    summary.modules_added, summary.sub_topics_added
                );
                SyncStatus::Synced {
                    summary,
                    finished_at: Utc::now(),
                }
            }
            Err(err) => fail(format!("sync import failed: {err}")),
        }
    }
}

fn fail(message: String) -> SyncStatus {
    warn!("{}", message);
    SyncStatus::Failed {
        message,
        finished_at: Utc::now(),
    }
}
