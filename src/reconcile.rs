//! Replication of dual-mode uploads whose object-store write failed.
//!
//! Such documents carry `storage_state = local_only`. A reconciliation pass
//! copies each one's bytes from local disk to the object store and flips
//! the state back to `redundant`. Failures are logged and left for the
//! next pass.

use std::sync::Arc;
use std::time::Duration;

use docqa_core::models::{StorageMode, StorageState};
use docqa_core::Result;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::documents::DocumentRepo;
use crate::storage::StorageRouter;

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ReconcileReport {
    pub examined: usize,
    pub replicated: usize,
    pub failed: usize,
}

/// Run one reconciliation pass.
pub async fn reconcile(docs: &DocumentRepo, storage: &StorageRouter) -> Result<ReconcileReport> {
    let pending = docs.local_only().await?;
    let mut report = ReconcileReport {
        examined: pending.len(),
        ..Default::default()
    };

    for doc in pending {
        if doc.storage_mode != StorageMode::Dual {
            // Only dual-mode documents can be degraded; anything else is a
            // stale flag.
            docs.set_storage_state(&doc.id, StorageState::Redundant).await?;
            continue;
        }
        match storage.replicate(&doc.storage_key).await {
            Ok(()) => {
                docs.set_storage_state(&doc.id, StorageState::Redundant).await?;
                report.replicated += 1;
                info!(document.id = %doc.id, key = %doc.storage_key, "replicated to object store");
            }
            Err(e) => {
                report.failed += 1;
                warn!(document.id = %doc.id, error = %e, "replication failed");
            }
        }
    }

    Ok(report)
}

/// Run [`reconcile`] every `interval` until the returned task is aborted.
pub fn spawn_periodic(
    docs: DocumentRepo,
    storage: Arc<StorageRouter>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match reconcile(&docs, &storage).await {
                Ok(report) if report.examined > 0 => info!(
                    examined = report.examined,
                    replicated = report.replicated,
                    failed = report.failed,
                    "reconciliation pass"
                ),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "reconciliation pass failed"),
            }
        }
    })
}
