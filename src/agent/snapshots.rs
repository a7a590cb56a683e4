//! Snapshot iteration: query every binding, push one batch.
//!
//! A binding that fails to answer is skipped with a warning; the batch is
//! only sent when at least one snapshot was captured. Snapshots are never
//! persisted locally.

use chrono::{SecondsFormat, Utc};

use super::AgentState;
use crate::cloud::types::{Snapshot, SnapshotsBatchRequest};
use crate::utils::AgentResult;

/// Normalised capture timestamp: RFC3339 UTC, second precision.
fn captured_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

impl AgentState {
    pub(crate) async fn collect_and_push_snapshots(&self) -> AgentResult<()> {
        let captured_at = captured_now();

        let mut snapshots = Vec::new();
        for p in &self.cfg.moonraker {
            let Some(mc) = self.moons.get(&p.printer_id) else {
                continue;
            };
            match mc.query_objects().await {
                Ok(payload) => snapshots.push(Snapshot {
                    printer_id: p.printer_id,
                    captured_at: captured_at.clone(),
                    payload,
                }),
                Err(e) => {
                    tracing::warn!(printer_id = p.printer_id, error = %e, "moonraker query failed");
                }
            }
        }

        if snapshots.is_empty() {
            return Ok(());
        }

        let count = snapshots.len();
        let resp = self
            .cloud
            .push_snapshots(&SnapshotsBatchRequest { snapshots })
            .await?;
        tracing::info!(count, inserted = resp.inserted, "snapshots pushed");
        Ok(())
    }

    /// Push one snapshot for a single printer (post-command capture).
    pub(crate) async fn push_single_snapshot(
        &self,
        printer_id: i64,
        payload: serde_json::Value,
    ) -> AgentResult<()> {
        let req = SnapshotsBatchRequest {
            snapshots: vec![Snapshot {
                printer_id,
                captured_at: captured_now(),
                payload,
            }],
        };
        self.cloud.push_snapshots(&req).await.map(|_| ())
    }
}
