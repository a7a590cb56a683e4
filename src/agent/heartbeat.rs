//! Heartbeat iteration: uptime, agent version, per-printer reachability.

use super::AgentState;
use crate::cloud::types::{HeartbeatPrinter, HeartbeatRequest, HeartbeatStatus};
use crate::utils::AgentResult;

impl AgentState {
    pub(crate) async fn send_heartbeat(&self) -> AgentResult<()> {
        let mut printers = Vec::with_capacity(self.cfg.moonraker.len());
        for p in &self.cfg.moonraker {
            // Best-effort probe; any response counts as reachable
            let reachable = match self.moons.get(&p.printer_id) {
                Some(mc) => mc.query_objects().await.is_ok(),
                None => false,
            };
            printers.push(HeartbeatPrinter {
                printer_id: p.printer_id,
                reachable,
            });
        }

        let hb = HeartbeatRequest {
            status: HeartbeatStatus {
                uptime_seconds: self.started_at.elapsed().as_secs(),
                version: self.version.clone(),
            },
            printers,
        };

        self.cloud.heartbeat(&hb).await
    }
}
