//! Webcam iteration: serve pending capture requests from the cloud.
//!
//! Per-request failures are logged and skipped; the remaining requests in
//! the batch still run. A request for an unknown printer is completed with
//! an empty body so it stops pending on the cloud side.

use super::AgentState;
use crate::cloud::types::WebcamRequest;
use crate::utils::AgentResult;

const WEBCAM_FETCH_LIMIT: usize = 10;

impl AgentState {
    pub(crate) async fn process_webcam_requests(&self) -> AgentResult<()> {
        let requests = self.cloud.get_webcam_requests(WEBCAM_FETCH_LIMIT).await?;
        if requests.is_empty() {
            return Ok(());
        }

        tracing::debug!(count = requests.len(), "processing webcam requests");
        for req in &requests {
            if let Err(e) = self.handle_webcam_request(req).await {
                tracing::warn!(
                    request_id = %req.id,
                    printer_id = req.printer_id,
                    error = %e,
                    "webcam request failed"
                );
            }
        }
        Ok(())
    }

    async fn handle_webcam_request(&self, req: &WebcamRequest) -> AgentResult<()> {
        let Some(mc) = self.moons.get(&req.printer_id) else {
            return self
                .cloud
                .upload_webcam_snapshot(req.id.as_str(), Vec::new(), "application/json")
                .await;
        };

        let (image, content_type) = mc.get_snapshot_image().await?;
        let size = image.len();
        self.cloud
            .upload_webcam_snapshot(req.id.as_str(), image, &content_type)
            .await?;

        tracing::info!(
            request_id = %req.id,
            printer_id = req.printer_id,
            size_bytes = size,
            "webcam snapshot uploaded"
        );
        Ok(())
    }
}
