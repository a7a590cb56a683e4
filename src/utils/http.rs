//! Shared HTTP plumbing for the cloud and controller clients.

use reqwest::StatusCode;

use super::AgentResult;

/// Hard cap on buffered response bodies.
pub const BODY_CAP: u64 = 1 << 20;

/// Read a response body up to `cap` bytes; anything beyond is dropped.
pub(crate) async fn read_body_capped(
    mut resp: reqwest::Response,
    cap: u64,
) -> AgentResult<(StatusCode, Vec<u8>)> {
    let status = resp.status();
    let mut body: Vec<u8> = Vec::new();
    while let Some(chunk) = resp.chunk().await? {
        let remaining = cap as usize - body.len();
        if remaining == 0 {
            break;
        }
        let take = remaining.min(chunk.len());
        body.extend_from_slice(&chunk[..take]);
    }
    Ok((status, body))
}

/// Trimmed body fragment for error messages; falls back to the status line.
pub(crate) fn error_fragment(status: StatusCode, body: &[u8]) -> String {
    let msg = String::from_utf8_lossy(body).trim().to_string();
    if msg.is_empty() {
        status.to_string()
    } else {
        msg
    }
}
