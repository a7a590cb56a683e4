//! Minimal HTTP client for one Moonraker controller.
//!
//! One client per configured printer binding; no auth (Moonraker on a
//! trusted LAN). Responses are kept as opaque JSON wherever possible so
//! snapshots can store the query result verbatim.

use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Method, Url};
use serde::Deserialize;
use std::time::Duration;

use crate::utils::http::{BODY_CAP, error_fragment, read_body_capped};
use crate::utils::{AgentError, AgentResult};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Webcam snapshot responses may be full JPEG frames.
const SNAPSHOT_BODY_CAP: u64 = 10 << 20;

/// Fallback webcam port when the binding carries no ui_port.
const DEFAULT_UI_PORT: u16 = 8080;

/// Candidate snapshot endpoints, tried in order; 404 advances to the next.
const SNAPSHOT_PATHS: [&str; 3] = ["/webcam/?action=snapshot", "/webcam/snapshot", "/snapshot"];

pub struct MoonrakerClient {
    http: reqwest::Client,
    base: Url,
    ui_port: Option<u16>,
}

impl MoonrakerClient {
    pub fn new(base_url: &str, ui_port: Option<u16>) -> AgentResult<Self> {
        let base = Url::parse(base_url.trim_end_matches('/'))
            .map_err(|e| AgentError::config(format!("moonraker base_url: {e}")))?;

        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            base,
            ui_port,
        })
    }

    /// Query the fixed set of printer objects; the parsed response is
    /// returned verbatim for snapshot payloads.
    pub async fn query_objects(&self) -> AgentResult<serde_json::Value> {
        let body = serde_json::json!({
            "objects": {
                "print_stats": null,
                "virtual_sdcard": null,
                "extruder": null,
                "heater_bed": null,
                "toolhead": null,
                "pause_resume": null,
            }
        });
        self.post_json(&["printer", "objects", "query"], &body).await
    }

    pub async fn pause(&self) -> AgentResult<()> {
        self.post_empty(&["printer", "print", "pause"]).await
    }

    pub async fn resume(&self) -> AgentResult<()> {
        self.post_empty(&["printer", "print", "resume"]).await
    }

    pub async fn cancel(&self) -> AgentResult<()> {
        self.post_empty(&["printer", "print", "cancel"]).await
    }

    pub async fn start_print(&self, filename: &str) -> AgentResult<()> {
        let mut url = self.endpoint(&["printer", "print", "start"]);
        url.query_pairs_mut().append_pair("filename", filename);
        let resp = self
            .http
            .request(Method::POST, url)
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json")
            .body("{}")
            .send()
            .await?;
        self.check(resp).await.map(|_| ())
    }

    /// Upload a gcode file via multipart form (`file` part + `root=gcodes`).
    pub async fn upload_file(&self, filename: &str, content: Vec<u8>) -> AgentResult<()> {
        let part = reqwest::multipart::Part::bytes(content).file_name(filename.to_string());
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("root", "gcodes");

        let url = self.endpoint(&["server", "files", "upload"]);
        let resp = self.http.post(url).multipart(form).send().await?;
        self.check(resp).await.map(|_| ())
    }

    pub async fn delete_file(&self, filename: &str) -> AgentResult<()> {
        let mut url = self.endpoint(&["server", "files", "gcodes"]);
        url.path_segments_mut()
            .expect("http(s) base URL")
            .push(filename);
        let resp = self.http.request(Method::DELETE, url).send().await?;
        self.check(resp).await.map(|_| ())
    }

    /// List files in the gcodes root.
    pub async fn list_files(&self) -> AgentResult<Vec<serde_json::Value>> {
        #[derive(Deserialize)]
        struct ListResponse {
            #[serde(default)]
            result: Vec<serde_json::Value>,
        }

        let mut url = self.endpoint(&["server", "files", "list"]);
        url.query_pairs_mut().append_pair("root", "gcodes");
        let resp = self
            .http
            .get(url)
            .header(ACCEPT, "application/json")
            .send()
            .await?;
        let body = self.check(resp).await?;
        let parsed: ListResponse = serde_json::from_slice(&body)
            .map_err(|e| AgentError::ControllerResponse(format!("invalid json: {e}")))?;
        Ok(parsed.result)
    }

    /// Best-effort webcam frame from the auxiliary UI port. Returns the first
    /// 2xx body with its Content-Type; a 404 advances to the next candidate
    /// endpoint, any other failure surfaces.
    pub async fn get_snapshot_image(&self) -> AgentResult<(Vec<u8>, String)> {
        let mut url = self.base.clone();
        url.set_port(Some(self.ui_port.unwrap_or(DEFAULT_UI_PORT)))
            .map_err(|_| AgentError::ControllerResponse("cannot derive webcam port".into()))?;

        for path in SNAPSHOT_PATHS {
            let candidate = url
                .join(path)
                .map_err(|e| AgentError::ControllerResponse(format!("webcam url: {e}")))?;
            let resp = self.http.get(candidate).send().await?;
            let content_type = resp
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("image/jpeg")
                .to_string();

            let (status, body) = read_body_capped(resp, SNAPSHOT_BODY_CAP).await?;
            if status.is_success() {
                return Ok((body, content_type));
            }
            if status == reqwest::StatusCode::NOT_FOUND {
                continue;
            }
            return Err(AgentError::ControllerStatus {
                status: status.as_u16(),
                body: error_fragment(status, &body),
            });
        }

        Err(AgentError::ControllerResponse(
            "no webcam snapshot endpoint responded".into(),
        ))
    }

    // ===== Plumbing =====

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .expect("http(s) base URL")
            .pop_if_empty()
            .extend(segments);
        url
    }

    async fn post_json(
        &self,
        segments: &[&str],
        body: &serde_json::Value,
    ) -> AgentResult<serde_json::Value> {
        let resp = self
            .http
            .post(self.endpoint(segments))
            .header(ACCEPT, "application/json")
            .json(body)
            .send()
            .await?;
        let bytes = self.check(resp).await?;
        if bytes.is_empty() {
            return Ok(serde_json::Value::Object(Default::default()));
        }
        serde_json::from_slice(&bytes)
            .map_err(|e| AgentError::ControllerResponse(format!("invalid json: {e}")))
    }

    async fn post_empty(&self, segments: &[&str]) -> AgentResult<()> {
        let resp = self
            .http
            .post(self.endpoint(segments))
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json")
            .body("{}")
            .send()
            .await?;
        self.check(resp).await.map(|_| ())
    }

    async fn check(&self, resp: reqwest::Response) -> AgentResult<Vec<u8>> {
        let (status, body) = read_body_capped(resp, BODY_CAP).await?;
        if !status.is_success() {
            return Err(AgentError::ControllerStatus {
                status: status.as_u16(),
                body: error_fragment(status, &body),
            });
        }
        Ok(body)
    }
}
