//! CloudClient — authenticated JSON client for the control plane.
//!
//! One instance per process. Credentials are written once at the end of
//! pairing via [`CloudClient::set_credentials`]; after that the client is
//! read-only and safe to share across the loops (reqwest's pooled client
//! handles concurrent requests).

use reqwest::header::{ACCEPT, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::time::Duration;

use crate::cloud::types::{
    Command, CommandCompleteRequest, HeartbeatRequest, RegisterRequest, RegisterResponse,
    SnapshotsBatchRequest, SnapshotsBatchResponse, WebcamRequest,
};
use crate::utils::http::{BODY_CAP, error_fragment, read_body_capped};
use crate::utils::{AgentError, AgentResult};

/// Overall per-request deadline.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
/// TCP connect deadline.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
/// Idle pooled-connection lifetime.
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

pub struct CloudClientOptions {
    pub base_url: String,
    pub connector_id: String,
    pub connector_secret: String,
    pub user_agent: String,
}

pub struct CloudClient {
    http: reqwest::Client,
    base: Url,
    connector_id: String,
    connector_secret: String,
}

impl CloudClient {
    pub fn new(opts: CloudClientOptions) -> AgentResult<Self> {
        let base = Url::parse(opts.base_url.trim_end_matches('/'))
            .map_err(|e| AgentError::config(format!("cloud_url: {e}")))?;

        let http = reqwest::Client::builder()
            .user_agent(opts.user_agent)
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            base,
            connector_id: opts.connector_id,
            connector_secret: opts.connector_secret,
        })
    }

    /// Install long-lived credentials. Called exactly once, at the end of
    /// pairing, before any authenticated loop starts.
    pub fn set_credentials(&mut self, id: impl Into<String>, secret: impl Into<String>) {
        self.connector_id = id.into();
        self.connector_secret = secret.into();
    }

    pub fn connector_id(&self) -> &str {
        &self.connector_id
    }

    // ===== Operations =====

    /// Exchange the pairing token for long-lived credentials.
    ///
    /// 401/403 surface as [`AgentError::Auth`] (the token was rejected);
    /// anything else non-2xx stays a transient cloud error.
    pub async fn register(&self, req: &RegisterRequest) -> AgentResult<RegisterResponse> {
        let url = self.endpoint(&["api", "v1", "connectors", "register"]);
        match self
            .request_json(self.http.request(Method::POST, url), Some(req), false)
            .await
        {
            Ok(resp) => Ok(resp),
            Err(AgentError::CloudStatus { status, body }) if status == 401 || status == 403 => {
                Err(AgentError::Auth(format!(
                    "pairing rejected (http {status}): {body}"
                )))
            }
            Err(e) => Err(e),
        }
    }

    pub async fn heartbeat(&self, hb: &HeartbeatRequest) -> AgentResult<()> {
        let url = self.endpoint(&["api", "v1", "connectors", &self.connector_id, "heartbeat"]);
        self.request_empty(self.http.request(Method::POST, url), Some(hb), true)
            .await
    }

    /// Fetch up to `limit` pending commands, in cloud-issued order.
    pub async fn get_commands(&self, connector_id: &str, limit: usize) -> AgentResult<Vec<Command>> {
        let mut url = self.endpoint(&["api", "v1", "connectors", connector_id, "commands"]);
        url.query_pairs_mut().append_pair("limit", &limit.to_string());
        self.request_json(self.http.request(Method::GET, url), None::<&()>, true)
            .await
    }

    /// Report a command's final status. Callers treat errors as
    /// fire-and-forget: the cloud re-offers the command until completed.
    pub async fn complete_command(
        &self,
        command_id: &str,
        req: &CommandCompleteRequest,
    ) -> AgentResult<()> {
        let url = self.endpoint(&["api", "v1", "commands", command_id, "complete"]);
        self.request_empty(self.http.request(Method::POST, url), Some(req), true)
            .await
    }

    pub async fn push_snapshots(
        &self,
        req: &SnapshotsBatchRequest,
    ) -> AgentResult<SnapshotsBatchResponse> {
        let url = self.endpoint(&["api", "v1", "snapshots", "batch"]);
        self.request_json(self.http.request(Method::POST, url), Some(req), true)
            .await
    }

    /// Fetch pending webcam capture requests.
    pub async fn get_webcam_requests(&self, limit: usize) -> AgentResult<Vec<WebcamRequest>> {
        let mut url = self.endpoint(&[
            "api",
            "v1",
            "connectors",
            &self.connector_id,
            "webcam_requests",
        ]);
        url.query_pairs_mut().append_pair("limit", &limit.to_string());
        self.request_json(self.http.request(Method::GET, url), None::<&()>, true)
            .await
    }

    /// Upload a captured webcam image for a pending request. An empty body
    /// tells the cloud the request cannot be served.
    pub async fn upload_webcam_snapshot(
        &self,
        request_id: &str,
        image: Vec<u8>,
        content_type: &str,
    ) -> AgentResult<()> {
        let url = self.endpoint(&["api", "v1", "webcam_requests", request_id, "image"]);
        let req = self
            .http
            .request(Method::POST, url)
            .header(CONTENT_TYPE, content_type)
            .body(image);
        self.request_empty(req, None::<&()>, true).await
    }

    /// Stream a staged backup archive to a presigned URL via opaque PUT.
    /// The URL itself is the capability; no connector auth headers are sent.
    pub async fn upload_backup(&self, presigned_url: &str, local_path: &Path) -> AgentResult<()> {
        let file = tokio::fs::File::open(local_path)
            .await
            .map_err(|e| AgentError::backup(format!("open staged archive: {e}")))?;
        let size = file
            .metadata()
            .await
            .map_err(|e| AgentError::backup(format!("stat staged archive: {e}")))?
            .len();

        let stream = tokio_util::io::ReaderStream::new(file);
        let resp = self
            .http
            .put(presigned_url)
            .header(CONTENT_TYPE, "application/gzip")
            .header(CONTENT_LENGTH, size)
            .body(reqwest::Body::wrap_stream(stream))
            .send()
            .await?;

        let (status, body) = read_body_capped(resp, BODY_CAP).await?;
        if !status.is_success() {
            return Err(AgentError::CloudStatus {
                status: status.as_u16(),
                body: error_fragment(status, &body),
            });
        }

        tracing::info!(size_bytes = size, status = status.as_u16(), "backup uploaded");
        Ok(())
    }

    // ===== Plumbing =====

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        // base was parsed from an http(s) URL, so path segments are available
        url.path_segments_mut()
            .expect("http(s) base URL")
            .pop_if_empty()
            .extend(segments);
        url
    }

    fn apply_headers(&self, mut req: RequestBuilder, auth: bool) -> RequestBuilder {
        req = req.header(ACCEPT, "application/json");
        if auth {
            req = req
                .bearer_auth(&self.connector_secret)
                .header("X-Connector-Id", &self.connector_id);
        }
        req
    }

    async fn request_json<B: Serialize, T: DeserializeOwned>(
        &self,
        req: RequestBuilder,
        body: Option<&B>,
        auth: bool,
    ) -> AgentResult<T> {
        let body = self.execute(req, body, auth).await?;
        if body.is_empty() {
            return Err(AgentError::CloudResponse("empty response body".into()));
        }
        serde_json::from_slice(&body)
            .map_err(|e| AgentError::CloudResponse(format!("invalid json: {e}")))
    }

    async fn request_empty<B: Serialize>(
        &self,
        req: RequestBuilder,
        body: Option<&B>,
        auth: bool,
    ) -> AgentResult<()> {
        self.execute(req, body, auth).await.map(|_| ())
    }

    async fn execute<B: Serialize>(
        &self,
        mut req: RequestBuilder,
        body: Option<&B>,
        auth: bool,
    ) -> AgentResult<Vec<u8>> {
        req = self.apply_headers(req, auth);
        if let Some(b) = body {
            req = req.json(b);
        }

        let resp = req.send().await?;
        let (status, body) = read_body_capped(resp, BODY_CAP).await?;
        if !status.is_success() {
            return Err(AgentError::CloudStatus {
                status: status.as_u16(),
                body: error_fragment(status, &body),
            });
        }
        Ok(body)
    }
}
