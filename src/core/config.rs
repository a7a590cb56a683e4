//! On-disk JSON configuration: load, validate, atomic rewrite.
//!
//! The config file is the only state the agent persists. It is rewritten
//! exactly once, after a successful pairing, via [`Config::save_atomic`] —
//! write-temp-then-rename, with owner-only permissions because it stores
//! `connector_secret`.
//!
//! | Key | Default | Effect |
//! |-----|---------|--------|
//! | `cloud_url` | production URL | control-plane base URL (`CLOUD_URL` env wins) |
//! | `pairing_token` | — | one-shot bootstrap credential, pre-pairing only |
//! | `connector_id` / `connector_secret` | — | long-lived credentials, post-pairing |
//! | `site_name` | `""` | optional descriptor sent at pairing |
//! | `poll_commands_seconds` | 3 | command loop cadence |
//! | `push_snapshots_seconds` | 30 | snapshot loop cadence |
//! | `heartbeat_seconds` | 10 | heartbeat loop cadence |
//! | `state_dir` | `/var/lib/printer-connector` | scratch root for staged archives |
//! | `moonraker[]` | — | ordered printer bindings |

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::utils::{AgentError, AgentResult};

/// Production cloud URL used when neither the file nor `CLOUD_URL` provide one.
pub const DEFAULT_CLOUD_URL: &str = "https://www.spoolr.io";

/// One local printer binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoonrakerPrinter {
    /// Stable id assigned by the cloud at pairing; 0 until then.
    #[serde(default)]
    pub printer_id: i64,
    pub name: String,
    pub base_url: String,
    /// Auxiliary port for the webcam snapshot endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui_port: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub cloud_url: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pairing_token: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub connector_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub connector_secret: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub site_name: String,

    #[serde(default)]
    pub poll_commands_seconds: u64,
    #[serde(default)]
    pub push_snapshots_seconds: u64,
    #[serde(default)]
    pub heartbeat_seconds: u64,

    #[serde(default)]
    pub state_dir: String,
    pub moonraker: Vec<MoonrakerPrinter>,
}

impl Config {
    /// Load the config file, apply the `CLOUD_URL` override and defaults.
    pub fn load(path: &Path) -> AgentResult<Config> {
        let bytes = fs::read(path)
            .map_err(|e| AgentError::config(format!("read {}: {e}", path.display())))?;
        let mut cfg: Config = serde_json::from_slice(&bytes)
            .map_err(|e| AgentError::config(format!("parse {}: {e}", path.display())))?;

        if let Ok(env_url) = std::env::var("CLOUD_URL")
            && !env_url.is_empty()
        {
            cfg.cloud_url = env_url;
        }
        if cfg.cloud_url.is_empty() {
            cfg.cloud_url = DEFAULT_CLOUD_URL.to_string();
        }

        if cfg.poll_commands_seconds == 0 {
            cfg.poll_commands_seconds = 3;
        }
        if cfg.push_snapshots_seconds == 0 {
            cfg.push_snapshots_seconds = 30;
        }
        if cfg.heartbeat_seconds == 0 {
            cfg.heartbeat_seconds = 10;
        }
        if cfg.state_dir.is_empty() {
            cfg.state_dir = "/var/lib/printer-connector".to_string();
        }

        Ok(cfg)
    }

    /// Validate the invariants that make the agent runnable.
    ///
    /// Error messages never include credential material.
    pub fn validate(&self) -> AgentResult<()> {
        if !has_http_scheme(&self.cloud_url) {
            return Err(AgentError::config(
                "cloud_url must start with http:// or https://",
            ));
        }

        let has_pairing = !self.pairing_token.is_empty();
        let has_creds = !self.connector_id.is_empty() && !self.connector_secret.is_empty();
        if !has_pairing && !has_creds {
            return Err(AgentError::config(
                "config must include either pairing_token OR connector_id + connector_secret",
            ));
        }
        if has_pairing && has_creds {
            return Err(AgentError::config(
                "config must not include pairing_token once connector_id + connector_secret exist",
            ));
        }

        if self.moonraker.is_empty() {
            return Err(AgentError::config(
                "moonraker must include at least one printer entry",
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for p in &self.moonraker {
            if p.printer_id < 0 {
                return Err(AgentError::config("moonraker printer_id must be >= 0"));
            }
            // printer_id 0 is only a placeholder while pairing is pending
            if !has_pairing && p.printer_id == 0 {
                return Err(AgentError::config(
                    "moonraker printer_id must be > 0 after pairing",
                ));
            }
            if p.printer_id > 0 && !seen.insert(p.printer_id) {
                return Err(AgentError::config(format!(
                    "duplicate moonraker printer_id: {}",
                    p.printer_id
                )));
            }
            if p.base_url.is_empty() {
                return Err(AgentError::config(format!(
                    "moonraker base_url required for printer_id {}",
                    p.printer_id
                )));
            }
            if !has_http_scheme(&p.base_url) {
                return Err(AgentError::config(format!(
                    "moonraker base_url must start with http:// or https:// for printer_id {}",
                    p.printer_id
                )));
            }
            if p.base_url.contains("..") {
                return Err(AgentError::config(format!(
                    "moonraker base_url must not contain '..' for printer_id {}",
                    p.printer_id
                )));
            }
        }

        Ok(())
    }

    /// Write the config atomically: temp file in the same directory, owner-only
    /// permissions, then rename over the live path. The rename is the commit
    /// point; a crash before it leaves the previous file intact.
    pub fn save_atomic(&self, path: &Path) -> AgentResult<()> {
        if let Some(dir) = path.parent()
            && !dir.as_os_str().is_empty()
        {
            fs::create_dir_all(dir)?;
        }

        let mut body = serde_json::to_vec_pretty(self)?;
        body.push(b'\n');

        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        let mut opts = fs::OpenOptions::new();
        opts.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            opts.mode(0o600);
        }
        let mut file = opts.open(&tmp)?;
        file.write_all(&body)?;
        file.sync_all()?;
        drop(file);
        #[cfg(unix)]
        {
            // mode() on OpenOptions is ignored when the temp file already
            // existed; force owner-only either way.
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp, fs::Permissions::from_mode(0o600))?;
        }

        fs::rename(&tmp, path)?;
        Ok(())
    }
}

fn has_http_scheme(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}
