//! Command executor: fetch, dispatch in cloud order, report completion.
//!
//! Commands run strictly sequentially. A command is only at-most-once from
//! the cloud's point of view after a successful complete call, so every
//! handler tolerates re-execution: print control acts on current state, file
//! mutations are re-sent verbatim, backups are re-created under the same id.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value, json};
use std::path::{Path, PathBuf};
use tokio::time::Instant;

use super::AgentState;
use crate::backup;
use crate::cloud::types::{Command, CommandCompleteRequest};
use crate::moonraker::MoonrakerClient;
use crate::utils::{AgentError, AgentResult};

/// Batch size for each poll.
const COMMAND_FETCH_LIMIT: usize = 20;

/// Safety ceiling for backup archives.
const BACKUP_MAX_SIZE_BYTES: u64 = 10 << 30;

impl AgentState {
    pub(crate) async fn poll_and_execute_commands(&self) -> AgentResult<()> {
        let cmds = self
            .cloud
            .get_commands(&self.cfg.connector_id, COMMAND_FETCH_LIMIT)
            .await?;

        for cmd in &cmds {
            self.dispatch_command(cmd).await;
        }
        Ok(())
    }

    async fn dispatch_command(&self, cmd: &Command) {
        let start = Instant::now();
        tracing::info!(
            command_id = %cmd.id,
            printer_id = cmd.printer_id,
            action = %cmd.action,
            "executing command"
        );

        let Some(mc) = self.moons.get(&cmd.printer_id) else {
            let mut result = Map::new();
            result.insert("printer_id".into(), json!(cmd.printer_id));
            self.complete(
                cmd,
                failed(result, format!("unknown printer_id {}", cmd.printer_id)),
            )
            .await;
            return;
        };

        let mut result = Map::new();
        result.insert("action".into(), json!(cmd.action));

        if let Err(e) = self.execute_action(mc, cmd, &mut result).await {
            tracing::warn!(command_id = %cmd.id, error = %e, "command failed");
            self.complete(cmd, failed(result, e.to_string())).await;
            return;
        }

        // Follow-up capture; its failure never fails the command
        match mc.query_objects().await {
            Ok(payload) => {
                result.insert("post_snapshot".into(), json!("captured"));
                if let Err(e) = self.push_single_snapshot(cmd.printer_id, payload).await {
                    tracing::warn!(command_id = %cmd.id, error = %e, "post-command snapshot push failed");
                }
            }
            Err(e) => {
                result.insert("post_snapshot_error".into(), json!(e.to_string()));
            }
        }

        tracing::info!(
            command_id = %cmd.id,
            duration_ms = start.elapsed().as_millis() as u64,
            "command succeeded"
        );
        self.complete(cmd, succeeded(result)).await;
    }

    async fn execute_action(
        &self,
        mc: &MoonrakerClient,
        cmd: &Command,
        result: &mut Map<String, Value>,
    ) -> AgentResult<()> {
        match cmd.action.as_str() {
            "pause" => mc.pause().await,
            "resume" => mc.resume().await,
            "cancel" => mc.cancel().await,
            "start_print" => {
                let filename = require_str(cmd, "filename")?;
                result.insert("filename".into(), json!(filename));
                mc.start_print(filename).await
            }
            "upload_file" => self.execute_upload_file(mc, cmd, result).await,
            "delete_file" => self.execute_delete_file(mc, cmd, result).await,
            "sync_files" => self.execute_sync_files(mc, result).await,
            "create_backup" => self.execute_create_backup(cmd, result).await,
            other => Err(AgentError::command(format!("unsupported action: {other}"))),
        }
    }

    async fn execute_upload_file(
        &self,
        mc: &MoonrakerClient,
        cmd: &Command,
        result: &mut Map<String, Value>,
    ) -> AgentResult<()> {
        let filename = require_str(cmd, "filename")?;
        let content_base64 = require_str(cmd, "content")?;

        let content = BASE64
            .decode(content_base64)
            .map_err(|e| AgentError::command(format!("failed to decode base64 content: {e}")))?;

        result.insert("filename".into(), json!(filename));
        result.insert("size".into(), json!(content.len()));

        let size = content.len();
        mc.upload_file(filename, content).await?;
        tracing::info!(command_id = %cmd.id, filename, size, "file uploaded");
        Ok(())
    }

    async fn execute_delete_file(
        &self,
        mc: &MoonrakerClient,
        cmd: &Command,
        result: &mut Map<String, Value>,
    ) -> AgentResult<()> {
        let filename = require_str(cmd, "filename")?;
        result.insert("filename".into(), json!(filename));

        mc.delete_file(filename).await?;
        tracing::info!(command_id = %cmd.id, filename, "file deleted");
        Ok(())
    }

    async fn execute_sync_files(
        &self,
        mc: &MoonrakerClient,
        result: &mut Map<String, Value>,
    ) -> AgentResult<()> {
        let files = mc.list_files().await?;
        result.insert("count".into(), json!(files.len()));
        result.insert("files".into(), Value::Array(files));
        Ok(())
    }

    async fn execute_create_backup(
        &self,
        cmd: &Command,
        result: &mut Map<String, Value>,
    ) -> AgentResult<()> {
        let backup_id = require_str(cmd, "backup_id")?.to_string();
        let presigned_url = require_str(cmd, "presigned_url")?.to_string();

        let printer_data_root = resolve_printer_data_root(
            cmd.params.get("printer_data_root").and_then(Value::as_str),
        );

        let include = cmd.params.get("include").and_then(Value::as_object);
        let flag = |key: &str| {
            include
                .and_then(|m| m.get(key))
                .and_then(Value::as_bool)
                .unwrap_or(false)
        };
        let opts = backup::BackupOptions {
            printer_data_root: printer_data_root.clone(),
            include_config: flag("config"),
            include_database: flag("database"),
            include_gcodes: flag("gcodes"),
            include_logs: flag("logs"),
            output_path: PathBuf::new(), // filled below
            max_size_bytes: BACKUP_MAX_SIZE_BYTES,
        };
        if !(opts.include_config || opts.include_database || opts.include_gcodes || opts.include_logs)
        {
            return Err(AgentError::command("no directories selected for backup"));
        }

        let state_dir = Path::new(&self.cfg.state_dir);
        create_state_dir(state_dir)?;
        let output_path = state_dir.join(format!("{backup_id}.tar.gz"));
        let opts = backup::BackupOptions {
            output_path: output_path.clone(),
            ..opts
        };

        tracing::info!(
            backup_id = %backup_id,
            printer_data_root = %printer_data_root.display(),
            include_config = opts.include_config,
            include_database = opts.include_database,
            include_gcodes = opts.include_gcodes,
            include_logs = opts.include_logs,
            "creating backup"
        );

        let created = tokio::task::spawn_blocking(move || backup::create(&opts))
            .await
            .map_err(|e| AgentError::internal(format!("backup task failed: {e}")));

        let created = match created.and_then(|r| r) {
            Ok(r) => r,
            Err(e) => {
                // A partial archive may exist; the staged file never outlives
                // the command
                remove_staged(&output_path);
                return Err(e);
            }
        };

        tracing::info!(
            backup_id = %backup_id,
            size_bytes = created.size_bytes,
            sha256 = %created.sha256,
            "backup archive created"
        );

        let upload = self
            .cloud
            .upload_backup(&presigned_url, &created.archive_path)
            .await;
        remove_staged(&output_path);
        upload?;

        tracing::info!(backup_id = %backup_id, "backup uploaded successfully");

        result.insert("backup_id".into(), json!(backup_id));
        result.insert("size_bytes".into(), json!(created.size_bytes));
        result.insert("sha256".into(), json!(created.sha256));
        result.insert(
            "uploaded_at".into(),
            json!(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)),
        );
        Ok(())
    }

    /// Report the final status. Fire-and-forget: the cloud re-offers the
    /// command until a complete call lands, so errors are only logged.
    async fn complete(&self, cmd: &Command, req: CommandCompleteRequest) {
        if let Err(e) = self.cloud.complete_command(cmd.id.as_str(), &req).await {
            tracing::warn!(command_id = %cmd.id, error = %e, "failed to report command completion");
        }
    }
}

fn succeeded(result: Map<String, Value>) -> CommandCompleteRequest {
    CommandCompleteRequest {
        status: "succeeded".into(),
        result: Some(Value::Object(result)),
        error_message: None,
    }
}

fn failed(result: Map<String, Value>, message: String) -> CommandCompleteRequest {
    CommandCompleteRequest {
        status: "failed".into(),
        result: Some(Value::Object(result)),
        error_message: Some(message),
    }
}

fn require_str<'a>(cmd: &'a Command, key: &str) -> AgentResult<&'a str> {
    match cmd.params.get(key).and_then(Value::as_str) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(AgentError::command(format!(
            "missing params.{key} for {}",
            cmd.action
        ))),
    }
}

/// Default printer_data location, with `~/` expansion. The Creality K1
/// family runs as root with its data under /usr/data.
fn resolve_printer_data_root(param: Option<&str>) -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_default();

    let default_root = if !home.is_empty() && home != "/root" {
        PathBuf::from(&home).join("printer_data")
    } else {
        PathBuf::from("/usr/data/printer_data")
    };

    let Some(raw) = param.filter(|s| !s.is_empty()) else {
        return default_root;
    };

    if let Some(rest) = raw.strip_prefix("~/") {
        if home == "/root" {
            return PathBuf::from("/usr/data").join(rest);
        }
        if !home.is_empty() {
            return PathBuf::from(&home).join(rest);
        }
    }
    PathBuf::from(raw)
}

fn create_state_dir(dir: &Path) -> AgentResult<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        std::fs::DirBuilder::new()
            .recursive(true)
            .mode(0o755)
            .create(dir)
            .map_err(|e| AgentError::backup(format!("create state directory: {e}")))?;
    }
    #[cfg(not(unix))]
    {
        std::fs::create_dir_all(dir)
            .map_err(|e| AgentError::backup(format!("create state directory: {e}")))?;
    }
    Ok(())
}

fn remove_staged(path: &Path) {
    if let Err(e) = std::fs::remove_file(path)
        && e.kind() != std::io::ErrorKind::NotFound
    {
        tracing::warn!(path = %path.display(), error = %e, "failed to cleanup backup archive");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_printer_data_root_is_used_verbatim() {
        // Only the env-independent path: $HOME-derived defaults are covered
        // by the integration tests.
        let explicit = resolve_printer_data_root(Some("/opt/printer_data"));
        assert_eq!(explicit, PathBuf::from("/opt/printer_data"));
    }

    #[test]
    fn require_str_reports_missing_params() {
        let cmd: Command = serde_json::from_str(
            r#"{"id":"C1","printer_id":1,"action":"start_print","params":{}}"#,
        )
        .unwrap();
        let err = require_str(&cmd, "filename").unwrap_err();
        assert_eq!(err.to_string(), "missing params.filename for start_print");
    }
}
