//! Unified error types for the connector.
//!
//! A single `AgentError` covers configuration, pairing, cloud and controller
//! HTTP failures, command execution and backup creation. Loops only
//! distinguish "iteration failed, back off" from "fatal"; the finer variants
//! exist so reported messages stay precise.

use thiserror::Error;

/// Unified error type for all connector operations.
#[derive(Debug, Error)]
pub enum AgentError {
    // ===== Configuration =====
    /// Invalid or unloadable configuration.
    #[error("invalid config: {0}")]
    Config(String),

    // ===== Pairing / authentication =====
    /// The cloud rejected our credentials or pairing token.
    #[error("authentication failed: {0}")]
    Auth(String),

    // ===== Cloud =====
    /// Non-2xx response from the control plane.
    #[error("cloud http {status}: {body}")]
    CloudStatus { status: u16, body: String },

    /// 2xx response whose body could not be interpreted.
    #[error("cloud: {0}")]
    CloudResponse(String),

    // ===== Controller =====
    /// Non-2xx response from the local printer service.
    #[error("moonraker http {status}: {body}")]
    ControllerStatus { status: u16, body: String },

    /// 2xx response whose body could not be interpreted.
    #[error("moonraker: {0}")]
    ControllerResponse(String),

    // ===== Command execution =====
    /// Per-command failure (bad params, unknown action, unknown printer).
    /// The message is reported verbatim to the cloud as `error_message`.
    #[error("{0}")]
    Command(String),

    // ===== Backup =====
    /// Archive creation failed.
    #[error("backup: {0}")]
    Backup(String),

    // ===== Transport / serialization / IO =====
    /// HTTP transport failure (connect, timeout, body read).
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// JSON encode/decode failure.
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    /// Filesystem failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    // ===== Internal =====
    #[error("internal error: {0}")]
    Internal(String),
}

impl AgentError {
    pub fn config(msg: impl Into<String>) -> Self {
        AgentError::Config(msg.into())
    }

    pub fn command(msg: impl Into<String>) -> Self {
        AgentError::Command(msg.into())
    }

    pub fn backup(msg: impl Into<String>) -> Self {
        AgentError::Backup(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        AgentError::Internal(msg.into())
    }
}

/// Result type for connector operations.
pub type AgentResult<T> = Result<T, AgentError>;
