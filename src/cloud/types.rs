//! Wire types for the control-plane protocol.
//!
//! Identifier fields the cloud may emit as either a JSON string or a bare
//! number are carried as [`StringOrNumber`], which canonicalises to the
//! textual form so round-trip URLs preserve what the cloud sent.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Accepts a JSON value like `123` or `"123"` and stores it as a string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct StringOrNumber(pub String);

impl StringOrNumber {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for StringOrNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StringOrNumber {
    fn from(s: &str) -> Self {
        StringOrNumber(s.to_string())
    }
}

impl Serialize for StringOrNumber {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for StringOrNumber {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SonVisitor;

        impl<'de> Visitor<'de> for SonVisitor {
            type Value = StringOrNumber;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a string, a number, or null")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                Ok(StringOrNumber(v.to_string()))
            }

            fn visit_string<E: de::Error>(self, v: String) -> Result<Self::Value, E> {
                Ok(StringOrNumber(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                Ok(StringOrNumber(v.to_string()))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
                Ok(StringOrNumber(v.to_string()))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
                if v.fract() == 0.0 && v.abs() < i64::MAX as f64 {
                    Ok(StringOrNumber((v as i64).to_string()))
                } else {
                    Ok(StringOrNumber(v.to_string()))
                }
            }

            fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
                Ok(StringOrNumber(String::new()))
            }

            fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
                Ok(StringOrNumber(String::new()))
            }
        }

        deserializer.deserialize_any(SonVisitor)
    }
}

// ===== Pairing =====

#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest {
    pub pairing_token: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub site_name: String,
    pub device: DeviceInfo,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub printers: Vec<PrinterInfo>,
}

/// Host facts sent once at registration.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeviceInfo {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub hostname: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub arch: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub os: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub ip: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ui_port: Option<u16>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PrinterInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ui_port: Option<u16>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterResponse {
    pub connector: ConnectorIdent,
    pub credentials: Credentials,
    #[serde(default)]
    pub printers: Vec<RegisteredPrinter>,
    #[serde(default)]
    pub polling: PollingOverrides,
}

#[derive(Debug, Deserialize)]
pub struct ConnectorIdent {
    pub id: StringOrNumber,
}

#[derive(Debug, Deserialize)]
pub struct Credentials {
    pub secret: String,
}

#[derive(Debug, Deserialize)]
pub struct RegisteredPrinter {
    pub id: i64,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct PollingOverrides {
    #[serde(default)]
    pub commands_seconds: u64,
    #[serde(default)]
    pub snapshots_seconds: u64,
}

// ===== Heartbeat =====

#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatRequest {
    pub status: HeartbeatStatus,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub printers: Vec<HeartbeatPrinter>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatStatus {
    pub uptime_seconds: u64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub version: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatPrinter {
    pub printer_id: i64,
    pub reachable: bool,
}

// ===== Commands =====

#[derive(Debug, Clone, Deserialize)]
pub struct Command {
    pub id: StringOrNumber,
    pub printer_id: i64,
    pub action: String,
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommandCompleteRequest {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

// ===== Snapshots =====

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotsBatchRequest {
    pub snapshots: Vec<Snapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub printer_id: i64,
    /// RFC3339 UTC capture time.
    pub captured_at: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct SnapshotsBatchResponse {
    pub inserted: i64,
}

// ===== Webcam requests =====

#[derive(Debug, Clone, Deserialize)]
pub struct WebcamRequest {
    pub id: StringOrNumber,
    pub printer_id: i64,
}
