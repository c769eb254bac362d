//! OTA service models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// OTA status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OtaStatus {
    Pending,
    InProgress,
    Succeeded,
    Failed,
}

impl OtaStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OtaStatus::Succeeded | OtaStatus::Failed)
    }

    pub fn is_ongoing(&self) -> bool {
        matches!(self, OtaStatus::Pending | OtaStatus::InProgress)
    }
}

/// Informational step reported by the board
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OtaStep {
    Available,
    Start,
    Fetch,
    Flash,
    Reboot,
    Fail,
}

/// An OTA operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ota {
    pub id: String,
    #[serde(default)]
    pub device_id: Option<String>,
    pub status: OtaStatus,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error_reason: Option<String>,
    #[serde(default)]
    pub firmware_size: Option<u64>,
}

/// A reported OTA state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OtaState {
    pub state: OtaStep,
    #[serde(default)]
    pub state_data: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Create OTA request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOtaRequest {
    pub device_id: String,
    pub binary_key: String,
}

/// Create OTA response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOtaResponse {
    pub ota: Ota,
}

/// Show OTA response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShowOtaResponse {
    pub ota: Ota,
    #[serde(default)]
    pub states: Vec<OtaState>,
}

/// List OTA response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListOtaResponse {
    #[serde(default)]
    pub ota: Vec<Ota>,
}

/// Error reasons whose details are presented by the caller rather than logged
pub const MANAGED_OTA_ERRORS: &[&str] = &[
    "ErrorWriteUpdateFileFail",
    "HttpResponseFail",
    "OtaDownloadFail",
    "OtaHeaderCrcFail",
    "OtaStorageInitFail",
    "ServerConnectErrorFail",
    "Sha256Unknown",
    "Sha256Mismatch",
];

/// Error reason reported when the user aborts a pending OTA
pub const CANCELED_BY_USER: &str = "CanceledByUser";

/// Error reason reported when the board never answered
pub const OTA_TIMEOUT: &str = "Timeout";

pub fn is_managed_ota_error(reason: &str) -> bool {
    MANAGED_OTA_ERRORS.contains(&reason)
}
