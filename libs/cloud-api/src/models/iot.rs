//! IoT service models

use serde::{Deserialize, Serialize};

/// Action required after a certificate check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequiredAction {
    None,
    ReloadSketch,
}

/// Certificate check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertCheckResponse {
    pub required_action: RequiredAction,
}

/// Device bound to a thing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThingDevice {
    pub id: String,
    #[serde(default)]
    pub fqbn: Option<String>,
    #[serde(default)]
    pub ota_compatible: bool,
    #[serde(default)]
    pub ota_available: bool,
    #[serde(default)]
    pub wifi_fw_version: Option<String>,
    #[serde(default)]
    pub required_wifi_fw_version: Option<String>,
}
