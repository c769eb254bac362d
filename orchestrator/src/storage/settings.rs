//! Settings file management

use serde::{Deserialize, Serialize};

use crate::logs::LogLevel;
use crate::session::request::DeployRequest;
use crate::transport::HostCapability;
use crate::workers::{ota_poller, reconnect};

/// Orchestrator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON log lines on stdout
    #[serde(default)]
    pub log_json: bool,

    /// Also write daily rolling log files
    #[serde(default = "default_true")]
    pub log_to_file: bool,

    /// Remote service configuration
    #[serde(default)]
    pub services: ServiceSettings,

    /// Wired upload configuration
    #[serde(default)]
    pub upload: UploadSettings,

    /// OTA polling cadence
    #[serde(default)]
    pub ota_poller: ota_poller::Options,

    /// Local HTTP server
    #[serde(default)]
    pub server: ServerSettings,

    /// Target checked at startup for a job or OTA to resume
    #[serde(default)]
    pub resume_target: Option<DeployRequest>,
}

fn default_true() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_to_file: true,
            services: ServiceSettings::default(),
            upload: UploadSettings::default(),
            ota_poller: ota_poller::Options::default(),
            server: ServerSettings::default(),
            resume_target: None,
        }
    }
}

/// Build, OTA and IoT service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSettings {
    #[serde(default = "default_builder_url")]
    pub builder_url: String,

    #[serde(default = "default_ota_url")]
    pub ota_url: String,

    #[serde(default = "default_iot_url")]
    pub iot_url: String,

    /// Bearer token sent to every service
    #[serde(default)]
    pub access_token: Option<String>,

    /// Organization (space) the requests act on
    #[serde(default)]
    pub organization: Option<String>,
}

fn default_builder_url() -> String {
    "https://api2.arduino.cc/builder".to_string()
}

fn default_ota_url() -> String {
    "https://api2.arduino.cc/ota".to_string()
}

fn default_iot_url() -> String {
    "https://api2.arduino.cc/iot".to_string()
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            builder_url: default_builder_url(),
            ota_url: default_ota_url(),
            iot_url: default_iot_url(),
            access_token: None,
            organization: None,
        }
    }
}

/// Wired upload settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadSettings {
    #[serde(default)]
    pub host_capability: HostCapability,

    #[serde(default = "default_agent_url")]
    pub agent_url: String,

    #[serde(default = "default_serial_bridge_url")]
    pub serial_bridge_url: String,

    /// Probe of the agent after a board restart
    #[serde(default)]
    pub reconnect: reconnect::Options,
}

fn default_agent_url() -> String {
    "http://127.0.0.1:8991".to_string()
}

fn default_serial_bridge_url() -> String {
    "ws://127.0.0.1:8992/serial".to_string()
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            host_capability: HostCapability::default(),
            agent_url: default_agent_url(),
            serial_bridge_url: default_serial_bridge_url(),
            reconnect: reconnect::Options::default(),
        }
    }
}

/// Local HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8790
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_host(),
            port: default_port(),
        }
    }
}
