//! Application configuration options

use std::time::Duration;

use crate::session::orchestrator::SessionOptions;
use crate::session::request::DeployRequest;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Storage paths
    pub layout: StorageLayout,

    /// Remote services
    pub services: ServiceOptions,

    /// Session behaviour
    pub session: SessionOptions,

    pub agent_url: String,

    pub serial_bridge_url: String,

    /// Enable local HTTP server
    pub enable_socket_server: bool,

    /// Server configuration
    pub server: ServerOptions,

    /// Target checked for a job or OTA to resume at startup
    pub resume_target: Option<DeployRequest>,
}

impl AppOptions {
    pub fn from_settings(settings: &Settings, layout: StorageLayout) -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            layout,
            services: ServiceOptions {
                builder_url: settings.services.builder_url.clone(),
                ota_url: settings.services.ota_url.clone(),
                iot_url: settings.services.iot_url.clone(),
                access_token: settings.services.access_token.clone(),
                organization: settings.services.organization.clone(),
            },
            session: SessionOptions {
                capability: settings.upload.host_capability,
                reconnect: settings.upload.reconnect.clone(),
                ota_poll: settings.ota_poller.clone(),
                ..Default::default()
            },
            agent_url: settings.upload.agent_url.clone(),
            serial_bridge_url: settings.upload.serial_bridge_url.clone(),
            enable_socket_server: settings.server.enabled,
            server: ServerOptions {
                host: settings.server.host.clone(),
                port: settings.server.port,
            },
            resume_target: settings.resume_target.clone(),
        }
    }
}

impl Default for AppOptions {
    fn default() -> Self {
        Self::from_settings(&Settings::default(), StorageLayout::default())
    }
}

/// Lifecycle options
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// Remote service endpoints and credentials
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    pub builder_url: String,
    pub ota_url: String,
    pub iot_url: String,
    pub access_token: Option<String>,
    pub organization: Option<String>,
}

/// Local HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8790,
        }
    }
}
