//! Application state management

use std::sync::Arc;

use tracing::info;

use crate::app::options::AppOptions;
use crate::errors::OrchestratorError;
use crate::http::agent::AgentClient;
use crate::http::builder::BuilderClient;
use crate::http::client::HttpClient;
use crate::http::iot::IotClient;
use crate::http::ota::OtaClient;
use crate::readiness::cert::LocalSketchWorkspace;
use crate::session::cache::FileSessionStore;
use crate::session::orchestrator::{OrchestratorSession, SessionServices};
use crate::transport::web_serial::BrowserSerialUploader;

/// Main application state
pub struct AppState {
    /// The deployment session
    pub session: Arc<OrchestratorSession>,

    pub version: String,
}

impl AppState {
    /// Initialize application state
    pub async fn init(version: String, options: &AppOptions) -> Result<Self, OrchestratorError> {
        info!("Initializing application state...");

        options.layout.setup().await?;

        let endpoints = &options.services;
        let client = |url: &str| -> Result<HttpClient, OrchestratorError> {
            Ok(HttpClient::new(url, endpoints.access_token.clone())?
                .with_organization(endpoints.organization.clone()))
        };

        let services = SessionServices {
            builder: Arc::new(BuilderClient::new(client(&endpoints.builder_url)?)),
            ota: Arc::new(OtaClient::new(client(&endpoints.ota_url)?)),
            iot: Arc::new(IotClient::new(client(&endpoints.iot_url)?)),
            agent: Arc::new(AgentClient::new(HttpClient::new(&options.agent_url, None)?)),
            serial: Arc::new(BrowserSerialUploader::new(&options.serial_bridge_url)?),
            workspace: Arc::new(LocalSketchWorkspace),
            store: Arc::new(FileSessionStore::new(options.layout.session_file())),
        };

        let session = Arc::new(OrchestratorSession::new(services, options.session.clone()));

        Ok(Self { session, version })
    }

    /// Shutdown application state
    pub async fn shutdown(&self) -> Result<(), OrchestratorError> {
        info!("Shutting down application state...");
        self.session.shutdown().await;
        Ok(())
    }
}
