//! Local upload agent API client

use async_trait::async_trait;
use cloud_api::{ComputeTool, ExtraFile};
use serde::{Deserialize, Serialize};

use crate::errors::OrchestratorError;
use crate::http::client::HttpClient;

/// Upload request understood by the local agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentUploadRequest {
    pub port: String,
    pub board: String,
    pub commandline: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    pub filename: String,
    pub hex: String,
    #[serde(default)]
    pub extra_files: Vec<ExtraFile>,
    #[serde(default)]
    pub tools: Vec<ComputeTool>,
    pub verbose: bool,
}

/// Upload response of the local agent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentUploadResponse {
    #[serde(default)]
    pub output: Vec<String>,
    /// The board or the agent restarts to apply the upload
    #[serde(default)]
    pub restarting: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct AgentInfo {
    version: String,
}

/// Local agent driving wired serial uploads
#[async_trait]
pub trait AgentService: Send + Sync {
    /// Version reported by the agent, used as a liveness probe
    async fn version(&self) -> Result<String, OrchestratorError>;

    async fn upload(&self, request: &AgentUploadRequest) -> Result<AgentUploadResponse, OrchestratorError>;
}

/// Local agent over HTTP
pub struct AgentClient {
    http: HttpClient,
}

impl AgentClient {
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }
}

#[async_trait]
impl AgentService for AgentClient {
    async fn version(&self) -> Result<String, OrchestratorError> {
        let info: AgentInfo = self.http.get("/info").await?;
        Ok(info.version)
    }

    async fn upload(&self, request: &AgentUploadRequest) -> Result<AgentUploadResponse, OrchestratorError> {
        self.http.post("/upload", request).await
    }
}
