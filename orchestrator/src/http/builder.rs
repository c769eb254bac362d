//! Build service API client

use async_trait::async_trait;
use cloud_api::{Compilation, CompilationOutput, ComputeResponse, CreateCompilationRequest};
use tokio::sync::mpsc;

use crate::compile::stream::{frames_from_response, StreamFrame};
use crate::errors::OrchestratorError;
use crate::http::client::HttpClient;

/// Remote build service
#[async_trait]
pub trait BuildService: Send + Sync {
    async fn create_compilation(
        &self,
        request: &CreateCompilationRequest,
    ) -> Result<Compilation, OrchestratorError>;

    async fn get_compilation(&self, id: &str) -> Result<Compilation, OrchestratorError>;

    async fn cancel_compilation(&self, id: &str) -> Result<(), OrchestratorError>;

    /// Compiled binaries of a completed compilation
    async fn compilation_output(&self, id: &str) -> Result<CompilationOutput, OrchestratorError>;

    /// Upload tool and command line for a board on the host OS
    async fn compute(&self, fqbn: &str, os: &str) -> Result<ComputeResponse, OrchestratorError>;

    /// Open the push stream of a compilation
    async fn open_stream(&self, id: &str) -> Result<mpsc::Receiver<StreamFrame>, OrchestratorError>;
}

/// Build service over HTTP
pub struct BuilderClient {
    http: HttpClient,
}

impl BuilderClient {
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }
}

#[async_trait]
impl BuildService for BuilderClient {
    async fn create_compilation(
        &self,
        request: &CreateCompilationRequest,
    ) -> Result<Compilation, OrchestratorError> {
        self.http.post("/v1/compilations", request).await
    }

    async fn get_compilation(&self, id: &str) -> Result<Compilation, OrchestratorError> {
        self.http.get(&format!("/v1/compilations/{}", id)).await
    }

    async fn cancel_compilation(&self, id: &str) -> Result<(), OrchestratorError> {
        self.http
            .post_empty(&format!("/v1/compilations/{}/cancel", id))
            .await
    }

    async fn compilation_output(&self, id: &str) -> Result<CompilationOutput, OrchestratorError> {
        self.http
            .get(&format!("/v1/compilations/{}/artifacts", id))
            .await
    }

    async fn compute(&self, fqbn: &str, os: &str) -> Result<ComputeResponse, OrchestratorError> {
        self.http
            .get_with_query(&format!("/v3/boards/{}/compute", fqbn), &[("os", os)])
            .await
    }

    async fn open_stream(&self, id: &str) -> Result<mpsc::Receiver<StreamFrame>, OrchestratorError> {
        let response = self
            .http
            .get_event_stream(&format!("/v1/compilations/{}/stream", id))
            .await?;
        Ok(frames_from_response(response))
    }
}
