//! Upload through the local agent

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::console::ResponseStream;
use crate::errors::OrchestratorError;
use crate::http::agent::{AgentService, AgentUploadRequest};
use crate::transport::{UploadOutcome, UploadPayload, Uploader};
use crate::workers::reconnect::{self, await_reconnection, ReconnectOutcome};

/// Wired serial upload via a helper process on the host
pub struct LocalAgentUploader {
    agent: Arc<dyn AgentService>,
    reconnect: reconnect::Options,
}

impl LocalAgentUploader {
    pub fn new(agent: Arc<dyn AgentService>, reconnect: reconnect::Options) -> Self {
        Self { agent, reconnect }
    }
}

#[async_trait]
impl Uploader for LocalAgentUploader {
    fn name(&self) -> &'static str {
        "agent"
    }

    async fn upload(
        &self,
        payload: &UploadPayload,
        console: &ResponseStream,
        cancel: &CancellationToken,
    ) -> Result<UploadOutcome, OrchestratorError> {
        let (filename, hex) = payload.binary()?;
        let request = AgentUploadRequest {
            port: payload.port.clone(),
            board: payload.fqbn.clone(),
            commandline: payload.compute.commandline.clone(),
            signature: payload.compute.signature.clone(),
            filename,
            hex,
            extra_files: payload.compile_data.extra_files.clone(),
            tools: payload.compute.tools.clone(),
            verbose: payload.verbose,
        };

        info!("Uploading {} to {} through the local agent", payload.sketch_name, payload.port);
        console.publish(&format!("Uploading {} to {}...", payload.sketch_name, payload.port));

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(OrchestratorError::Cancelled),
            response = self.agent.upload(&request) => response?,
        };
        for line in &response.output {
            console.publish(line);
        }

        if !response.restarting {
            console.publish("Upload complete.");
            return Ok(UploadOutcome::Success);
        }
        info!("Waiting for the agent to come back after a restart");

        let outcome = await_reconnection(
            &self.reconnect,
            self.agent.as_ref(),
            tokio::time::sleep,
            cancel,
        )
        .await?;

        match outcome {
            ReconnectOutcome::Reconnected { .. } => {
                console.publish("Upload complete.");
                Ok(UploadOutcome::Success)
            }
            ReconnectOutcome::AssumedSuccess => {
                console.publish("Upload complete, the board did not report back after restarting.");
                Ok(UploadOutcome::AssumedSuccess)
            }
            ReconnectOutcome::Exhausted => Err(OrchestratorError::UploadError(
                "the board did not reconnect after the upload".to_string(),
            )),
        }
    }
}
