//! Delivery transports for compiled binaries

pub mod agent;
pub mod dispatcher;
pub mod web_serial;

use async_trait::async_trait;
use cloud_api::{CompilationOutput, ComputeResponse};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::console::ResponseStream;
use crate::errors::OrchestratorError;

/// Which wired transport the host offers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostCapability {
    /// A local upload agent is installed
    #[default]
    WiredAgent,
    /// Only a serial bridge is reachable
    SerialBridgeOnly,
}

/// Upload state of the active flow
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "error", rename_all = "snake_case")]
pub enum UploadStatus {
    #[default]
    Idle,
    /// Resolving the upload command for the board
    Computing,
    InProgress,
    Success,
    Error(String),
}

impl UploadStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, UploadStatus::Computing | UploadStatus::InProgress)
    }
}

/// How an upload finished
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadOutcome {
    Success,
    /// The board never answered after restarting; success is assumed
    AssumedSuccess,
}

/// Everything an uploader needs
#[derive(Debug, Clone, PartialEq)]
pub struct UploadPayload {
    pub fqbn: String,
    pub port: String,
    pub sketch_id: String,
    pub sketch_name: String,
    pub board_type: Option<String>,
    pub compile_data: CompilationOutput,
    pub compute: ComputeResponse,
    pub verbose: bool,
}

impl UploadPayload {
    /// Binary to flash and its file name, preferring Intel HEX
    pub fn binary(&self) -> Result<(String, String), OrchestratorError> {
        let data = &self.compile_data;
        if let Some(hex) = &data.hex {
            return Ok((format!("{}.hex", data.name), hex.clone()));
        }
        if let Some(bin) = &data.bin {
            return Ok((format!("{}.bin", data.name), bin.clone()));
        }
        Err(OrchestratorError::UploadError(format!(
            "compilation of {} produced no binary",
            data.name
        )))
    }
}

/// A wired upload strategy
#[async_trait]
pub trait Uploader: Send + Sync {
    fn name(&self) -> &'static str;

    /// Flash the payload, publishing progress on the console
    async fn upload(
        &self,
        payload: &UploadPayload,
        console: &ResponseStream,
        cancel: &CancellationToken,
    ) -> Result<UploadOutcome, OrchestratorError>;
}
