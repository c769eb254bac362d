//! Routes a finished compilation to exactly one transport

use std::sync::Arc;

use cloud_api::CompilationOutput;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::console::ResponseStream;
use crate::errors::OrchestratorError;
use crate::http::builder::BuildService;
use crate::ota::fsm::OtaPhase;
use crate::ota::session::OtaSessionManager;
use crate::session::request::{DeploymentTarget, SketchRef};
use crate::status::StatusHub;
use crate::transport::{HostCapability, UploadOutcome, UploadPayload, UploadStatus, Uploader};
use crate::workers::ota_poller;

/// Operating system name understood by the compute endpoint
pub fn host_os() -> &'static str {
    match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    }
}

/// Fields a wired upload cannot do without
pub fn missing_fields(
    target: &DeploymentTarget,
    sketch: &SketchRef,
    compile_data: Option<&CompilationOutput>,
) -> Vec<&'static str> {
    let mut missing = Vec::new();
    if target.fqbn.is_empty() {
        missing.push("fqbn");
    }
    if target.port.as_deref().map_or(true, str::is_empty) {
        missing.push("port");
    }
    if sketch.id.is_empty() {
        missing.push("sketch_id");
    }
    if compile_data.is_none() {
        missing.push("compile_data");
    }
    missing
}

/// How a dispatch finished
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Uploaded(UploadOutcome),
    Ota(OtaPhase),
}

pub struct TransportDispatcher {
    builder: Arc<dyn BuildService>,
    agent: Arc<dyn Uploader>,
    serial: Arc<dyn Uploader>,
    ota: Arc<OtaSessionManager>,
    capability: HostCapability,
    ota_poll: ota_poller::Options,
    status: StatusHub,
}

impl TransportDispatcher {
    pub fn new(
        builder: Arc<dyn BuildService>,
        agent: Arc<dyn Uploader>,
        serial: Arc<dyn Uploader>,
        ota: Arc<OtaSessionManager>,
        capability: HostCapability,
        ota_poll: ota_poller::Options,
        status: StatusHub,
    ) -> Self {
        Self {
            builder,
            agent,
            serial,
            ota,
            capability,
            ota_poll,
            status,
        }
    }

    pub fn ota_poll_options(&self) -> &ota_poller::Options {
        &self.ota_poll
    }

    fn set_upload(&self, upload: UploadStatus) {
        self.status.update(|inputs| inputs.upload = upload);
    }

    /// Deliver the compiled sketch to the target
    pub async fn dispatch(
        &self,
        target: &DeploymentTarget,
        sketch: &SketchRef,
        compile_data: Option<&CompilationOutput>,
        verbose: bool,
        console: &ResponseStream,
        cancel: &CancellationToken,
    ) -> Result<DispatchOutcome, OrchestratorError> {
        if target.is_iot {
            return self.dispatch_ota(target, compile_data, cancel).await;
        }

        let missing = missing_fields(target, sketch, compile_data);
        if !missing.is_empty() {
            return Err(OrchestratorError::IncompleteTarget(missing.join(", ")));
        }
        let (Some(port), Some(compile_data)) = (target.port.as_deref(), compile_data) else {
            return Err(OrchestratorError::IncompleteTarget("port, compile_data".to_string()));
        };

        self.set_upload(UploadStatus::Computing);
        let compute = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(OrchestratorError::Cancelled),
            compute = self.builder.compute(&target.fqbn, host_os()) => compute,
        };
        let compute = match compute {
            Ok(compute) => compute,
            Err(OrchestratorError::Cancelled) => {
                self.set_upload(UploadStatus::Idle);
                return Err(OrchestratorError::Cancelled);
            }
            Err(e) => {
                self.set_upload(UploadStatus::Error(e.to_string()));
                return Err(e);
            }
        };

        let payload = UploadPayload {
            fqbn: target.fqbn.clone(),
            port: port.to_string(),
            sketch_id: sketch.id.clone(),
            sketch_name: sketch.name.clone(),
            board_type: target.board_type.clone(),
            compile_data: compile_data.clone(),
            compute,
            verbose,
        };

        let uploader = match self.capability {
            HostCapability::WiredAgent => &self.agent,
            HostCapability::SerialBridgeOnly => &self.serial,
        };
        info!("Dispatching {} to {} via {}", sketch.name, port, uploader.name());

        self.set_upload(UploadStatus::InProgress);
        match uploader.upload(&payload, console, cancel).await {
            Ok(outcome) => {
                self.set_upload(UploadStatus::Success);
                Ok(DispatchOutcome::Uploaded(outcome))
            }
            Err(OrchestratorError::Cancelled) => {
                self.set_upload(UploadStatus::Idle);
                Err(OrchestratorError::Cancelled)
            }
            Err(e) => {
                error!("Upload of {} failed: {}", sketch.name, e);
                self.set_upload(UploadStatus::Error(e.to_string()));
                Err(e)
            }
        }
    }

    async fn dispatch_ota(
        &self,
        target: &DeploymentTarget,
        compile_data: Option<&CompilationOutput>,
        cancel: &CancellationToken,
    ) -> Result<DispatchOutcome, OrchestratorError> {
        let device_id = target
            .device_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| OrchestratorError::IncompleteTarget("device_id".to_string()))?;
        let binary_key = compile_data
            .and_then(|data| data.ota_key.as_deref())
            .ok_or_else(|| OrchestratorError::IncompleteTarget("ota_key".to_string()))?;

        let session = self.ota.create(device_id, binary_key).await?;
        let phase = ota_poller::run(
            &self.ota_poll,
            &self.ota,
            &session.id,
            tokio::time::sleep,
            cancel,
        )
        .await;
        Ok(DispatchOutcome::Ota(phase))
    }
}
