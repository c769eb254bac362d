//! HTTP request handlers

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use tracing::warn;

use crate::compile::fsm::CompileState;
use crate::ota::fsm::OtaPhase;
use crate::ota::session::AbortOutcome;
use crate::server::state::ServerState;
use crate::session::request::DeployRequest;
use crate::status::DeploymentStatus;
use crate::utils::version_info;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Health check handler
pub async fn health_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "sketchdeploy".to_string(),
        version: state.version.clone(),
    })
}

/// Version response
#[derive(Debug, Serialize)]
pub struct VersionResponse {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

/// Session status response
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: DeploymentStatus,
    pub compile: CompileState,
    pub ota: OtaPhase,
    pub job_id: Option<String>,
    pub progress: u8,
    pub failed: bool,
    pub settled: bool,
}

pub async fn status_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let session = &state.session;
    let artifact = session.artifact();
    Json(StatusResponse {
        status: session.status(),
        compile: session.compile_state(),
        ota: session.ota_phase(),
        job_id: session.current_job().map(|job| job.id),
        progress: artifact.progress,
        failed: artifact.failed,
        settled: artifact.settled,
    })
}

/// Console response
#[derive(Debug, Serialize)]
pub struct ConsoleResponse {
    pub lines: Vec<String>,
}

pub async fn console_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(ConsoleResponse {
        lines: state.session.console().lines(),
    })
}

/// Command response
#[derive(Debug, Serialize)]
pub struct CommandResponse {
    pub success: bool,
    pub message: String,
}

impl CommandResponse {
    fn ok(message: &str) -> Self {
        Self {
            success: true,
            message: message.to_string(),
        }
    }

    fn failed(message: String) -> Self {
        Self {
            success: false,
            message,
        }
    }
}

/// Start a verify flow
pub async fn verify_handler(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<DeployRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    state.session.verify(request).await.map_err(|e| {
        warn!("Unable to start verify: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    Ok((StatusCode::ACCEPTED, Json(CommandResponse::ok("verify started"))))
}

/// Start an upload flow
pub async fn upload_handler(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<DeployRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    state.session.upload(request).await.map_err(|e| {
        warn!("Unable to start upload: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    Ok((StatusCode::ACCEPTED, Json(CommandResponse::ok("upload started"))))
}

/// Interrupt the running flow
pub async fn cancel_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    match state.session.cancel().await {
        Ok(()) => Json(CommandResponse::ok("cancelled")),
        Err(e) => Json(CommandResponse::failed(format!("Cancel failed: {}", e))),
    }
}

/// Abort a pending OTA
pub async fn abort_ota_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    match state.session.abort_ota().await {
        Ok(AbortOutcome::Aborted) => Json(CommandResponse::ok("aborted")),
        Ok(AbortOutcome::AlreadyProgressed) => Json(CommandResponse::failed(
            "The OTA update could not be interrupted".to_string(),
        )),
        Ok(AbortOutcome::NothingToAbort) => Json(CommandResponse::ok("nothing to abort")),
        Err(e) => Json(CommandResponse::failed(format!("Abort failed: {}", e))),
    }
}
