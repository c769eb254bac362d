//! Certificate check and migration gate

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use cloud_api::RequiredAction;
use tracing::{debug, info, warn};

use crate::errors::OrchestratorError;
use crate::http::iot::IotService;
use crate::notify::{EventBus, Notification};
use crate::readiness::ReadinessState;
use crate::session::request::SketchRef;
use crate::status::StatusHub;

const SECRETS_FILE: &str = "arduino_secrets.h";

/// Modification stamps of the files a certificate migration rewrites
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SketchStamps {
    pub secrets: Option<String>,
    pub content: Option<String>,
}

impl SketchStamps {
    /// Both stamps exist in both snapshots and both moved
    pub fn both_changed(before: &SketchStamps, after: &SketchStamps) -> bool {
        match (&before.secrets, &before.content, &after.secrets, &after.content) {
            (Some(bs), Some(bc), Some(as_), Some(ac)) => bs != as_ && bc != ac,
            _ => false,
        }
    }
}

/// Where sketch files live
#[async_trait]
pub trait SketchWorkspace: Send + Sync {
    async fn stamps(
        &self,
        sketch: &SketchRef,
        properties_path: Option<&str>,
    ) -> Result<SketchStamps, OrchestratorError>;

    /// Reload the sketch after the service rewrote it
    async fn refresh_sketch(&self, sketch: &SketchRef) -> Result<(), OrchestratorError>;

    async fn refresh_file(&self, sketch: &SketchRef, path: &str) -> Result<(), OrchestratorError>;
}

/// Sketch files on the local disk, stamped by modification time.
///
/// The daemon never rewrites sketch files itself. `refresh_sketch` and
/// `refresh_file` only check that the files still exist; a migration passes
/// only if the editor or the IoT service writes new secrets or properties
/// between the two stamp snapshots. Otherwise the gate ends `Blocked`.
#[derive(Debug, Clone, Default)]
pub struct LocalSketchWorkspace;

impl LocalSketchWorkspace {
    fn sketch_dir(sketch: &SketchRef) -> Result<&Path, OrchestratorError> {
        sketch
            .path
            .as_deref()
            .ok_or_else(|| OrchestratorError::NotFound(format!("no local path for sketch {}", sketch.name)))
    }

    async fn mtime(path: PathBuf) -> Option<String> {
        let metadata = tokio::fs::metadata(&path).await.ok()?;
        let modified = metadata.modified().ok()?;
        let nanos = modified.duration_since(UNIX_EPOCH).ok()?.as_nanos();
        Some(nanos.to_string())
    }
}

#[async_trait]
impl SketchWorkspace for LocalSketchWorkspace {
    async fn stamps(
        &self,
        sketch: &SketchRef,
        properties_path: Option<&str>,
    ) -> Result<SketchStamps, OrchestratorError> {
        let dir = Self::sketch_dir(sketch)?;
        let secrets = Self::mtime(dir.join(SECRETS_FILE)).await;
        let content = match properties_path {
            Some(path) => Self::mtime(dir.join(path)).await,
            None => None,
        };
        Ok(SketchStamps { secrets, content })
    }

    async fn refresh_sketch(&self, sketch: &SketchRef) -> Result<(), OrchestratorError> {
        let dir = Self::sketch_dir(sketch)?;
        if !tokio::fs::try_exists(dir).await? {
            return Err(OrchestratorError::NotFound(format!("{}", dir.display())));
        }
        debug!("Sketch {} is read from disk, nothing to reload", sketch.name);
        Ok(())
    }

    async fn refresh_file(&self, sketch: &SketchRef, path: &str) -> Result<(), OrchestratorError> {
        let file = Self::sketch_dir(sketch)?.join(path);
        if !tokio::fs::try_exists(&file).await? {
            return Err(OrchestratorError::NotFound(format!("{}", file.display())));
        }
        Ok(())
    }
}

/// Whether compilation may start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Proceed,
    Blocked,
}

/// Certificate check that must pass before an IoT sketch compiles
pub struct ReadinessGate {
    iot: Arc<dyn IotService>,
    workspace: Arc<dyn SketchWorkspace>,
    events: EventBus,
    status: StatusHub,
}

impl ReadinessGate {
    pub fn new(
        iot: Arc<dyn IotService>,
        workspace: Arc<dyn SketchWorkspace>,
        events: EventBus,
        status: StatusHub,
    ) -> Self {
        Self {
            iot,
            workspace,
            events,
            status,
        }
    }

    /// Check the thing certificate and follow a migration if one is required.
    ///
    /// Proceeds when no reload was required, or when both the secrets and
    /// properties stamps exist and both changed across the refresh.
    pub async fn check_certificate(
        &self,
        thing_id: &str,
        sketch: &SketchRef,
        properties_path: Option<&str>,
    ) -> GateDecision {
        self.set_state(ReadinessState::CheckingCertificate);

        match self.run_check(thing_id, sketch, properties_path).await {
            Ok(GateDecision::Proceed) => {
                self.set_state(ReadinessState::Passed);
                GateDecision::Proceed
            }
            Ok(GateDecision::Blocked) => {
                warn!("Certificate migration for thing {} did not refresh the sketch", thing_id);
                self.events.notify(Notification::CertNotRefreshed);
                self.set_state(ReadinessState::Failed);
                GateDecision::Blocked
            }
            Err(e) => {
                warn!("Certificate check for thing {} failed: {}", thing_id, e);
                self.events.notify(Notification::CertCheckFailed {
                    message: e.to_string(),
                });
                self.set_state(ReadinessState::Failed);
                GateDecision::Blocked
            }
        }
    }

    async fn run_check(
        &self,
        thing_id: &str,
        sketch: &SketchRef,
        properties_path: Option<&str>,
    ) -> Result<GateDecision, OrchestratorError> {
        let before = self.workspace.stamps(sketch, properties_path).await?;

        let response = self.iot.check_thing_cert(thing_id).await?;
        if response.required_action != RequiredAction::ReloadSketch {
            debug!("Certificate for thing {} is current", thing_id);
            return Ok(GateDecision::Proceed);
        }

        info!("Certificate migrated for thing {}, refreshing sketch {}", thing_id, sketch.name);
        self.set_state(ReadinessState::Migrating);
        self.workspace.refresh_sketch(sketch).await?;
        if let Some(path) = properties_path {
            self.workspace.refresh_file(sketch, path).await?;
        }

        let after = self.workspace.stamps(sketch, properties_path).await?;
        if SketchStamps::both_changed(&before, &after) {
            Ok(GateDecision::Proceed)
        } else {
            Ok(GateDecision::Blocked)
        }
    }

    fn set_state(&self, state: ReadinessState) {
        self.status.update(|inputs| inputs.readiness = state);
    }
}
