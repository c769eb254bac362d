//! Compile job creation and cancellation

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use cloud_api::{Compilation, CreateCompilationRequest};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::errors::OrchestratorError;
use crate::http::builder::BuildService;
use crate::session::cache::{CachedJobHandle, SessionCache};

/// What the compiled binary is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandType {
    Verify,
    Upload,
}

impl CommandType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandType::Verify => "verify",
            CommandType::Upload => "upload",
        }
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "verify" => Ok(CommandType::Verify),
            "upload" => Ok(CommandType::Upload),
            _ => Err(format!("Invalid command type: {}", s)),
        }
    }
}

/// Compile request payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilePayload {
    pub fqbn: String,
    pub board_type: Option<String>,
    pub sketch_id: String,
    pub sketch_name: String,
    pub command_type: CommandType,
    pub should_cache: bool,
    pub verbose: bool,
    pub ota: bool,
    pub secrets_include_injected: bool,
}

/// An accepted compilation. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompileJob {
    pub id: String,
    pub fqbn: String,
    pub board_type: Option<String>,
    pub sketch_id: String,
    pub sketch_name: String,
    pub command_type: CommandType,
    pub should_cache: bool,
    pub secrets_include_injected: bool,
}

impl CompileJob {
    fn from_payload(id: String, payload: CompilePayload) -> Self {
        Self {
            id,
            fqbn: payload.fqbn,
            board_type: payload.board_type,
            sketch_id: payload.sketch_id,
            sketch_name: payload.sketch_name,
            command_type: payload.command_type,
            should_cache: payload.should_cache,
            secrets_include_injected: payload.secrets_include_injected,
        }
    }

    pub fn handle(&self) -> CachedJobHandle {
        CachedJobHandle {
            id: self.id.clone(),
            command_type: self.command_type,
            fqbn: self.fqbn.clone(),
        }
    }
}

#[derive(Debug)]
enum Slot {
    Idle,
    Creating { attempt: u64, token: CancellationToken },
    Created(CompileJob),
}

/// Creates and cancels compile jobs; at most one exists at a time
pub struct CompileJobManager {
    builder: Arc<dyn BuildService>,
    cache: Arc<SessionCache>,
    slot: Mutex<Slot>,
    attempts: AtomicU64,
}

impl CompileJobManager {
    pub fn new(builder: Arc<dyn BuildService>, cache: Arc<SessionCache>) -> Self {
        Self {
            builder,
            cache,
            slot: Mutex::new(Slot::Idle),
            attempts: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Slot>, OrchestratorError> {
        self.slot
            .lock()
            .map_err(|e| OrchestratorError::Internal(e.to_string()))
    }

    pub fn is_creating(&self) -> bool {
        matches!(self.lock().as_deref(), Ok(Slot::Creating { .. }))
    }

    pub fn current(&self) -> Option<CompileJob> {
        match self.lock().as_deref() {
            Ok(Slot::Created(job)) => Some(job.clone()),
            _ => None,
        }
    }

    /// Submit a compilation. Never retried; a pending creation must be
    /// cancelled before another one starts.
    pub async fn create(&self, payload: CompilePayload) -> Result<CompileJob, OrchestratorError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        let token = {
            let mut slot = self.lock()?;
            if matches!(*slot, Slot::Creating { .. }) {
                return Err(OrchestratorError::CreationInFlight);
            }
            let token = CancellationToken::new();
            *slot = Slot::Creating {
                attempt,
                token: token.clone(),
            };
            token
        };

        let request = CreateCompilationRequest {
            fqbn: payload.fqbn.clone(),
            sketch_id: payload.sketch_id.clone(),
            sketch_name: payload.sketch_name.clone(),
            verbose: payload.verbose,
            ota: payload.ota,
        };

        info!("Creating compilation for {} ({})", payload.sketch_name, payload.fqbn);
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => Err(OrchestratorError::Cancelled),
            result = self.builder.create_compilation(&request) => result,
        };

        let compilation = match result {
            Ok(compilation) => compilation,
            Err(e) => {
                let mut slot = self.lock()?;
                if matches!(&*slot, Slot::Creating { attempt: a, .. } if *a == attempt) {
                    *slot = Slot::Idle;
                }
                return Err(e);
            }
        };

        let job = CompileJob::from_payload(compilation.id, payload);
        let accepted = {
            let mut slot = self.lock()?;
            let current = matches!(&*slot, Slot::Creating { attempt: a, .. } if *a == attempt);
            if current && !token.is_cancelled() {
                *slot = Slot::Created(job.clone());
                true
            } else {
                false
            }
        };
        if !accepted {
            warn!("Compilation {} created after cancellation, cancelling it", job.id);
            if let Err(e) = self.builder.cancel_compilation(&job.id).await {
                warn!("Unable to cancel compilation {}: {}", job.id, e);
            }
            return Err(OrchestratorError::Cancelled);
        }

        if job.should_cache {
            if let Err(e) = self.cache.put(&job.handle()).await {
                error!("Unable to cache compilation {}: {}", job.id, e);
            }
        }

        info!("Compilation {} created", job.id);
        Ok(job)
    }

    /// Re-attach to an existing compilation without submitting a new one.
    /// The handle stays cached until the job reaches a terminal result.
    pub async fn resume_by_id(
        &self,
        compilation: &Compilation,
        payload: CompilePayload,
    ) -> Result<CompileJob, OrchestratorError> {
        let job = {
            let mut slot = self.lock()?;
            if matches!(*slot, Slot::Creating { .. }) {
                return Err(OrchestratorError::CreationInFlight);
            }
            let job = CompileJob::from_payload(compilation.id.clone(), payload);
            info!("Resuming compilation {}", job.id);
            *slot = Slot::Created(job.clone());
            job
        };

        if job.should_cache {
            if let Err(e) = self.cache.put(&job.handle()).await {
                error!("Unable to cache compilation {}: {}", job.id, e);
            }
        }
        Ok(job)
    }

    /// The job reached a terminal result: forget it and its cached handle
    pub async fn complete(&self) -> Result<(), OrchestratorError> {
        *self.lock()? = Slot::Idle;
        self.cache.clear().await
    }

    /// Abort a pending creation, or cancel the created job remotely.
    ///
    /// Local job state and the session cache are cleared whatever the remote
    /// outcome; a remote failure is still returned to the caller.
    pub async fn cancel(&self) -> Result<(), OrchestratorError> {
        let previous = std::mem::replace(&mut *self.lock()?, Slot::Idle);

        if let Err(e) = self.cache.clear().await {
            error!("Unable to clear the session cache: {}", e);
        }

        match previous {
            Slot::Idle => Ok(()),
            Slot::Creating { token, .. } => {
                info!("Aborting compilation creation");
                token.cancel();
                Ok(())
            }
            Slot::Created(job) => {
                info!("Cancelling compilation {}", job.id);
                self.builder.cancel_compilation(&job.id).await
            }
        }
    }
}
