//! Compile job state machine

use serde::Serialize;

/// Compile state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "error", rename_all = "snake_case")]
pub enum CompileState {
    #[default]
    Idle,
    Creating,
    Streaming,
    Succeeded,
    Failed,
    /// The stream closed before a result arrived
    Inconclusive,
    Cancelled,
    Errored(String),
}

impl CompileState {
    pub fn is_active(&self) -> bool {
        matches!(self, CompileState::Creating | CompileState::Streaming)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, CompileState::Failed | CompileState::Errored(_))
    }
}

/// Compile event
#[derive(Debug, Clone)]
pub enum CompileEvent {
    /// Submit a new compilation
    Create,

    /// The build service accepted the compilation
    Created,

    /// Re-attach to an existing compilation
    Resume,

    CreateFailed(String),

    /// The stream delivered its result
    Settled { failed: bool },

    /// The stream ended without a result
    Closed,

    StreamErrored(String),

    /// Fetching the compiled binaries failed
    OutputFailed(String),

    Cancel,

    Reset,
}

/// Compile FSM
#[derive(Debug, Clone, Default)]
pub struct CompileFsm {
    state: CompileState,
}

impl CompileFsm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &CompileState {
        &self.state
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: CompileEvent) -> Result<(), String> {
        let new_state = match (&self.state, &event) {
            (state, CompileEvent::Create) if !state.is_active() => CompileState::Creating,
            (state, CompileEvent::Resume) if !state.is_active() => CompileState::Streaming,

            (CompileState::Creating, CompileEvent::Created) => CompileState::Streaming,
            (CompileState::Creating, CompileEvent::CreateFailed(err)) => {
                CompileState::Errored(err.clone())
            }

            (CompileState::Streaming, CompileEvent::Settled { failed: true }) => CompileState::Failed,
            (CompileState::Streaming, CompileEvent::Settled { failed: false }) => {
                CompileState::Succeeded
            }
            (CompileState::Streaming, CompileEvent::Closed) => CompileState::Inconclusive,
            (CompileState::Streaming, CompileEvent::StreamErrored(err)) => {
                CompileState::Errored(err.clone())
            }

            (CompileState::Succeeded, CompileEvent::OutputFailed(err)) => {
                CompileState::Errored(err.clone())
            }

            (state, CompileEvent::Cancel) if state.is_active() => CompileState::Cancelled,
            (_, CompileEvent::Reset) => CompileState::Idle,

            (state, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", state, event));
            }
        };

        self.state = new_state;
        Ok(())
    }
}
