//! Server state

use std::sync::Arc;

use crate::session::orchestrator::OrchestratorSession;

/// Server state shared across handlers
pub struct ServerState {
    pub session: Arc<OrchestratorSession>,
    pub version: String,
}

impl ServerState {
    pub fn new(session: Arc<OrchestratorSession>, version: String) -> Self {
        Self { session, version }
    }
}
