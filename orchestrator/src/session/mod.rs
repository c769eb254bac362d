//! Deployment session: one flow at a time, resumable across restarts

pub mod cache;
pub mod orchestrator;
pub mod request;

pub use orchestrator::{OrchestratorSession, ResumeOutcome, SessionOptions, SessionServices};
pub use request::{DeployRequest, DeploymentTarget, SketchRef};
