//! Deployment status derivation and publication

pub mod aggregator;
pub mod hub;

pub use aggregator::{derive_status, DeploymentStatus, StatusInputs};
pub use hub::StatusHub;
