//! Pre-compile readiness checks for IoT sketches

pub mod cert;

use serde::Serialize;

/// Readiness check state of the active flow
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessState {
    #[default]
    Idle,
    CheckingCertificate,
    /// Sketch files are being refreshed after a certificate migration
    Migrating,
    CheckingDevice,
    Passed,
    Failed,
}

impl ReadinessState {
    pub fn is_checking(&self) -> bool {
        matches!(
            self,
            ReadinessState::CheckingCertificate | ReadinessState::Migrating | ReadinessState::CheckingDevice
        )
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ReadinessState::Failed)
    }
}
