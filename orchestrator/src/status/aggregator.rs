//! Pure reducer from subsystem states to one deployment status

use cloud_api::OtaStep;
use serde::Serialize;

use crate::compile::fsm::CompileState;
use crate::ota::fsm::OtaPhase;
use crate::readiness::ReadinessState;
use crate::transport::UploadStatus;

/// Subsystem states the deployment status is derived from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusInputs {
    pub readiness: ReadinessState,
    pub compile: CompileState,
    pub upload: UploadStatus,
    pub ota: OtaPhase,
}

/// Status shown for the active flow
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "step", rename_all = "snake_case")]
pub enum DeploymentStatus {
    CheckingReadiness,
    Verifying,
    PendingOta,
    OtaInProgress(Option<OtaStep>),
    Uploading,
    Error,
    Success,
    #[default]
    Idle,
}

/// Derive the status; the first matching rule wins
pub fn derive_status(inputs: &StatusInputs) -> DeploymentStatus {
    if inputs.readiness.is_checking() {
        return DeploymentStatus::CheckingReadiness;
    }
    if inputs.compile.is_active() || inputs.ota == OtaPhase::Compiling {
        return DeploymentStatus::Verifying;
    }
    match &inputs.ota {
        OtaPhase::Pending => return DeploymentStatus::PendingOta,
        OtaPhase::InProgress { step } => return DeploymentStatus::OtaInProgress(*step),
        _ => {}
    }
    if inputs.upload.is_active() {
        return DeploymentStatus::Uploading;
    }

    let failed = inputs.readiness.is_error()
        || inputs.compile.is_error()
        || matches!(inputs.upload, UploadStatus::Error(_))
        || inputs.ota.is_error();
    if failed {
        return DeploymentStatus::Error;
    }

    let succeeded = inputs.ota == OtaPhase::Succeeded
        || inputs.upload == UploadStatus::Success
        || inputs.compile == CompileState::Succeeded;
    if succeeded {
        return DeploymentStatus::Success;
    }

    DeploymentStatus::Idle
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs() -> StatusInputs {
        StatusInputs::default()
    }

    #[test]
    fn test_idle_by_default() {
        assert_eq!(derive_status(&inputs()), DeploymentStatus::Idle);
    }

    #[test]
    fn test_readiness_wins_over_everything() {
        let all = StatusInputs {
            readiness: ReadinessState::CheckingCertificate,
            compile: CompileState::Streaming,
            upload: UploadStatus::InProgress,
            ota: OtaPhase::Pending,
        };
        assert_eq!(derive_status(&all), DeploymentStatus::CheckingReadiness);
    }

    #[test]
    fn test_verifying_before_ota() {
        let mut state = inputs();
        state.compile = CompileState::Creating;
        state.ota = OtaPhase::InProgress { step: None };
        assert_eq!(derive_status(&state), DeploymentStatus::Verifying);
    }

    #[test]
    fn test_ota_pending_before_step() {
        let mut state = inputs();
        state.ota = OtaPhase::Pending;
        state.upload = UploadStatus::Computing;
        assert_eq!(derive_status(&state), DeploymentStatus::PendingOta);

        state.ota = OtaPhase::InProgress { step: Some(OtaStep::Fetch) };
        assert_eq!(derive_status(&state), DeploymentStatus::OtaInProgress(Some(OtaStep::Fetch)));
    }

    #[test]
    fn test_computing_counts_as_uploading() {
        let mut state = inputs();
        state.compile = CompileState::Succeeded;
        state.upload = UploadStatus::Computing;
        assert_eq!(derive_status(&state), DeploymentStatus::Uploading);
    }

    #[test]
    fn test_error_before_success() {
        let mut state = inputs();
        state.compile = CompileState::Succeeded;
        state.upload = UploadStatus::Error("port busy".to_string());
        assert_eq!(derive_status(&state), DeploymentStatus::Error);

        state.upload = UploadStatus::Success;
        assert_eq!(derive_status(&state), DeploymentStatus::Success);
    }

    #[test]
    fn test_inconclusive_and_aborted_are_idle() {
        let mut state = inputs();
        state.compile = CompileState::Inconclusive;
        assert_eq!(derive_status(&state), DeploymentStatus::Idle);

        state.ota = OtaPhase::Aborted;
        assert_eq!(derive_status(&state), DeploymentStatus::Idle);
    }
}
