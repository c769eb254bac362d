//! Deployment status precedence tests

use cloud_api::OtaStep;

use sketchdeploy::compile::fsm::CompileState;
use sketchdeploy::ota::fsm::{NotReadyReason, OtaPhase};
use sketchdeploy::readiness::ReadinessState;
use sketchdeploy::status::{derive_status, DeploymentStatus, StatusHub, StatusInputs};
use sketchdeploy::transport::UploadStatus;

fn readiness_states() -> Vec<ReadinessState> {
    vec![
        ReadinessState::Idle,
        ReadinessState::CheckingCertificate,
        ReadinessState::Migrating,
        ReadinessState::CheckingDevice,
        ReadinessState::Passed,
        ReadinessState::Failed,
    ]
}

fn compile_states() -> Vec<CompileState> {
    vec![
        CompileState::Idle,
        CompileState::Creating,
        CompileState::Streaming,
        CompileState::Succeeded,
        CompileState::Failed,
        CompileState::Inconclusive,
        CompileState::Cancelled,
        CompileState::Errored("boom".to_string()),
    ]
}

fn upload_states() -> Vec<UploadStatus> {
    vec![
        UploadStatus::Idle,
        UploadStatus::Computing,
        UploadStatus::InProgress,
        UploadStatus::Success,
        UploadStatus::Error("port busy".to_string()),
    ]
}

fn ota_phases() -> Vec<OtaPhase> {
    vec![
        OtaPhase::ReadinessUnknown,
        OtaPhase::NotReady {
            reason: NotReadyReason::OtaUnavailable,
        },
        OtaPhase::Ready,
        OtaPhase::Compiling,
        OtaPhase::Pending,
        OtaPhase::InProgress { step: None },
        OtaPhase::InProgress {
            step: Some(OtaStep::Flash),
        },
        OtaPhase::Succeeded,
        OtaPhase::Failed { reason: None },
        OtaPhase::Aborted,
    ]
}

/// The precedence rules written out one by one
fn expected(inputs: &StatusInputs) -> DeploymentStatus {
    let checking = matches!(
        inputs.readiness,
        ReadinessState::CheckingCertificate | ReadinessState::Migrating | ReadinessState::CheckingDevice
    );
    let compiling = matches!(inputs.compile, CompileState::Creating | CompileState::Streaming)
        || inputs.ota == OtaPhase::Compiling;
    let uploading = matches!(inputs.upload, UploadStatus::Computing | UploadStatus::InProgress);
    let failed = inputs.readiness == ReadinessState::Failed
        || matches!(inputs.compile, CompileState::Failed | CompileState::Errored(_))
        || matches!(inputs.upload, UploadStatus::Error(_))
        || matches!(inputs.ota, OtaPhase::NotReady { .. } | OtaPhase::Failed { .. });
    let succeeded = inputs.ota == OtaPhase::Succeeded
        || inputs.upload == UploadStatus::Success
        || inputs.compile == CompileState::Succeeded;

    if checking {
        DeploymentStatus::CheckingReadiness
    } else if compiling {
        DeploymentStatus::Verifying
    } else if inputs.ota == OtaPhase::Pending {
        DeploymentStatus::PendingOta
    } else if let OtaPhase::InProgress { step } = inputs.ota {
        DeploymentStatus::OtaInProgress(step)
    } else if uploading {
        DeploymentStatus::Uploading
    } else if failed {
        DeploymentStatus::Error
    } else if succeeded {
        DeploymentStatus::Success
    } else {
        DeploymentStatus::Idle
    }
}

#[test]
fn test_precedence_is_total() {
    let mut checked = 0;
    for readiness in readiness_states() {
        for compile in compile_states() {
            for upload in upload_states() {
                for ota in ota_phases() {
                    let inputs = StatusInputs {
                        readiness,
                        compile: compile.clone(),
                        upload: upload.clone(),
                        ota,
                    };
                    assert_eq!(derive_status(&inputs), expected(&inputs), "{:?}", inputs);
                    checked += 1;
                }
            }
        }
    }
    assert_eq!(checked, 6 * 8 * 5 * 10);
}

#[test]
fn test_hub_publishes_derived_status() {
    let hub = StatusHub::new();
    let rx = hub.subscribe();

    hub.update(|inputs| inputs.readiness = ReadinessState::CheckingDevice);
    assert_eq!(*rx.borrow(), DeploymentStatus::CheckingReadiness);

    hub.update(|inputs| {
        inputs.readiness = ReadinessState::Passed;
        inputs.ota = OtaPhase::InProgress {
            step: Some(OtaStep::Fetch),
        };
    });
    assert_eq!(hub.status(), DeploymentStatus::OtaInProgress(Some(OtaStep::Fetch)));
    assert_eq!(hub.inputs().readiness, ReadinessState::Passed);
}
