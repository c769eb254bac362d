//! OTA session state machine

use cloud_api::{OtaStatus, OtaStep, CANCELED_BY_USER};
use serde::Serialize;

/// Why a device cannot take an OTA update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotReadyReason {
    /// The network module firmware is too old
    UpdateRequired,
    /// The thing is bound to another device
    WrongDevice,
    OtaIncompatible,
    OtaUnavailable,
}

impl NotReadyReason {
    pub fn message(&self) -> &'static str {
        match self {
            NotReadyReason::UpdateRequired => {
                "Upload unavailable. To upload an IoT Cloud sketch, update the NINA firmware to the latest version."
            }
            NotReadyReason::WrongDevice => {
                "Upload unavailable. The Thing associated with this sketch is not associated with the selected device"
            }
            NotReadyReason::OtaIncompatible => {
                "Upload Over-The-Air is not supported by this device. Please connect the device via USB."
            }
            NotReadyReason::OtaUnavailable => {
                "Upload Over-The-Air unavailable. Your device firmware may need updating, or there may be a problem with the sketch running on the device"
            }
        }
    }
}

/// OTA phase
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum OtaPhase {
    #[default]
    ReadinessUnknown,
    NotReady { reason: NotReadyReason },
    Ready,
    Compiling,
    Pending,
    InProgress { step: Option<OtaStep> },
    Succeeded,
    Failed { reason: Option<String> },
    Aborted,
}

impl OtaPhase {
    /// Phase for a status reported by the OTA service
    pub fn from_remote(status: OtaStatus, step: Option<OtaStep>, error_reason: Option<&str>) -> Self {
        match status {
            OtaStatus::Pending => OtaPhase::Pending,
            OtaStatus::InProgress => OtaPhase::InProgress { step },
            OtaStatus::Succeeded => OtaPhase::Succeeded,
            OtaStatus::Failed if error_reason == Some(CANCELED_BY_USER) => OtaPhase::Aborted,
            OtaStatus::Failed => OtaPhase::Failed {
                reason: error_reason.map(str::to_string),
            },
        }
    }

    /// A remote operation exists and has not finished
    pub fn is_uploading(&self) -> bool {
        matches!(self, OtaPhase::Pending | OtaPhase::InProgress { .. })
    }

    pub fn is_active(&self) -> bool {
        matches!(self, OtaPhase::Compiling) || self.is_uploading()
    }

    pub fn is_error(&self) -> bool {
        matches!(self, OtaPhase::NotReady { .. } | OtaPhase::Failed { .. })
    }

    /// An OTA request may be issued: readiness passed, or the binary comes
    /// from a resumed compilation
    fn accepts_request(&self) -> bool {
        matches!(self, OtaPhase::ReadinessUnknown | OtaPhase::Ready | OtaPhase::Compiling)
    }
}

/// OTA event
#[derive(Debug, Clone)]
pub enum OtaEvent {
    ReadinessConfirmed,
    ReadinessDenied(NotReadyReason),
    CompileStarted,
    /// The compilation ended without a binary to send
    CompileAbandoned,
    /// An OTA was created for this flow, or adopted after a conflict
    Created {
        id: String,
        device_id: String,
        status: OtaStatus,
    },
    /// An ongoing OTA found at startup
    Adopted {
        id: String,
        device_id: String,
        status: OtaStatus,
    },
    CreateFailed(String),
    Polled {
        status: OtaStatus,
        step: Option<OtaStep>,
        progress: Option<u8>,
        error_reason: Option<String>,
    },
    Aborted,
    Reset,
}

/// The remote OTA operation tracked by the session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OtaSession {
    pub id: String,
    pub device_id: String,
    pub phase: OtaPhase,
    pub step: Option<OtaStep>,
    pub progress: u8,
    pub error_reason: Option<String>,
}

/// OTA FSM
#[derive(Debug, Clone, Default)]
pub struct OtaFsm {
    phase: OtaPhase,
    session: Option<OtaSession>,
}

impl OtaFsm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> &OtaPhase {
        &self.phase
    }

    pub fn session(&self) -> Option<&OtaSession> {
        self.session.as_ref()
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: OtaEvent) -> Result<(), String> {
        let new_phase = match (&self.phase, &event) {
            (OtaPhase::ReadinessUnknown, OtaEvent::ReadinessConfirmed) => OtaPhase::Ready,
            (OtaPhase::ReadinessUnknown, OtaEvent::ReadinessDenied(reason)) => {
                OtaPhase::NotReady { reason: *reason }
            }

            (OtaPhase::Ready, OtaEvent::CompileStarted) => OtaPhase::Compiling,
            (OtaPhase::Compiling, OtaEvent::CompileAbandoned) => OtaPhase::Ready,

            (phase, OtaEvent::Created { id, device_id, status }) if phase.accepts_request() => {
                self.session = Some(OtaSession::new(id, device_id, *status));
                OtaPhase::from_remote(*status, None, None)
            }
            (phase, OtaEvent::Adopted { id, device_id, status }) if !phase.is_active() => {
                self.session = Some(OtaSession::new(id, device_id, *status));
                OtaPhase::from_remote(*status, None, None)
            }
            (phase, OtaEvent::CreateFailed(err)) if phase.accepts_request() => OtaPhase::Failed {
                reason: Some(err.clone()),
            },

            (
                phase,
                OtaEvent::Polled {
                    status,
                    step,
                    progress,
                    error_reason,
                },
            ) if phase.is_uploading() => {
                let next = OtaPhase::from_remote(*status, *step, error_reason.as_deref());
                if let Some(session) = self.session.as_mut() {
                    session.step = step.or(session.step);
                    if let Some(progress) = progress {
                        session.progress = *progress;
                    }
                    session.error_reason = error_reason.clone();
                }
                next
            }

            (phase, OtaEvent::Aborted) if phase.is_uploading() => OtaPhase::Aborted,

            (_, OtaEvent::Reset) => {
                self.session = None;
                OtaPhase::ReadinessUnknown
            }

            (phase, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", phase, event));
            }
        };

        if let Some(session) = self.session.as_mut() {
            session.phase = new_phase.clone();
        }
        self.phase = new_phase;
        Ok(())
    }
}

impl OtaSession {
    fn new(id: &str, device_id: &str, status: OtaStatus) -> Self {
        Self {
            id: id.to_string(),
            device_id: device_id.to_string(),
            phase: OtaPhase::from_remote(status, None, None),
            step: None,
            progress: 0,
            error_reason: None,
        }
    }
}
