//! OTA session lifecycle against the OTA and IoT services

use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use cloud_api::{Ota, ThingDevice};
use tracing::{debug, error, info, warn};

use crate::console::ResponseStream;
use crate::errors::OrchestratorError;
use crate::http::iot::IotService;
use crate::http::ota::{OtaService, SortOrder};
use crate::notify::{EventBus, Notification};
use crate::ota::fsm::{NotReadyReason, OtaEvent, OtaFsm, OtaPhase, OtaSession};
use crate::ota::progress::{failure_message, OtaProgressLog};
use crate::status::StatusHub;

pub const READY_MESSAGE: &str = "Over-The-Air upload available, compiling...";
pub const REQUEST_CREATED_MESSAGE: &str = "Over-The-Air upload request created...";
pub const REQUEST_FAILED_MESSAGE: &str = "Over-The-Air upload request was unsuccessful";
pub const READINESS_UNKNOWN_MESSAGE: &str = "Could not determine device readiness for Over-The-Air upload";

/// Outcome of an abort request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortOutcome {
    Aborted,
    /// The OTA already left the pending state
    AlreadyProgressed,
    NothingToAbort,
}

fn compare_versions(installed: &str, required: &str) -> CmpOrdering {
    let parse = |v: &str| -> Vec<u64> {
        v.trim_start_matches('v')
            .split('.')
            .map(|part| part.parse().unwrap_or(0))
            .collect()
    };
    let (a, b) = (parse(installed), parse(required));
    for i in 0..a.len().max(b.len()) {
        let ordering = a.get(i).unwrap_or(&0).cmp(b.get(i).unwrap_or(&0));
        if ordering != CmpOrdering::Equal {
            return ordering;
        }
    }
    CmpOrdering::Equal
}

/// Why the device bound to a thing cannot take an OTA update, if it cannot
pub fn evaluate_readiness(device: &ThingDevice, device_id: &str) -> Option<NotReadyReason> {
    if let (Some(installed), Some(required)) = (&device.wifi_fw_version, &device.required_wifi_fw_version) {
        if compare_versions(installed, required) == CmpOrdering::Less {
            return Some(NotReadyReason::UpdateRequired);
        }
    }
    if device.id != device_id {
        return Some(NotReadyReason::WrongDevice);
    }
    if !device.ota_compatible {
        return Some(NotReadyReason::OtaIncompatible);
    }
    if !device.ota_available {
        return Some(NotReadyReason::OtaUnavailable);
    }
    None
}

/// Drives one OTA session at a time
pub struct OtaSessionManager {
    ota: Arc<dyn OtaService>,
    iot: Arc<dyn IotService>,
    events: EventBus,
    console: ResponseStream,
    status: StatusHub,
    fsm: Mutex<OtaFsm>,
    log: Mutex<OtaProgressLog>,
    aborting: AtomicBool,
}

impl OtaSessionManager {
    pub fn new(
        ota: Arc<dyn OtaService>,
        iot: Arc<dyn IotService>,
        events: EventBus,
        console: ResponseStream,
        status: StatusHub,
    ) -> Self {
        Self {
            ota,
            iot,
            events,
            console,
            status,
            fsm: Mutex::new(OtaFsm::new()),
            log: Mutex::new(OtaProgressLog::new()),
            aborting: AtomicBool::new(false),
        }
    }

    fn lock_fsm(&self) -> Result<MutexGuard<'_, OtaFsm>, OrchestratorError> {
        self.fsm
            .lock()
            .map_err(|e| OrchestratorError::Internal(e.to_string()))
    }

    fn lock_log(&self) -> Result<MutexGuard<'_, OtaProgressLog>, OrchestratorError> {
        self.log
            .lock()
            .map_err(|e| OrchestratorError::Internal(e.to_string()))
    }

    /// Apply an event and publish the resulting phase
    fn apply(&self, event: OtaEvent) -> Result<OtaPhase, OrchestratorError> {
        let phase = {
            let mut fsm = self.lock_fsm()?;
            fsm.process(event).map_err(OrchestratorError::InvalidTransition)?;
            fsm.phase().clone()
        };
        let published = phase.clone();
        self.status.update(|inputs| inputs.ota = published);
        Ok(phase)
    }

    pub fn phase(&self) -> OtaPhase {
        self.lock_fsm()
            .map(|fsm| fsm.phase().clone())
            .unwrap_or_default()
    }

    pub fn session(&self) -> Option<OtaSession> {
        self.lock_fsm().ok().and_then(|fsm| fsm.session().cloned())
    }

    pub fn is_aborting(&self) -> bool {
        self.aborting.load(Ordering::SeqCst)
    }

    /// Forget the current session
    pub fn reset(&self) -> Result<(), OrchestratorError> {
        self.lock_log()?.reset();
        self.apply(OtaEvent::Reset)?;
        Ok(())
    }

    /// Check that the thing's device can take an OTA update
    pub async fn check_readiness(
        &self,
        thing_id: &str,
        device_id: &str,
    ) -> Result<OtaPhase, OrchestratorError> {
        self.reset()?;

        let device = match self.iot.thing_device(thing_id).await {
            Ok(device) => device,
            Err(e) => {
                warn!("Unable to read device of thing {}: {}", thing_id, e);
                self.console.publish(READINESS_UNKNOWN_MESSAGE);
                self.events.notify(Notification::OtaReadinessUnknown);
                return Err(e);
            }
        };

        match evaluate_readiness(&device, device_id) {
            Some(reason) => {
                info!("Device {} not ready for OTA: {:?}", device_id, reason);
                self.events.notify(Notification::OtaNotReady {
                    message: reason.message().to_string(),
                });
                self.apply(OtaEvent::ReadinessDenied(reason))
            }
            None => self.apply(OtaEvent::ReadinessConfirmed),
        }
    }

    pub fn begin_compile(&self) -> Result<(), OrchestratorError> {
        self.apply(OtaEvent::CompileStarted)?;
        Ok(())
    }

    /// The compilation produced nothing to send
    pub fn abandon_compile(&self) -> Result<(), OrchestratorError> {
        if self.phase() == OtaPhase::Compiling {
            self.apply(OtaEvent::CompileAbandoned)?;
        }
        Ok(())
    }

    /// Request an OTA. A conflict adopts the device's latest OTA instead.
    pub async fn create(&self, device_id: &str, binary_key: &str) -> Result<OtaSession, OrchestratorError> {
        self.lock_log()?.reset();

        let ota = match self.ota.create_ota(device_id, binary_key).await {
            Ok(ota) => {
                info!("OTA {} requested for device {}", ota.id, device_id);
                ota
            }
            Err(e) if e.is_conflict() => {
                info!("OTA already running on device {}, adopting it", device_id);
                match self.latest(device_id).await {
                    Ok(Some(ota)) => ota,
                    Ok(None) => return Err(self.fail_create(e)),
                    Err(list_err) => {
                        warn!("Unable to list OTAs for device {}: {}", device_id, list_err);
                        return Err(self.fail_create(e));
                    }
                }
            }
            Err(e) => return Err(self.fail_create(e)),
        };

        self.console.publish(REQUEST_CREATED_MESSAGE);
        self.apply(OtaEvent::Created {
            id: ota.id.clone(),
            device_id: device_id.to_string(),
            status: ota.status,
        })?;
        self.session()
            .ok_or_else(|| OrchestratorError::Internal("OTA session missing after creation".to_string()))
    }

    fn fail_create(&self, err: OrchestratorError) -> OrchestratorError {
        error!("OTA request failed: {}", err);
        self.console.publish(REQUEST_FAILED_MESSAGE);
        self.events.notify(Notification::OtaRequestFailed {
            message: err.to_string(),
        });
        if let Err(e) = self.apply(OtaEvent::CreateFailed(err.to_string())) {
            warn!("{}", e);
        }
        err
    }

    async fn latest(&self, device_id: &str) -> Result<Option<Ota>, OrchestratorError> {
        let list = self.ota.list_device_ota(device_id, 1, SortOrder::Desc).await?;
        Ok(list.into_iter().next())
    }

    /// Fetch the OTA once, log new progress and advance the phase
    pub async fn refresh(&self, ota_id: &str) -> Result<OtaPhase, OrchestratorError> {
        let data = self.ota.show_ota(ota_id, true).await?;

        let update = self.lock_log()?.ingest(&data);
        for line in &update.lines {
            self.console.publish(line);
        }

        let was_failed = matches!(self.phase(), OtaPhase::Failed { .. });
        let phase = self.apply(OtaEvent::Polled {
            status: data.ota.status,
            step: update.step,
            progress: update.progress,
            error_reason: data.ota.error_reason.clone(),
        })?;

        if let OtaPhase::Failed { reason } = &phase {
            if !was_failed {
                let message = match (&update.managed_error, reason) {
                    (Some(managed), _) => failure_message(managed),
                    (None, Some(reason)) => failure_message(reason),
                    (None, None) => "Upload Over-The-Air failed".to_string(),
                };
                self.events.notify(Notification::OtaFailed { message });
            }
        }
        debug!("OTA {} phase: {:?}", ota_id, phase);
        Ok(phase)
    }

    /// Abort the current OTA while it is still pending
    pub async fn abort_pending(&self) -> Result<AbortOutcome, OrchestratorError> {
        let Some(session) = self.session() else {
            return Ok(AbortOutcome::NothingToAbort);
        };
        if !self.phase().is_uploading() {
            return Ok(AbortOutcome::NothingToAbort);
        }

        self.aborting.store(true, Ordering::SeqCst);
        let result = self.ota.cancel_ota(&session.id).await;
        self.aborting.store(false, Ordering::SeqCst);

        match result {
            // a poll already in flight may have observed the cancellation first
            Ok(()) if self.phase() == OtaPhase::Aborted => {
                info!("OTA {} aborted", session.id);
                Ok(AbortOutcome::Aborted)
            }
            Ok(()) => {
                info!("OTA {} aborted", session.id);
                self.console.publish(crate::ota::progress::ABORTED_MESSAGE);
                self.apply(OtaEvent::Aborted)?;
                Ok(AbortOutcome::Aborted)
            }
            Err(e) if e.is_conflict() => {
                info!("OTA {} can no longer be interrupted", session.id);
                self.events.notify(Notification::OtaCouldNotInterrupt);
                Ok(AbortOutcome::AlreadyProgressed)
            }
            Err(e) => {
                error!("Unable to abort OTA {}: {}", session.id, e);
                self.events.notify(Notification::OtaAbortFailed {
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Adopt the device's latest OTA if it is still running
    pub async fn resume_ongoing(&self, device_id: &str) -> Result<Option<OtaSession>, OrchestratorError> {
        let Some(ota) = self.latest(device_id).await? else {
            return Ok(None);
        };
        if !ota.status.is_ongoing() {
            debug!("Latest OTA {} for device {} is {:?}", ota.id, device_id, ota.status);
            return Ok(None);
        }

        info!("Resuming OTA {} on device {}", ota.id, device_id);
        self.lock_log()?.reset();
        self.apply(OtaEvent::Adopted {
            id: ota.id,
            device_id: device_id.to_string(),
            status: ota.status,
        })?;
        Ok(self.session())
    }
}
