//! Polling worker for an OTA session

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ota::fsm::OtaPhase;
use crate::ota::session::OtaSessionManager;

/// OTA poller options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Options {
    /// Interval while the OTA is pending
    #[serde(default = "default_pending_interval_ms")]
    pub pending_interval_ms: u64,

    /// Interval once the board started working on it
    #[serde(default = "default_in_progress_interval_ms")]
    pub in_progress_interval_ms: u64,
}

fn default_pending_interval_ms() -> u64 {
    1000
}

fn default_in_progress_interval_ms() -> u64 {
    1500
}

impl Default for Options {
    fn default() -> Self {
        Self {
            pending_interval_ms: default_pending_interval_ms(),
            in_progress_interval_ms: default_in_progress_interval_ms(),
        }
    }
}

impl Options {
    pub fn interval_for(&self, phase: &OtaPhase) -> Duration {
        match phase {
            OtaPhase::Pending => Duration::from_millis(self.pending_interval_ms),
            _ => Duration::from_millis(self.in_progress_interval_ms),
        }
    }
}

/// Poll the OTA until it leaves the uploading phases or `cancel` fires.
///
/// The first fetch is immediate. Each sleep uses the cadence of the latest
/// known phase, so a status change takes effect on the next tick. Fetch
/// errors are logged and retried.
pub async fn run<S, F>(
    options: &Options,
    manager: &OtaSessionManager,
    ota_id: &str,
    sleep_fn: S,
    cancel: &CancellationToken,
) -> OtaPhase
where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("OTA poller starting for {}", ota_id);

    loop {
        if cancel.is_cancelled() {
            info!("OTA poller for {} cancelled", ota_id);
            break;
        }

        let phase = manager.phase();
        if !phase.is_uploading() {
            break;
        }

        if manager.is_aborting() {
            debug!("Abort in flight, skipping poll of {}", ota_id);
        } else if let Err(e) = manager.refresh(ota_id).await {
            warn!("OTA poll for {} failed: {}", ota_id, e);
        }

        let phase = manager.phase();
        if !phase.is_uploading() {
            break;
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                info!("OTA poller for {} cancelled", ota_id);
                break;
            }
            _ = sleep_fn(options.interval_for(&phase)) => {}
        }
    }

    let phase = manager.phase();
    info!("OTA poller for {} stopped: {:?}", ota_id, phase);
    phase
}
