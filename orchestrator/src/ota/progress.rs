//! Console log of OTA progress

use chrono::{DateTime, Utc};
use cloud_api::{is_managed_ota_error, OtaState, OtaStatus, OtaStep, ShowOtaResponse, CANCELED_BY_USER, OTA_TIMEOUT};

pub const PENDING_MESSAGE: &str = "Over-The-Air upload pending...";
pub const COMPLETED_MESSAGE: &str = "Over-The-Air update successfully completed";
pub const ABORTED_MESSAGE: &str = "Upload Over-The-Air aborted";
pub const TIMEOUT_MESSAGE: &str =
    "Timeout expired - Please check the board connection status and try again";

fn step_message(step: OtaStep) -> &'static str {
    match step {
        OtaStep::Available => "Initializing Over-The-Air update...",
        OtaStep::Start => "Starting Over-The-Air update attempt...",
        OtaStep::Fetch => "Uploading binary file to the board: ",
        OtaStep::Flash => "Flashing binary file to the board…",
        OtaStep::Reboot => "Rebooting the device...",
        OtaStep::Fail => "Over-The-Air update failed.",
    }
}

/// User message for an OTA failure reason
pub fn failure_message(reason: &str) -> String {
    match reason {
        CANCELED_BY_USER => ABORTED_MESSAGE.to_string(),
        OTA_TIMEOUT => TIMEOUT_MESSAGE.to_string(),
        "Sha256Mismatch" => {
            "SHA256 mismatch - Unable to apply the new firmware. Previous firmware detected after restart"
                .to_string()
        }
        "Sha256Unknown" => "SHA256 Unknown - Unknown Firmware detected after restart.".to_string(),
        other => format!("Board error received - {other}"),
    }
}

/// Fetched bytes as a floored percentage of the firmware size
pub fn percentage(bytes: u64, firmware_size: Option<u64>) -> u8 {
    match firmware_size {
        Some(size) if size > 0 => (bytes.saturating_mul(100) / size).min(100) as u8,
        _ => 0,
    }
}

fn line(timestamp: Option<&DateTime<Utc>>, message: &str) -> String {
    match timestamp {
        Some(ts) => format!("{} {message}", ts.format("%H:%M:%S")),
        None => message.to_string(),
    }
}

fn fetch_done() -> String {
    format!("{}100%", step_message(OtaStep::Fetch))
}

/// What a new poll result adds to the log
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressUpdate {
    pub lines: Vec<String>,
    pub progress: Option<u8>,
    pub step: Option<OtaStep>,
    /// Failure reason shown to the user by the caller rather than in the log
    pub managed_error: Option<String>,
}

/// Turns successive OTA poll results into console lines, each state once
#[derive(Debug, Clone, Default)]
pub struct OtaProgressLog {
    previous: Option<ShowOtaResponse>,
}

impl OtaProgressLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.previous = None;
    }

    pub fn ingest(&mut self, data: &ShowOtaResponse) -> ProgressUpdate {
        let mut update = ProgressUpdate::default();

        let previous_states: &[OtaState] = self
            .previous
            .as_ref()
            .map(|p| p.states.as_slice())
            .unwrap_or_default();
        let new_states: Vec<&OtaState> = data
            .states
            .iter()
            .filter(|s| !previous_states.iter().any(|p| p.timestamp == s.timestamp))
            .collect();

        let same_status = self.previous.as_ref().map(|p| p.ota.status) == Some(data.ota.status);
        if same_status && new_states.is_empty() {
            return update;
        }

        let final_previous = previous_states.last();

        for state in &new_states {
            let mut message = step_message(state.state).to_string();

            if state.state == OtaStep::Fetch {
                match &state.state_data {
                    Some(bytes) => {
                        let pct = percentage(bytes.parse().unwrap_or(0), data.ota.firmware_size);
                        message.push_str(&format!("{pct}%"));
                        update.progress = Some(pct);
                    }
                    None => {
                        let previous_was_bare_fetch = final_previous
                            .map(|p| p.state == OtaStep::Fetch && p.state_data.is_none())
                            .unwrap_or(false);
                        if !previous_was_bare_fetch {
                            message.push_str("0%");
                            update.progress = Some(0);
                        }
                    }
                }
            }

            if state.state == OtaStep::Flash {
                if let Some(prev) = final_previous {
                    if prev.state == OtaStep::Fetch && prev.state_data.as_deref() != Some("100") {
                        update.lines.push(line(Some(&state.timestamp), &fetch_done()));
                        update.progress = Some(100);
                    }
                }
            }

            update.lines.push(line(Some(&state.timestamp), &message));
        }
        update.step = new_states.last().map(|s| s.state);

        let ota = &data.ota;
        match ota.status {
            OtaStatus::Pending => {
                update.lines.push(line(ota.started_at.as_ref(), PENDING_MESSAGE));
            }
            OtaStatus::InProgress => {}
            OtaStatus::Succeeded => {
                if final_previous.map(|p| p.state) == Some(OtaStep::Fetch) {
                    update.lines.push(line(ota.ended_at.as_ref(), &fetch_done()));
                    update.progress = Some(100);
                }
                update.lines.push(line(ota.ended_at.as_ref(), COMPLETED_MESSAGE));
            }
            OtaStatus::Failed => {
                if let Some(reason) = &ota.error_reason {
                    if is_managed_ota_error(reason) {
                        update.managed_error = Some(reason.clone());
                    } else {
                        update
                            .lines
                            .push(line(ota.ended_at.as_ref(), &failure_message(reason)));
                    }
                }
            }
        }

        self.previous = Some(data.clone());
        update
    }
}
