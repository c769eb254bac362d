//! User-facing notifications and analytics events

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

/// A user-facing notification. Every terminal failure produces exactly one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    CompileFailed { message: String },
    CompileOutputUnavailable { message: String },
    StreamFailed { message: String },
    VerifyInterrupted,
    VerifyNotInterrupted { message: String },
    IncompleteTarget { missing: String },
    UploadFailed { message: String },
    CertCheckFailed { message: String },
    CertNotRefreshed,
    OtaNotReady { message: String },
    OtaReadinessUnknown,
    OtaRequestFailed { message: String },
    OtaFailed { message: String },
    OtaCouldNotInterrupt,
    OtaAbortFailed { message: String },
}

/// Analytics outcome codes
pub const ERROR_CODE_UPLOAD_FAILED: &str = "C2";
pub const ERROR_CODE_ABORTED: &str = "C3";

/// An analytics event describing the outcome of a verify or upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalyticsEvent {
    pub action: String,
    pub fqbn: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl AnalyticsEvent {
    pub fn success(action: &str, fqbn: &str) -> Self {
        Self {
            action: action.to_string(),
            fqbn: fqbn.to_string(),
            success: true,
            error_code: None,
            error_message: None,
        }
    }

    pub fn failure(action: &str, fqbn: &str, code: &str, message: &str) -> Self {
        Self {
            action: action.to_string(),
            fqbn: fqbn.to_string(),
            success: false,
            error_code: Some(code.to_string()),
            error_message: Some(message.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    Notification(Notification),
    Analytics(AnalyticsEvent),
}

/// Broadcast bus for session events
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn notify(&self, notification: Notification) {
        debug!("Notification: {:?}", notification);
        // no subscribers is fine
        let _ = self.tx.send(SessionEvent::Notification(notification));
    }

    pub fn track(&self, event: AnalyticsEvent) {
        debug!("Analytics: {:?}", event);
        let _ = self.tx.send(SessionEvent::Analytics(event));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}
