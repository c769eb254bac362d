//! Reconnection probe after a board-level restart

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::OrchestratorError;
use crate::http::agent::AgentService;

/// Reconnect probe options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Options {
    /// Delay before the first probe
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Number of version probes
    #[serde(default = "default_attempts")]
    pub attempts: u32,

    /// Delay between probes
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Business rule: when every probe fails the upload is reported as
    /// succeeded. When disabled, exhaustion is an upload error.
    #[serde(default = "default_true")]
    pub assume_success_on_exhaustion: bool,
}

fn default_initial_delay_ms() -> u64 {
    5000
}

fn default_attempts() -> u32 {
    10
}

fn default_interval_ms() -> u64 {
    1500
}

fn default_true() -> bool {
    true
}

impl Default for Options {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            attempts: default_attempts(),
            interval_ms: default_interval_ms(),
            assume_success_on_exhaustion: true,
        }
    }
}

impl Options {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Result of the reconnection probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconnectOutcome {
    /// The agent answered on the given attempt (1-based)
    Reconnected { attempt: u32, version: String },
    /// Every probe failed and the configured business rule assumes success
    AssumedSuccess,
    /// Every probe failed
    Exhausted,
}

/// Wait for the local agent to answer its version endpoint again
pub async fn await_reconnection<S, F>(
    options: &Options,
    agent: &dyn AgentService,
    sleep_fn: S,
    cancel: &CancellationToken,
) -> Result<ReconnectOutcome, OrchestratorError>
where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Waiting for the agent to reconnect...");

    tokio::select! {
        _ = cancel.cancelled() => return Err(OrchestratorError::Cancelled),
        _ = sleep_fn(options.initial_delay()) => {}
    }

    for attempt in 1..=options.attempts {
        match agent.version().await {
            Ok(version) => {
                info!("Agent reconnected on attempt {} (version {})", attempt, version);
                return Ok(ReconnectOutcome::Reconnected { attempt, version });
            }
            Err(e) => debug!("Reconnect attempt {} failed: {}", attempt, e),
        }

        if attempt < options.attempts {
            tokio::select! {
                _ = cancel.cancelled() => return Err(OrchestratorError::Cancelled),
                _ = sleep_fn(options.interval()) => {}
            }
        }
    }

    if options.assume_success_on_exhaustion {
        warn!(
            "Agent did not reconnect after {} attempts, assuming the deployment succeeded",
            options.attempts
        );
        Ok(ReconnectOutcome::AssumedSuccess)
    } else {
        warn!("Agent did not reconnect after {} attempts", options.attempts);
        Ok(ReconnectOutcome::Exhausted)
    }
}
