//! Push publication of the deployment status

use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;

use crate::status::aggregator::{derive_status, DeploymentStatus, StatusInputs};

/// Holds the subsystem states and republishes the derived status on change
#[derive(Debug, Clone)]
pub struct StatusHub {
    inputs: Arc<watch::Sender<StatusInputs>>,
    status: Arc<watch::Sender<DeploymentStatus>>,
}

impl StatusHub {
    pub fn new() -> Self {
        let (inputs, _) = watch::channel(StatusInputs::default());
        let (status, _) = watch::channel(DeploymentStatus::Idle);
        Self {
            inputs: Arc::new(inputs),
            status: Arc::new(status),
        }
    }

    /// Change the inputs and re-derive the status
    pub fn update<F>(&self, modify: F)
    where
        F: FnOnce(&mut StatusInputs),
    {
        self.inputs.send_modify(|inputs| {
            modify(inputs);
            let derived = derive_status(inputs);
            // derived under the inputs lock so publications keep their order
            self.status.send_if_modified(|current| {
                if *current == derived {
                    return false;
                }
                debug!("Deployment status: {:?} -> {:?}", current, derived);
                *current = derived;
                true
            });
        });
    }

    pub fn subscribe(&self) -> watch::Receiver<DeploymentStatus> {
        self.status.subscribe()
    }

    pub fn status(&self) -> DeploymentStatus {
        *self.status.borrow()
    }

    pub fn inputs(&self) -> StatusInputs {
        self.inputs.borrow().clone()
    }
}

impl Default for StatusHub {
    fn default() -> Self {
        Self::new()
    }
}
