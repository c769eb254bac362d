//! API models

pub mod builder;
pub mod iot;
pub mod ota;

pub use builder::*;
pub use iot::*;
pub use ota::*;

use serde::{Deserialize, Serialize};

/// Error response returned by every cloud service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub details: Option<serde_json::Value>,
}
