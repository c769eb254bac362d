//! Deploy request inputs

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Board and device a sketch is deployed to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentTarget {
    pub fqbn: String,
    #[serde(default)]
    pub port: Option<String>,
    #[serde(default)]
    pub board_type: Option<String>,
    #[serde(default)]
    pub is_iot: bool,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub thing_id: Option<String>,
    /// Thing properties file, relative to the sketch directory
    #[serde(default)]
    pub properties_path: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SketchRef {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// The main `.ino` was sent with an extra first line including the secrets header
    #[serde(default)]
    pub secrets_include_injected: bool,
}

/// A verify or upload request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployRequest {
    pub target: DeploymentTarget,
    pub sketch: SketchRef,
    #[serde(default)]
    pub verbose: bool,
}
