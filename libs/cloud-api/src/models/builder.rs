//! Build service models

use serde::{Deserialize, Serialize};

/// Remote compilation status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompilationStatus {
    Created,
    Running,
    Cancelled,
    Failed,
    Completed,
}

impl CompilationStatus {
    /// Whether a compilation in this status can never produce a usable binary
    pub fn is_dead(&self) -> bool {
        matches!(self, CompilationStatus::Cancelled | CompilationStatus::Failed)
    }
}

/// Create compilation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCompilationRequest {
    pub fqbn: String,
    pub sketch_id: String,
    pub sketch_name: String,
    #[serde(default)]
    pub verbose: bool,
    #[serde(default)]
    pub ota: bool,
}

/// A compilation record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Compilation {
    pub id: String,
    pub status: CompilationStatus,
    #[serde(default)]
    pub fqbn: Option<String>,
    #[serde(default)]
    pub sketch_name: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// Extra file produced next to the main binary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtraFile {
    pub name: String,
    #[serde(default)]
    pub data: Option<String>,
}

/// Compiled artifacts of a completed compilation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompilationOutput {
    pub name: String,
    #[serde(default)]
    pub bin: Option<String>,
    #[serde(default)]
    pub hex: Option<String>,
    #[serde(default)]
    pub elf: Option<String>,
    #[serde(default)]
    pub ota_key: Option<String>,
    #[serde(default, alias = "files")]
    pub extra_files: Vec<ExtraFile>,
}

/// Upload tool descriptor returned by the compute endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputeTool {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub packager: Option<String>,
}

/// Upload command computed for a board
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComputeResponse {
    pub commandline: String,
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub options: serde_json::Value,
    #[serde(default)]
    pub tools: Vec<ComputeTool>,
    #[serde(default)]
    pub files: Vec<ExtraFile>,
}

/// `stdout` / `stderr` event payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinesEvent {
    #[serde(default)]
    pub timestamp: Option<String>,
    pub lines: String,
}

/// `status` event payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEvent {
    pub status: String,
}

/// `progress` event payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub progress: f64,
}

/// Structured compiler diagnostic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub file: String,
    pub message: String,
    #[serde(default)]
    pub line: Option<u32>,
    #[serde(default)]
    pub column: Option<u32>,
    #[serde(default)]
    pub severity: Option<String>,
}

/// `result` event payload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultEvent {
    #[serde(default)]
    pub status: Option<CompilationStatus>,
    #[serde(default)]
    pub diagnostics: Option<Vec<Diagnostic>>,
    #[serde(default)]
    pub error: Option<String>,
}
