//! Compile output stream: SSE decoding and frame consumption

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use cloud_api::{CompilationStatus, Diagnostic, LinesEvent, ProgressEvent, ResultEvent, StatusEvent};
use futures::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::compile::artifact::{BuildArtifact, PreCompileOutput};
use crate::compile::job::CompileJob;
use crate::console::ResponseStream;
use crate::errors::OrchestratorError;
use crate::http::builder::BuildService;

const FRAME_CHANNEL_CAPACITY: usize = 256;

/// One typed frame of the compile stream
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    Stdout(String),
    Stderr(String),
    Status(String),
    /// Percentage, floored
    Progress(u8),
    Result {
        diagnostics: Option<Vec<Diagnostic>>,
        builder_error: Option<String>,
    },
    Error(String),
}

/// Convert one server-sent event into a frame
pub fn parse_frame(event: &str, data: &str) -> Result<StreamFrame, OrchestratorError> {
    match event {
        "stdout" => Ok(StreamFrame::Stdout(serde_json::from_str::<LinesEvent>(data)?.lines)),
        "stderr" => Ok(StreamFrame::Stderr(serde_json::from_str::<LinesEvent>(data)?.lines)),
        "status" => Ok(StreamFrame::Status(serde_json::from_str::<StatusEvent>(data)?.status)),
        "progress" => {
            let progress = serde_json::from_str::<ProgressEvent>(data)?.progress;
            Ok(StreamFrame::Progress(progress.floor().clamp(0.0, 100.0) as u8))
        }
        "result" => {
            let result: ResultEvent = serde_json::from_str(data)?;
            let failed = result.status == Some(CompilationStatus::Failed);
            let diagnostics = match (result.diagnostics, failed) {
                (Some(diagnostics), _) => Some(diagnostics),
                (None, true) => Some(vec![Diagnostic {
                    file: String::new(),
                    message: result.error.clone().unwrap_or_else(|| "Unknown error".to_string()),
                    line: None,
                    column: None,
                    severity: None,
                }]),
                (None, false) => None,
            };
            Ok(StreamFrame::Result {
                diagnostics,
                builder_error: if failed { result.error } else { None },
            })
        }
        "error" => Ok(StreamFrame::Error(data.to_string())),
        other => Err(OrchestratorError::StreamError(format!("unknown event {other:?}"))),
    }
}

/// A complete server-sent event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

/// Incremental decoder for `text/event-stream` bodies
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

fn strip_sse_data_prefix(line: &str) -> Option<&str> {
    if let Some(data) = line.strip_prefix("data: ") {
        return Some(data);
    }
    line.strip_prefix("data:")
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes, returning every event completed by them
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw[..raw.len() - 1]);
            let line = line.trim_end_matches('\r');

            if line.is_empty() {
                if let Some(event) = self.dispatch() {
                    events.push(event);
                }
            } else if line.starts_with(':') {
                // comment / keep-alive
            } else if let Some(name) = line.strip_prefix("event:") {
                self.event = Some(name.trim().to_string());
            } else if let Some(data) = strip_sse_data_prefix(line) {
                self.data.push(data.to_string());
            }
        }
        events
    }

    /// Flush an event left unterminated at end of stream
    pub fn finish(&mut self) -> Option<SseEvent> {
        if !self.buffer.is_empty() {
            self.push(b"\n");
        }
        self.dispatch()
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent {
            event: event.unwrap_or_else(|| "message".to_string()),
            data,
        })
    }
}

/// Decode an SSE response body into a frame channel.
///
/// Malformed events are logged and skipped. A transport error is delivered as
/// a final `StreamFrame::Error`.
pub fn frames_from_response(response: reqwest::Response) -> mpsc::Receiver<StreamFrame> {
    let (tx, rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);

    tokio::spawn(async move {
        let mut body = response.bytes_stream();
        let mut decoder = SseDecoder::new();

        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    let _ = tx.send(StreamFrame::Error(e.to_string())).await;
                    return;
                }
            };
            for event in decoder.push(&chunk) {
                if !forward(&tx, &event).await {
                    return;
                }
            }
        }
        if let Some(event) = decoder.finish() {
            forward(&tx, &event).await;
        }
    });

    rx
}

async fn forward(tx: &mpsc::Sender<StreamFrame>, event: &SseEvent) -> bool {
    match parse_frame(&event.event, &event.data) {
        Ok(frame) => tx.send(frame).await.is_ok(),
        Err(e) => {
            warn!("Skipping malformed {} frame: {}", event.event, e);
            true
        }
    }
}

/// How a stream consumption ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEnd {
    /// A result frame arrived
    Settled,
    /// The stream closed without a result
    Closed,
    Errored(String),
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct StreamOutcome {
    pub end: StreamEnd,
    pub artifact: BuildArtifact,
}

/// Consumes the push stream of a compile job into a `BuildArtifact`
pub struct StreamConsumer {
    builder: Arc<dyn BuildService>,
    open: Arc<Mutex<HashSet<String>>>,
}

struct OpenStreamGuard {
    open: Arc<Mutex<HashSet<String>>>,
    id: String,
}

impl Drop for OpenStreamGuard {
    fn drop(&mut self) {
        if let Ok(mut open) = self.open.lock() {
            open.remove(&self.id);
        }
    }
}

impl StreamConsumer {
    pub fn new(builder: Arc<dyn BuildService>) -> Self {
        Self {
            builder,
            open: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    fn claim(&self, id: &str) -> Result<OpenStreamGuard, OrchestratorError> {
        let mut open = self
            .open
            .lock()
            .map_err(|e| OrchestratorError::Internal(e.to_string()))?;
        if !open.insert(id.to_string()) {
            return Err(OrchestratorError::StreamError(format!(
                "a stream is already open for compilation {id}"
            )));
        }
        Ok(OpenStreamGuard {
            open: self.open.clone(),
            id: id.to_string(),
        })
    }

    /// Consume the job's stream until it settles, closes, errors or is cancelled.
    ///
    /// Every frame is folded into the artifact published on `artifact_tx`, and
    /// output lines are mirrored to the console.
    pub async fn consume(
        &self,
        job: &CompileJob,
        pre_compile: Option<PreCompileOutput>,
        artifact_tx: &watch::Sender<BuildArtifact>,
        console: &ResponseStream,
        cancel: &CancellationToken,
    ) -> Result<StreamOutcome, OrchestratorError> {
        let _guard = self.claim(&job.id)?;

        info!("Opening compile stream for {}", job.id);
        let mut frames = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Ok(StreamOutcome { end: StreamEnd::Cancelled, artifact: artifact_tx.borrow().clone() });
            }
            frames = self.builder.open_stream(&job.id) => frames?,
        };
        artifact_tx.send_replace(
            BuildArtifact::new(pre_compile).with_secrets_include(job.secrets_include_injected),
        );

        let end = loop {
            let frame = tokio::select! {
                biased;
                _ = cancel.cancelled() => break StreamEnd::Cancelled,
                frame = frames.recv() => frame,
            };

            let Some(frame) = frame else {
                warn!("Compile stream for {} closed without a result", job.id);
                break StreamEnd::Closed;
            };

            match &frame {
                StreamFrame::Error(msg) => {
                    warn!("Compile stream for {} errored: {}", job.id, msg);
                    break StreamEnd::Errored(msg.clone());
                }
                StreamFrame::Stdout(lines) | StreamFrame::Stderr(lines) => console.publish(lines),
                StreamFrame::Status(status) => debug!("Compilation {} status: {}", job.id, status),
                _ => {}
            }

            artifact_tx.send_modify(|artifact| artifact.apply(&frame, &job.sketch_name));

            if matches!(frame, StreamFrame::Result { .. }) {
                break StreamEnd::Settled;
            }
        };

        info!("Compile stream for {} ended: {:?}", job.id, end);
        Ok(StreamOutcome {
            end,
            artifact: artifact_tx.borrow().clone(),
        })
    }
}
