//! Upload through a serial bridge reached over WebSocket

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use cloud_api::ExtraFile;

use crate::console::ResponseStream;
use crate::errors::OrchestratorError;
use crate::transport::{UploadOutcome, UploadPayload, Uploader};

/// Upload command sent to the bridge
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename = "upload")]
struct UploadCommand<'a> {
    port: &'a str,
    fqbn: &'a str,
    commandline: &'a str,
    signature: Option<&'a str>,
    filename: String,
    data: String,
    extra_files: &'a [ExtraFile],
    verbose: bool,
}

/// Message received from the bridge
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeMessage {
    Output { line: String },
    Success,
    Error { message: String },
}

pub fn parse_bridge_message(text: &str) -> Result<BridgeMessage, OrchestratorError> {
    Ok(serde_json::from_str(text)?)
}

/// Serial upload for hosts without the local agent
pub struct BrowserSerialUploader {
    bridge_url: Url,
}

impl BrowserSerialUploader {
    pub fn new(bridge_url: &str) -> Result<Self, OrchestratorError> {
        let bridge_url = Url::parse(bridge_url)
            .map_err(|e| OrchestratorError::ConfigError(format!("invalid serial bridge URL: {e}")))?;
        Ok(Self { bridge_url })
    }
}

#[async_trait]
impl Uploader for BrowserSerialUploader {
    fn name(&self) -> &'static str {
        "serial_bridge"
    }

    async fn upload(
        &self,
        payload: &UploadPayload,
        console: &ResponseStream,
        cancel: &CancellationToken,
    ) -> Result<UploadOutcome, OrchestratorError> {
        let (filename, data) = payload.binary()?;

        let mut request = self
            .bridge_url
            .as_str()
            .into_client_request()
            .map_err(|e| OrchestratorError::WebSocketError(e.to_string()))?;
        request.headers_mut().insert(
            http::header::USER_AGENT,
            http::HeaderValue::from_static("sketchdeploy"),
        );

        info!("Connecting to serial bridge: {}", self.bridge_url);
        let (mut ws_stream, _) = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(OrchestratorError::Cancelled),
            connection = connect_async(request) => {
                connection.map_err(|e| OrchestratorError::WebSocketError(e.to_string()))?
            }
        };

        let command = UploadCommand {
            port: &payload.port,
            fqbn: &payload.fqbn,
            commandline: &payload.compute.commandline,
            signature: payload.compute.signature.as_deref(),
            filename,
            data,
            extra_files: &payload.compile_data.extra_files,
            verbose: payload.verbose,
        };
        let text = serde_json::to_string(&command)?;
        ws_stream
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| OrchestratorError::WebSocketError(e.to_string()))?;
        console.publish(&format!("Uploading {} to {}...", payload.sketch_name, payload.port));

        loop {
            let msg = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    let _ = ws_stream.close(None).await;
                    return Err(OrchestratorError::Cancelled);
                }
                msg = ws_stream.next() => msg,
            };

            match msg {
                Some(Ok(Message::Text(text))) => match parse_bridge_message(&text) {
                    Ok(BridgeMessage::Output { line }) => console.publish(&line),
                    Ok(BridgeMessage::Success) => {
                        console.publish("Upload complete.");
                        let _ = ws_stream.close(None).await;
                        return Ok(UploadOutcome::Success);
                    }
                    Ok(BridgeMessage::Error { message }) => {
                        let _ = ws_stream.close(None).await;
                        return Err(OrchestratorError::UploadError(message));
                    }
                    Err(e) => warn!("Skipping malformed bridge message: {}", e),
                },
                Some(Ok(Message::Close(_))) | None => {
                    return Err(OrchestratorError::UploadError(
                        "serial bridge closed before the upload finished".to_string(),
                    ));
                }
                Some(Err(e)) => return Err(OrchestratorError::WebSocketError(e.to_string())),
                Some(Ok(other)) => debug!("Ignoring bridge frame: {:?}", other),
            }
        }
    }
}
