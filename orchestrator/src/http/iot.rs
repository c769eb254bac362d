//! IoT service API client

use async_trait::async_trait;
use cloud_api::{CertCheckResponse, ThingDevice};

use crate::errors::OrchestratorError;
use crate::http::client::HttpClient;

/// Remote IoT service
#[async_trait]
pub trait IotService: Send + Sync {
    /// Check, and migrate if needed, the certificate of a thing's device
    async fn check_thing_cert(&self, thing_id: &str) -> Result<CertCheckResponse, OrchestratorError>;

    /// Device bound to a thing
    async fn thing_device(&self, thing_id: &str) -> Result<ThingDevice, OrchestratorError>;
}

/// IoT service over HTTP
pub struct IotClient {
    http: HttpClient,
}

impl IotClient {
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }
}

#[async_trait]
impl IotService for IotClient {
    async fn check_thing_cert(&self, thing_id: &str) -> Result<CertCheckResponse, OrchestratorError> {
        self.http
            .post(&format!("/v1/things/{}/cert-check", thing_id), &serde_json::json!({}))
            .await
    }

    async fn thing_device(&self, thing_id: &str) -> Result<ThingDevice, OrchestratorError> {
        self.http.get(&format!("/v1/things/{}/device", thing_id)).await
    }
}
