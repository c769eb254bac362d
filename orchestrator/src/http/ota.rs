//! OTA service API client

use async_trait::async_trait;
use cloud_api::{CreateOtaRequest, CreateOtaResponse, ListOtaResponse, Ota, ShowOtaResponse};

use crate::errors::OrchestratorError;
use crate::http::client::HttpClient;

/// Sort order of OTA listings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

/// Remote OTA service
#[async_trait]
pub trait OtaService: Send + Sync {
    /// Request an OTA. An OTA already in flight for the device answers 409.
    async fn create_ota(&self, device_id: &str, binary_key: &str) -> Result<Ota, OrchestratorError>;

    async fn show_ota(&self, id: &str, all_progress: bool) -> Result<ShowOtaResponse, OrchestratorError>;

    async fn list_device_ota(
        &self,
        device_id: &str,
        limit: u32,
        order: SortOrder,
    ) -> Result<Vec<Ota>, OrchestratorError>;

    /// Cancel a pending OTA. An OTA past pending answers 409.
    async fn cancel_ota(&self, id: &str) -> Result<(), OrchestratorError>;
}

/// OTA service over HTTP
pub struct OtaClient {
    http: HttpClient,
}

impl OtaClient {
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }
}

#[async_trait]
impl OtaService for OtaClient {
    async fn create_ota(&self, device_id: &str, binary_key: &str) -> Result<Ota, OrchestratorError> {
        let request = CreateOtaRequest {
            device_id: device_id.to_string(),
            binary_key: binary_key.to_string(),
        };
        let response: CreateOtaResponse = self.http.post("/v1/ota", &request).await?;
        Ok(response.ota)
    }

    async fn show_ota(&self, id: &str, all_progress: bool) -> Result<ShowOtaResponse, OrchestratorError> {
        self.http
            .get_with_query(
                &format!("/v1/ota/{}", id),
                &[("all_progress", all_progress.to_string())],
            )
            .await
    }

    async fn list_device_ota(
        &self,
        device_id: &str,
        limit: u32,
        order: SortOrder,
    ) -> Result<Vec<Ota>, OrchestratorError> {
        let query = [
            ("device_id", device_id.to_string()),
            ("limit", limit.to_string()),
            ("order", order.as_str().to_string()),
        ];
        let response: ListOtaResponse = self.http.get_with_query("/v1/ota", &query).await?;
        Ok(response.ota)
    }

    async fn cancel_ota(&self, id: &str) -> Result<(), OrchestratorError> {
        self.http.put_empty(&format!("/v1/ota/{}/cancel", id)).await
    }
}
