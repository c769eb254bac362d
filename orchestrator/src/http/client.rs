//! HTTP client implementation

use reqwest::{header, Client, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error};

use crate::errors::OrchestratorError;

/// Header selecting the organization a request acts for
pub const ORGANIZATION_HEADER: &str = "X-Organization";

/// HTTP client for one cloud service
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    base_url: String,
    token: Option<String>,
    organization: Option<String>,
}

impl HttpClient {
    /// Create a new HTTP client
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self, OrchestratorError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()),
            organization: None,
        })
    }

    /// Client whose requests are made on behalf of an organization
    pub fn with_organization(mut self, organization: Option<String>) -> Self {
        self.organization = organization.filter(|o| !o.is_empty());
        self
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, mut request: RequestBuilder) -> RequestBuilder {
        if let Some(token) = &self.token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        if let Some(organization) = &self.organization {
            request = request.header(ORGANIZATION_HEADER, organization);
        }
        request
    }

    async fn send(&self, method: &str, request: RequestBuilder) -> Result<Response, OrchestratorError> {
        let response = self.authorize(request).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("HTTP {} failed: {} - {}", method, status, body);
            return Err(OrchestratorError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response)
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, OrchestratorError> {
        let url = self.url(path);
        debug!("GET {}", url);

        let response = self.send("GET", self.client.get(&url)).await?;
        Ok(response.json().await?)
    }

    /// Make a GET request with query parameters
    pub async fn get_with_query<T: DeserializeOwned, Q: Serialize + ?Sized>(
        &self,
        path: &str,
        query: &Q,
    ) -> Result<T, OrchestratorError> {
        let url = self.url(path);
        debug!("GET {}", url);

        let response = self.send("GET", self.client.get(&url).query(query)).await?;
        Ok(response.json().await?)
    }

    /// Open a `text/event-stream` response
    pub async fn get_event_stream(&self, path: &str) -> Result<Response, OrchestratorError> {
        let url = self.url(path);
        debug!("GET {} (stream)", url);

        let request = self
            .client
            .get(&url)
            .header(header::ACCEPT, "text/event-stream")
            // the stream outlives the default request timeout
            .timeout(std::time::Duration::from_secs(60 * 60));
        self.send("GET", request).await
    }

    /// Make a POST request
    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, OrchestratorError> {
        let url = self.url(path);
        debug!("POST {}", url);

        let response = self.send("POST", self.client.post(&url).json(body)).await?;
        Ok(response.json().await?)
    }

    /// Make a POST request without a body, ignoring the response body
    pub async fn post_empty(&self, path: &str) -> Result<(), OrchestratorError> {
        let url = self.url(path);
        debug!("POST {}", url);

        self.send("POST", self.client.post(&url)).await?;
        Ok(())
    }

    /// Make a PUT request without a body, ignoring the response body
    pub async fn put_empty(&self, path: &str) -> Result<(), OrchestratorError> {
        let url = self.url(path);
        debug!("PUT {}", url);

        self.send("PUT", self.client.put(&url)).await?;
        Ok(())
    }
}
