//! HTTP client for an upstream grid hub
//!
//! Two calls are needed: posting a registration document, and asking the
//! hub whether a node with a given address is currently known.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// Client Configuration
// ============================================================================

/// Configuration for the hub client
#[derive(Debug, Clone)]
pub struct HubClientConfig {
    /// Hub base URL, e.g. `http://hub:4444`
    pub hub_url: String,

    /// Request timeout
    pub timeout: Duration,

    /// Retry count for failed requests
    pub retry_count: u32,

    /// Retry delay
    pub retry_delay: Duration,
}

impl HubClientConfig {
    pub fn new(hub_url: impl Into<String>) -> Self {
        Self {
            hub_url: hub_url.into().trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(10),
            retry_count: 1,
            retry_delay: Duration::from_millis(500),
        }
    }

    /// Set timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set retry count
    pub fn with_retry_count(mut self, count: u32) -> Self {
        self.retry_count = count;
        self
    }

    /// Set retry delay
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }
}

// ============================================================================
// Wire Types
// ============================================================================

/// Document posted to `/grid/register`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationRequest {
    pub class: String,
    pub capabilities: Vec<serde_json::Value>,
    pub configuration: serde_json::Map<String, serde_json::Value>,
}

/// Class name the hub expects in a registration document
pub const REGISTRATION_CLASS: &str = "org.openqa.grid.common.RegistrationRequest";

#[derive(Debug, Deserialize)]
struct ProxyStatus {
    #[serde(default)]
    success: bool,
}

// ============================================================================
// Hub Client
// ============================================================================

/// Client for communicating with the hub
pub struct HubClient {
    config: HubClientConfig,
    http_client: Client,
}

impl HubClient {
    /// Create a new hub client
    pub fn new(config: HubClientConfig) -> Result<Self, HubError> {
        let http_client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| HubError::InitError(e.to_string()))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    pub fn hub_url(&self) -> &str {
        &self.config.hub_url
    }

    /// Register this node with the hub
    pub async fn register(&self, request: &RegistrationRequest) -> Result<(), HubError> {
        let url = format!("{}/grid/register", self.config.hub_url);
        let mut last_error = None;

        for attempt in 0..=self.config.retry_count {
            if attempt > 0 {
                tokio::time::sleep(self.config.retry_delay).await;
            }

            match self.http_client.post(&url).json(request).send().await {
                Ok(response) if response.status().is_success() => return Ok(()),
                Ok(response) => {
                    last_error = Some(HubError::HttpError {
                        status: response.status().as_u16(),
                        message: response.text().await.unwrap_or_default(),
                    });
                }
                Err(e) => {
                    last_error = Some(HubError::NetworkError(e.to_string()));
                }
            }
        }

        Err(last_error.unwrap_or(HubError::HubUnavailable))
    }

    /// Ask the hub whether the node at `node_url` is registered
    pub async fn is_registered(&self, node_url: &str) -> Result<bool, HubError> {
        let url = format!("{}/grid/api/proxy", self.config.hub_url);

        let response = self
            .http_client
            .get(&url)
            .query(&[("id", node_url)])
            .send()
            .await
            .map_err(|e| HubError::NetworkError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(HubError::HttpError {
                status: response.status().as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let status: ProxyStatus = response
            .json()
            .await
            .map_err(|e| HubError::ParseError(e.to_string()))?;
        Ok(status.success)
    }
}

// ============================================================================
// Hub Errors
// ============================================================================

/// Hub client errors
#[derive(Debug, Clone)]
pub enum HubError {
    /// Initialization error
    InitError(String),

    /// Network error
    NetworkError(String),

    /// HTTP error
    HttpError { status: u16, message: String },

    /// Parse error
    ParseError(String),

    /// Hub unavailable
    HubUnavailable,
}

impl HubError {
    /// Whether trying again on the next tick may succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::InitError(_) => false,
            Self::HttpError { status, .. } => *status >= 500 || *status == 404,
            Self::NetworkError(_) | Self::ParseError(_) | Self::HubUnavailable => true,
        }
    }
}

impl std::fmt::Display for HubError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InitError(msg) => write!(f, "Initialization error: {msg}"),
            Self::NetworkError(msg) => write!(f, "Network error: {msg}"),
            Self::HttpError { status, message } => {
                write!(f, "HTTP error ({status}): {message}")
            }
            Self::ParseError(msg) => write!(f, "Parse error: {msg}"),
            Self::HubUnavailable => write!(f, "Hub unavailable"),
        }
    }
}

impl std::error::Error for HubError {}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> RegistrationRequest {
        RegistrationRequest {
            class: REGISTRATION_CLASS.to_string(),
            capabilities: vec![],
            configuration: serde_json::Map::new(),
        }
    }

    #[test]
    fn test_config_trims_trailing_slash() {
        let config = HubClientConfig::new("http://hub:4444/")
            .with_timeout(Duration::from_secs(3))
            .with_retry_count(0);

        assert_eq!(config.hub_url, "http://hub:4444");
        assert_eq!(config.timeout, Duration::from_secs(3));
        assert_eq!(config.retry_count, 0);
    }

    #[tokio::test]
    async fn test_register_posts_document() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/grid/register"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let client = HubClient::new(HubClientConfig::new(server.uri())).unwrap();
        client.register(&request()).await.unwrap();
    }

    #[tokio::test]
    async fn test_register_reports_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/grid/register"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let config = HubClientConfig::new(server.uri()).with_retry_count(0);
        let client = HubClient::new(config).unwrap();

        let err = client.register(&request()).await.unwrap_err();
        assert!(matches!(err, HubError::HttpError { status: 503, .. }));
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn test_is_registered() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/grid/api/proxy"))
            .and(query_param("id", "http://node:4444"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "msg": "proxy found"
            })))
            .mount(&server)
            .await;

        let client = HubClient::new(HubClientConfig::new(server.uri())).unwrap();
        assert!(client.is_registered("http://node:4444").await.unwrap());
        assert!(client.is_registered("http://other:4444").await.is_err());
    }
}
