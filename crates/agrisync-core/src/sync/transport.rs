//! Transport layer abstraction for operation delivery.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::error::{SyncError, SyncResult};
use crate::config::{normalize_base_url, ConfigError};
use crate::models::{HttpMethod, OutgoingOperation};

const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";
const HEALTH_PATH: &str = "/health";

/// One HTTP call against the server, relative to its base URL.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundRequest {
    pub method: HttpMethod,
    pub path: String,
    pub body: Option<serde_json::Value>,
    pub idempotency_key: Option<String>,
}

impl OutboundRequest {
    /// Replay a queued operation, keyed by its id.
    pub fn for_operation(operation: &OutgoingOperation) -> Self {
        Self {
            method: operation.method,
            path: operation.target.clone(),
            body: operation.body.clone(),
            idempotency_key: Some(operation.id.as_str()),
        }
    }

    /// Read-only GET of a path.
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            path: path.into(),
            body: None,
            idempotency_key: None,
        }
    }
}

/// Status and decoded body of a server response.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    /// JSON body, or the raw text as a JSON string when it is not JSON
    pub body: Option<serde_json::Value>,
}

impl TransportResponse {
    pub const fn new(status: u16, body: Option<serde_json::Value>) -> Self {
        Self { status, body }
    }
}

/// A transport delivers requests to the server.
///
/// A `send` error means no HTTP response was received; any response,
/// whatever its status, is returned as `Ok`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &OutboundRequest) -> SyncResult<TransportResponse>;

    /// Whether the server answers at all.
    async fn probe(&self) -> bool;
}

/// Supplies the bearer credential attached to each request.
pub trait CredentialProvider: Send + Sync {
    fn bearer_token(&self) -> Option<String>;
}

/// A fixed credential, typically read from configuration.
#[derive(Clone, Default)]
pub struct StaticCredentials {
    token: Option<String>,
}

impl StaticCredentials {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: token.filter(|token| !token.trim().is_empty()),
        }
    }
}

impl fmt::Debug for StaticCredentials {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("StaticCredentials")
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl CredentialProvider for StaticCredentials {
    fn bearer_token(&self) -> Option<String> {
        self.token.clone()
    }
}

/// `reqwest` transport against the collections API.
#[derive(Clone)]
pub struct HttpTransport {
    base_url: String,
    client: reqwest::Client,
    credentials: Arc<dyn CredentialProvider>,
}

impl HttpTransport {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            base_url: normalize_base_url(base_url)?,
            client: reqwest::Client::builder().timeout(timeout).build()?,
            credentials,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url_for(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}/{path}", self.base_url)
        }
    }
}

fn reqwest_method(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Patch => reqwest::Method::PATCH,
        HttpMethod::Delete => reqwest::Method::DELETE,
    }
}

/// Decode a response body, keeping non-JSON text as a JSON string.
fn decode_body(text: &str) -> Option<serde_json::Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(
        serde_json::from_str(trimmed)
            .unwrap_or_else(|_| serde_json::Value::String(trimmed.to_string())),
    )
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &OutboundRequest) -> SyncResult<TransportResponse> {
        let mut builder = self
            .client
            .request(reqwest_method(request.method), self.url_for(&request.path))
            .header("Accept", "application/json");
        if let Some(token) = self.credentials.bearer_token() {
            builder = builder.bearer_auth(token);
        }
        if let Some(key) = request.idempotency_key.as_deref() {
            builder = builder.header(IDEMPOTENCY_KEY_HEADER, key);
        }
        if let Some(body) = request.body.as_ref() {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|error| SyncError::TransientNetwork(error.to_string()))?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|error| SyncError::TransientNetwork(error.to_string()))?;

        Ok(TransportResponse::new(status, decode_body(&text)))
    }

    async fn probe(&self) -> bool {
        match self.client.get(self.url_for(HEALTH_PATH)).send().await {
            Ok(_) => true,
            Err(error) => {
                tracing::debug!("Reachability probe failed: {error}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Collection, NewCollection};
    use serde_json::json;

    fn build(base_url: &str) -> Result<HttpTransport, ConfigError> {
        HttpTransport::new(
            base_url,
            Duration::from_secs(5),
            Arc::new(StaticCredentials::default()),
        )
    }

    #[test]
    fn normalizes_base_url() {
        let transport = build("https://api.example.com/").unwrap();
        assert_eq!(transport.base_url(), "https://api.example.com");
        assert_eq!(
            transport.url_for("/collections"),
            "https://api.example.com/collections"
        );
        assert_eq!(transport.url_for("health"), "https://api.example.com/health");

        assert!(build("").is_err());
        assert!(build("api.example.com").is_err());
    }

    #[test]
    fn request_for_operation_uses_operation_id_as_key() {
        let record =
            Collection::create(NewCollection::new("farmer-1", "Maize", 12.5), 100).unwrap();
        let operation = OutgoingOperation::create_collection(&record, 100);

        let request = OutboundRequest::for_operation(&operation);
        assert_eq!(request.method, HttpMethod::Post);
        assert_eq!(request.path, "/collections");
        assert_eq!(request.idempotency_key, Some(operation.id.as_str()));
        assert_eq!(request.body, operation.body);
    }

    #[test]
    fn decodes_json_and_text_bodies() {
        assert_eq!(decode_body(""), None);
        assert_eq!(decode_body(" {\"ok\":true} "), Some(json!({"ok": true})));
        assert_eq!(decode_body("Bad Gateway"), Some(json!("Bad Gateway")));
    }

    #[test]
    fn static_credentials_debug_redacts_token() {
        let credentials = StaticCredentials::new(Some("secret-token".to_string()));
        let debug = format!("{credentials:?}");
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("[REDACTED]"));
        assert_eq!(credentials.bearer_token().as_deref(), Some("secret-token"));
        assert!(StaticCredentials::new(Some("  ".into()))
            .bearer_token()
            .is_none());
    }
}
