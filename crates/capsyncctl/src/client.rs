//! HTTP client for the capsyncd daemon.

use capsync_core::{Capability, DefinitionKind};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("daemon not running at {addr}\n  → start with: capsyncd\n  → or set CAPSYNC_ADDR if using a different address")]
    ConnectionFailed { addr: String },

    #[error("HTTP error: {status} - {message}")]
    HttpError { status: u16, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("capability not found: {0}")]
    NotFound(String),

    #[error("unauthorized: check CAPSYNC_TOKEN env var or --token flag")]
    Unauthorized,

    #[error("cluster query failed: {0}")]
    ClusterUnavailable(String),

    #[error("daemon is shutting down")]
    ShuttingDown,

    #[error(
        "daemon not ready after {timeout_ms}ms at {addr}\n  → ensure capsyncd is running\n  → check CAPSYNC_TOKEN if auth is enabled"
    )]
    DaemonNotReady { addr: String, timeout_ms: u64 },
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() {
            let addr = e
                .url()
                .map(|u| u.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            ClientError::ConnectionFailed { addr }
        } else {
            ClientError::HttpError {
                status: e.status().map(|s| s.as_u16()).unwrap_or(0),
                message: e.to_string(),
            }
        }
    }
}

/// A definition the daemon could not convert.
#[derive(Debug, Clone, Deserialize)]
pub struct SkippedDefinition {
    pub name: String,
    pub kind: DefinitionKind,
    pub reason: String,
}

/// Response from GET /capabilities.
#[derive(Debug, Deserialize)]
pub struct ListCapabilitiesResponse {
    pub capabilities: Vec<Capability>,
    #[serde(default)]
    pub skipped: Vec<SkippedDefinition>,
}

#[derive(Debug, Deserialize)]
struct GetCapabilityResponse {
    capability: Capability,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
}

/// Namespace and selector overrides for a discovery request.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryQuery<'a> {
    pub namespace: Option<&'a str>,
    pub selector: Option<&'a str>,
}

impl DiscoveryQuery<'_> {
    /// Query string including the leading `?`, or empty.
    pub fn to_query_string(&self) -> String {
        let mut params = vec![];
        if let Some(ns) = self.namespace {
            params.push(format!("namespace={}", urlencoding::encode(ns)));
        }
        if let Some(selector) = self.selector {
            params.push(format!("selector={}", urlencoding::encode(selector)));
        }
        if params.is_empty() {
            String::new()
        } else {
            format!("?{}", params.join("&"))
        }
    }
}

/// Default total timeout for the daemon readiness probe.
const DEFAULT_READY_TIMEOUT_MS: u64 = 5000;

/// Initial backoff delay for the readiness probe.
const INITIAL_BACKOFF_MS: u64 = 200;

/// HTTP client for capsyncd.
pub struct Client {
    base_url: String,
    token: Option<String>,
    http: reqwest::Client,
}

impl Client {
    pub fn new(base_url: &str, token: Option<&str>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(String::from),
            http: reqwest::Client::new(),
        }
    }

    pub fn addr(&self) -> &str {
        &self.base_url
    }

    /// Probe /health. Err only when the daemon cannot be reached.
    pub async fn check_health(&self) -> Result<bool, ClientError> {
        let url = format!("{}/health", self.base_url);
        let response = self.http.get(&url).headers(self.headers()).send().await?;
        Ok(response.status().is_success())
    }

    /// Wait for the daemon to become ready with exponential backoff.
    pub async fn wait_for_ready(&self) -> Result<(), ClientError> {
        self.wait_for_ready_with_timeout(DEFAULT_READY_TIMEOUT_MS)
            .await
    }

    pub async fn wait_for_ready_with_timeout(&self, timeout_ms: u64) -> Result<(), ClientError> {
        let start = std::time::Instant::now();
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            match self.check_health().await {
                Ok(true) => return Ok(()),
                Ok(false) | Err(_) => {
                    let elapsed = start.elapsed().as_millis() as u64;
                    if elapsed >= timeout_ms {
                        return Err(ClientError::DaemonNotReady {
                            addr: self.base_url.clone(),
                            timeout_ms,
                        });
                    }

                    eprintln!(
                        "waiting for daemon at {} (retrying in {}ms)",
                        self.base_url, backoff_ms
                    );

                    let remaining = timeout_ms.saturating_sub(elapsed);
                    tokio::time::sleep(std::time::Duration::from_millis(
                        backoff_ms.min(remaining),
                    ))
                    .await;
                    backoff_ms = backoff_ms.saturating_mul(2);
                }
            }
        }
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(token) = &self.token {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", token)) {
                headers.insert(AUTHORIZATION, value);
            }
        }
        headers
    }

    async fn handle_error(&self, response: reqwest::Response, subject: &str) -> ClientError {
        let status = response.status().as_u16();
        let message = response
            .json::<ErrorResponse>()
            .await
            .map(|e| e.error)
            .unwrap_or_else(|_| "unknown error".to_string());
        error_for_status(status, message, subject)
    }

    /// Discover the capability catalog.
    /// GET /capabilities
    pub async fn list_capabilities(
        &self,
        query: &DiscoveryQuery<'_>,
    ) -> Result<ListCapabilitiesResponse, ClientError> {
        let url = format!("{}/capabilities{}", self.base_url, query.to_query_string());
        let response = self.http.get(&url).headers(self.headers()).send().await?;

        if !response.status().is_success() {
            return Err(self.handle_error(response, "capabilities").await);
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::InvalidResponse(e.to_string()))
    }

    /// Fetch a single capability.
    /// GET /capabilities/{name}
    pub async fn get_capability(
        &self,
        name: &str,
        query: &DiscoveryQuery<'_>,
    ) -> Result<Capability, ClientError> {
        let url = format!(
            "{}/capabilities/{}{}",
            self.base_url,
            urlencoding::encode(name),
            query.to_query_string()
        );
        let response = self.http.get(&url).headers(self.headers()).send().await?;

        if !response.status().is_success() {
            return Err(self.handle_error(response, name).await);
        }

        let body: GetCapabilityResponse = response
            .json()
            .await
            .map_err(|e| ClientError::InvalidResponse(e.to_string()))?;
        Ok(body.capability)
    }
}

/// Map a non-success status from the daemon to a client error.
fn error_for_status(status: u16, message: String, subject: &str) -> ClientError {
    match status {
        401 => ClientError::Unauthorized,
        404 => ClientError::NotFound(subject.to_string()),
        502 => ClientError::ClusterUnavailable(message),
        503 => ClientError::ShuttingDown,
        _ => ClientError::HttpError { status, message },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_string_is_empty_without_overrides() {
        assert_eq!(DiscoveryQuery::default().to_query_string(), "");
    }

    #[test]
    fn query_string_encodes_selector() {
        let query = DiscoveryQuery {
            namespace: Some("apps"),
            selector: Some("env in (dev,qa),tier"),
        };
        assert_eq!(
            query.to_query_string(),
            "?namespace=apps&selector=env%20in%20%28dev%2Cqa%29%2Ctier"
        );
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let client = Client::new("http://127.0.0.1:7800/", None);
        assert_eq!(client.addr(), "http://127.0.0.1:7800");
    }

    #[test]
    fn headers_carry_bearer_token() {
        let client = Client::new("http://127.0.0.1:7800", Some("secret"));
        let headers = client.headers();
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer secret");

        let anonymous = Client::new("http://127.0.0.1:7800", None);
        assert!(anonymous.headers().get(AUTHORIZATION).is_none());
    }

    #[test]
    fn status_mapping() {
        assert!(matches!(
            error_for_status(401, String::new(), "x"),
            ClientError::Unauthorized
        ));
        assert!(matches!(
            error_for_status(404, String::new(), "scaler"),
            ClientError::NotFound(name) if name == "scaler"
        ));
        assert!(matches!(
            error_for_status(502, "list WorkloadDefinition err: down".into(), "x"),
            ClientError::ClusterUnavailable(msg) if msg.starts_with("list WorkloadDefinition")
        ));
        assert!(matches!(
            error_for_status(503, String::new(), "x"),
            ClientError::ShuttingDown
        ));
        assert!(matches!(
            error_for_status(400, "invalid selector".into(), "x"),
            ClientError::HttpError { status: 400, .. }
        ));
    }

    #[test]
    fn list_response_parses_daemon_body() {
        let body = r#"{
            "capabilities": [{
                "name": "scaler",
                "type": "trait",
                "appliesTo": ["webservice"],
                "crdName": "manualscalertraits.core.oam.dev",
                "definitionPath": "/tmp/sync/scaler.cue",
                "parameters": [
                    {"name": "replicas", "type": "int", "required": false, "default": 1}
                ],
                "canonicalName": "scale"
            }],
            "skipped": [{
                "name": "hollow",
                "kind": "WorkloadDefinition",
                "reason": "template not exist in definition"
            }]
        }"#;
        let parsed: ListCapabilitiesResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.capabilities.len(), 1);
        assert!(parsed.capabilities[0].is_trait());
        assert_eq!(parsed.skipped[0].kind, DefinitionKind::WorkloadDefinition);
    }
}
