//! HTTP surface for capsyncd.
//!
//! Every catalog request runs a fresh discovery against the cluster; nothing
//! is cached between requests.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use capsync_core::{Capability, ClusterClient, LabelSelector, ParameterExtractor, TemplateStore};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::discovery::{Discovery, DiscoveryError, DiscoveryResult, SkippedDefinition};

/// Shared state for HTTP handlers.
pub struct AppState {
    pub client: Arc<dyn ClusterClient>,
    pub extractor: Arc<dyn ParameterExtractor>,
    pub store: TemplateStore,
    /// Namespace used when a request does not name one.
    pub namespace: String,
    /// Selector used when a request does not supply one.
    pub selector: LabelSelector,
    pub auth_token: Option<String>,
    /// Cancelled when the server starts draining.
    pub shutdown: CancellationToken,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("store", &self.store)
            .field("namespace", &self.namespace)
            .field("selector", &self.selector.to_string())
            .field("auth", &self.auth_token.is_some())
            .finish_non_exhaustive()
    }
}

/// Create the HTTP router with all endpoints.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/capabilities", get(list_capabilities))
        .route("/capabilities/{name}", get(get_capability))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

/// Validate auth token if configured.
fn check_auth(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    if let Some(expected) = &state.auth_token {
        let provided = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.strip_prefix("Bearer ").unwrap_or(s));

        match provided {
            Some(token) if token == expected => Ok(()),
            Some(_) => Err(api_error(StatusCode::UNAUTHORIZED, "invalid auth token")),
            None => Err(api_error(StatusCode::UNAUTHORIZED, "missing auth token")),
        }
    } else {
        Ok(())
    }
}

// --- Request/Response types ---

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Query params for the catalog endpoints.
#[derive(Debug, Deserialize, Default)]
pub struct DiscoveryQuery {
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub selector: Option<String>,
}

/// Response for GET /capabilities.
#[derive(Debug, Serialize)]
pub struct ListCapabilitiesResponse {
    pub capabilities: Vec<Capability>,
    pub skipped: Vec<SkippedDefinition>,
}

/// Response for GET /capabilities/{name}.
#[derive(Debug, Serialize)]
pub struct GetCapabilityResponse {
    pub capability: Capability,
}

// --- Handlers ---

/// Health check endpoint.
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn run_discovery(
    state: &AppState,
    query: DiscoveryQuery,
) -> Result<DiscoveryResult, ApiError> {
    let namespace = query.namespace.unwrap_or_else(|| state.namespace.clone());
    let selector = match query.selector {
        Some(raw) => LabelSelector::parse(&raw)
            .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("invalid selector: {e}")))?,
        None => state.selector.clone(),
    };

    let discovery = Discovery {
        client: state.client.as_ref(),
        extractor: state.extractor.as_ref(),
        store: &state.store,
    };
    let cancel = state.shutdown.child_token();
    discovery
        .discover(&namespace, &selector, &cancel)
        .await
        .map_err(|e| {
            error!(namespace = %namespace, error = %e, "capability discovery failed");
            match e {
                DiscoveryError::ClusterQuery { .. } => {
                    api_error(StatusCode::BAD_GATEWAY, e.to_string())
                }
                DiscoveryError::Cancelled => {
                    api_error(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
                }
            }
        })
}

/// GET /capabilities - Discover the capability catalog.
async fn list_capabilities(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<DiscoveryQuery>,
) -> Result<impl IntoResponse, ApiError> {
    check_auth(&state, &headers)?;
    let result = run_discovery(&state, query).await?;
    Ok(Json(ListCapabilitiesResponse {
        capabilities: result.capabilities,
        skipped: result.skipped,
    }))
}

/// GET /capabilities/{name} - Discover and return one capability.
async fn get_capability(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(name): Path<String>,
    Query(query): Query<DiscoveryQuery>,
) -> Result<impl IntoResponse, ApiError> {
    check_auth(&state, &headers)?;
    let result = run_discovery(&state, query).await?;
    let capability = result
        .capabilities
        .into_iter()
        .find(|c| c.name == name)
        .ok_or_else(|| {
            api_error(
                StatusCode::NOT_FOUND,
                format!("capability not found: {name}"),
            )
        })?;
    Ok(Json(GetCapabilityResponse { capability }))
}
