//! Tool invocation endpoints.
//!
//! The only way an agent reaches a gated operation. Handlers never touch the
//! credential store directly; they hand the agent id and params to the gate.

use super::AppError;
use crate::auth::extract_agent_id;
use crate::gate::AuthorizationGate;
use crate::operation::{Failure, Invocation, OperationRegistry, UpstreamKind};
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Shared application state for tool API
#[derive(Clone)]
pub struct ToolAppState {
    pub gate: Arc<AuthorizationGate>,
    pub operations: Arc<OperationRegistry>,
}

/// Tool summary (for list endpoint)
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct ToolSummary {
    pub name: String,
    pub description: String,
}

/// List tools response
#[derive(Serialize)]
pub struct ListToolsResponse {
    pub provider: String,
    pub tools: Vec<ToolSummary>,
}

/// Response for DELETE /api/credentials
#[derive(Serialize)]
pub struct RevokeResponse {
    pub success: bool,
}

/// Create tool API router
pub fn create_tool_router(state: ToolAppState) -> Router {
    Router::new()
        .route("/api/tools", get(list_tools))
        .route("/api/tools/:name/invoke", post(invoke_tool))
        .route("/api/authorize", post(authorize_agent))
        .route("/api/credentials", delete(revoke_credentials))
        .with_state(Arc::new(state))
}

/// GET /api/tools
async fn list_tools(State(state): State<Arc<ToolAppState>>) -> Json<ListToolsResponse> {
    let tools = state
        .operations
        .list()
        .into_iter()
        .map(|(name, description)| ToolSummary { name, description })
        .collect();

    Json(ListToolsResponse {
        provider: state.gate.provider().to_string(),
        tools,
    })
}

/// POST /api/tools/:name/invoke
///
/// Body is the tool's JSON params (empty body = `{}`). The response body is
/// always the structured [`Invocation`]; the status code mirrors its class.
async fn invoke_tool(
    State(state): State<Arc<ToolAppState>>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let agent = extract_agent_id(&headers).map_err(|e| AppError::BadRequest(e.to_string()))?;

    let operation = state.operations.get(&name).ok_or_else(|| {
        warn!(tool = %name, "Unknown tool");
        AppError::NotFound(format!("Tool '{}' not found", name))
    })?;

    let params: Value = if body.is_empty() {
        Value::Object(Default::default())
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| AppError::BadRequest(format!("Invalid JSON body: {}", e)))?
    };

    debug!(tool = %name, agent = %agent, "Tool invocation");

    let invocation = state.gate.invoke(&agent, operation.as_ref(), params).await;
    Ok((status_for(&invocation), Json(invocation)).into_response())
}

/// POST /api/authorize
///
/// Starts a fresh grant for the calling agent whether or not it already holds
/// a credential (re-consent, scope changes, switching workspace). The existing
/// credential stays in place until the new grant replaces it. A challenge is
/// the expected answer here, so it is returned with 200.
async fn authorize_agent(
    State(state): State<Arc<ToolAppState>>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let agent = extract_agent_id(&headers).map_err(|e| AppError::BadRequest(e.to_string()))?;

    info!(agent = %agent, "Explicit authorization requested");

    let invocation = state.gate.authorize(&agent).await;
    let status = match invocation {
        Invocation::NeedsAuthorization { .. } => StatusCode::OK,
        _ => status_for(&invocation),
    };
    Ok((status, Json(invocation)).into_response())
}

fn status_for(invocation: &Invocation) -> StatusCode {
    match invocation {
        Invocation::Success { .. } => StatusCode::OK,
        Invocation::NeedsAuthorization { .. } => StatusCode::UNAUTHORIZED,
        Invocation::Failure {
            error: Failure::AuthorityUnavailable { .. },
        } => StatusCode::SERVICE_UNAVAILABLE,
        Invocation::Failure {
            error: Failure::Upstream(failure),
        } => match failure.kind {
            UpstreamKind::InvalidParams => StatusCode::BAD_REQUEST,
            _ => StatusCode::BAD_GATEWAY,
        },
    }
}

/// DELETE /api/credentials
///
/// The calling agent drops its own credential. Idempotent.
async fn revoke_credentials(
    State(state): State<Arc<ToolAppState>>,
    headers: HeaderMap,
) -> Result<Json<RevokeResponse>, AppError> {
    let agent = extract_agent_id(&headers).map_err(|e| AppError::BadRequest(e.to_string()))?;

    state.gate.revoke(&agent).await.map_err(|e| {
        error!(agent = %agent, error = %e, "Failed to revoke credentials");
        AppError::ServerError(format!("Failed to revoke credentials: {}", e))
    })?;

    info!(agent = %agent, "Credentials revoked via API");
    Ok(Json(RevokeResponse { success: true }))
}
