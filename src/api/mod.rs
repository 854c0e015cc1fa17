// HTTP tool layer and OAuth grant callback

pub mod auth_middleware;
pub mod oauth;
pub mod tools;

pub use auth_middleware::{require_api_key, ApiKeyAuth};
pub use oauth::{create_oauth_router, OAuthAppState};
pub use tools::{create_tool_router, ToolAppState};

use axum::{
    http::StatusCode,
    middleware,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::Serialize;
use tower_http::cors::CorsLayer;

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Request-level errors (before the gate is reached)
pub(crate) enum AppError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    ServerError(String),
    BadGateway(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::ServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            AppError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
        };

        (status, Json(ErrorResponse { error: error_message })).into_response()
    }
}

/// Full service router: tools, OAuth callback, health check
///
/// Only the tool routes sit behind the API key. The OAuth callback is reached
/// by the user's browser and is authenticated by its single-use state token.
pub fn create_router(tools: ToolAppState, oauth: OAuthAppState, auth: ApiKeyAuth) -> Router {
    let tool_routes = create_tool_router(tools)
        .route_layer(middleware::from_fn_with_state(auth, require_api_key));

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .merge(tool_routes)
        .merge(create_oauth_router(oauth))
        .layer(CorsLayer::permissive())
}
