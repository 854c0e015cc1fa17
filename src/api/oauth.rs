//! OAuth grant callback.
//!
//! `GET /oauth/:provider/callback` is where the provider redirects after the
//! operator authorizes. The authority validates the CSRF state and exchanges
//! the code; the resulting grant is written through the gate's `on_grant`.

use super::AppError;
use crate::authority::{AuthorityError, OAuth2Authority};
use crate::gate::AuthorizationGate;
use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, warn};

#[derive(Clone)]
pub struct OAuthAppState {
    pub gate: Arc<AuthorizationGate>,
    pub authority: Arc<OAuth2Authority>,
}

/// Query string of the provider redirect: either `code` + `state`, or `error`.
#[derive(Deserialize)]
pub struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

impl CallbackParams {
    /// The (code, state) pair, or the reason the redirect cannot be redeemed.
    fn into_code_and_state(self) -> Result<(String, String), AppError> {
        if let Some(error) = self.error {
            let detail = self.error_description.unwrap_or_else(|| error.clone());
            return Err(AppError::BadRequest(format!(
                "Provider denied authorization ({}): {}",
                error, detail
            )));
        }
        match (self.code, self.state) {
            (Some(code), Some(state)) => Ok((code, state)),
            (None, _) => Err(AppError::BadRequest("Missing 'code' parameter".to_string())),
            (_, None) => Err(AppError::BadRequest("Missing 'state' parameter".to_string())),
        }
    }
}

/// Body returned once the grant is stored.
#[derive(Serialize)]
pub struct GrantStored {
    authorized: bool,
    provider: String,
    agent_id: String,
    /// Provider's name for what was shared (Notion: `workspace_name`)
    #[serde(skip_serializing_if = "Option::is_none")]
    workspace: Option<String>,
}

pub fn create_oauth_router(state: OAuthAppState) -> Router {
    Router::new()
        .route("/oauth/:provider/callback", get(oauth_callback))
        .with_state(Arc::new(state))
}

fn authority_error(provider: &str, e: AuthorityError) -> AppError {
    match e {
        AuthorityError::InvalidState => AppError::Unauthorized(e.to_string()),
        AuthorityError::UnknownProvider(_) => AppError::NotFound(e.to_string()),
        AuthorityError::Exchange(_) => {
            error!(provider = %provider, error = %e, "Token exchange failed");
            AppError::BadGateway(e.to_string())
        }
        AuthorityError::NotConfigured(_) | AuthorityError::RefreshUnsupported(_) => {
            AppError::ServerError(e.to_string())
        }
    }
}

/// GET /oauth/:provider/callback
///
/// The agent credited is the one the state token was issued to.
async fn oauth_callback(
    State(state): State<Arc<OAuthAppState>>,
    Path(provider): Path<String>,
    Query(params): Query<CallbackParams>,
) -> Result<Json<GrantStored>, AppError> {
    debug!(provider = %provider, "OAuth callback received");

    let (code, csrf_state) = params.into_code_and_state().map_err(|e| {
        warn!(provider = %provider, "OAuth redirect rejected");
        e
    })?;

    let grant = state
        .authority
        .complete(&provider, &code, &csrf_state)
        .await
        .map_err(|e| authority_error(&provider, e))?;

    let workspace = grant.credentials.metadata.get("workspace_name").cloned();
    state
        .gate
        .on_grant(&grant.agent, grant.credentials)
        .await
        .map_err(|e| {
            error!(agent = %grant.agent, error = %e, "Failed to store credentials");
            AppError::ServerError(format!("Failed to store credentials: {}", e))
        })?;

    Ok(Json(GrantStored {
        authorized: true,
        provider,
        agent_id: grant.agent.to_string(),
        workspace,
    }))
}
