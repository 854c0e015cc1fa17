//! Service API key check for the tool routes.
//!
//! `X-Agent-Id` is only an attribution header. It is trusted after the caller
//! proves it is the agent host by presenting the service key as
//! `Authorization: Bearer <key>`. Requests that fail the check are answered
//! with 401 before any handler (and therefore the gate) runs.

use super::AppError;
use crate::auth::extract_bearer_token;
use crate::config::AuthConfig;
use anyhow::{bail, Result};
use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::warn;

/// Caller authentication errors
#[derive(Debug, PartialEq)]
pub enum AuthError {
    /// Missing or malformed Authorization header
    InvalidToken(String),
    /// Well-formed bearer token that is not the service key
    WrongKey,
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::InvalidToken(msg) => write!(f, "Invalid token: {}", msg),
            AuthError::WrongKey => write!(f, "Invalid API key"),
        }
    }
}

/// The service key, or `None` when caller auth is switched off.
#[derive(Clone)]
pub struct ApiKeyAuth {
    api_key: Option<Arc<str>>,
}

impl ApiKeyAuth {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: Some(Arc::from(api_key.into())),
        }
    }

    /// Accept every caller (local development only)
    pub fn disabled() -> Self {
        Self { api_key: None }
    }

    /// Enabled auth without a non-blank key is a startup error.
    pub fn from_config(config: &AuthConfig) -> Result<Self> {
        if !config.enabled {
            warn!("Caller authentication disabled; X-Agent-Id is trusted as sent");
            return Ok(Self::disabled());
        }

        match config.api_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => Ok(Self::new(key)),
            _ => bail!(
                "auth.enabled is true but no API key is configured (set {})",
                crate::config::env::API_KEY_VAR
            ),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.api_key.is_some()
    }

    /// Check the request's bearer token against the service key.
    pub fn verify(&self, headers: &HeaderMap) -> Result<(), AuthError> {
        let Some(expected) = self.api_key.as_deref() else {
            return Ok(());
        };

        let token =
            extract_bearer_token(headers).map_err(|e| AuthError::InvalidToken(e.to_string()))?;

        if constant_time_eq(token.as_bytes(), expected.as_bytes()) {
            Ok(())
        } else {
            Err(AuthError::WrongKey)
        }
    }
}

/// Route layer: reject the request with 401 unless it carries the service key.
pub async fn require_api_key(
    State(auth): State<ApiKeyAuth>,
    request: Request,
    next: Next,
) -> Response {
    if let Err(e) = auth.verify(request.headers()) {
        warn!(path = %request.uri().path(), error = %e, "Rejected unauthenticated request");
        return AppError::Unauthorized(e.to_string()).into_response();
    }

    next.run(request).await
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{header::AUTHORIZATION, HeaderValue};

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
        );
        headers
    }

    #[test]
    fn test_correct_key_accepted() {
        let auth = ApiKeyAuth::new("svc-key");
        assert!(auth.verify(&bearer("svc-key")).is_ok());
    }

    #[test]
    fn test_wrong_key_rejected() {
        let auth = ApiKeyAuth::new("svc-key");
        assert_eq!(auth.verify(&bearer("svc-kex")), Err(AuthError::WrongKey));
        assert_eq!(auth.verify(&bearer("svc-key-longer")), Err(AuthError::WrongKey));
    }

    #[test]
    fn test_missing_header_rejected() {
        let auth = ApiKeyAuth::new("svc-key");
        assert!(matches!(
            auth.verify(&HeaderMap::new()),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_disabled_accepts_anything() {
        let auth = ApiKeyAuth::disabled();
        assert!(!auth.is_enabled());
        assert!(auth.verify(&HeaderMap::new()).is_ok());
    }

    #[test]
    fn test_from_config() {
        let enabled_without_key = AuthConfig {
            enabled: true,
            api_key: None,
        };
        assert!(ApiKeyAuth::from_config(&enabled_without_key).is_err());

        let blank_key = AuthConfig {
            enabled: true,
            api_key: Some("   ".to_string()),
        };
        assert!(ApiKeyAuth::from_config(&blank_key).is_err());

        let configured = AuthConfig {
            enabled: true,
            api_key: Some("svc-key".to_string()),
        };
        let auth = ApiKeyAuth::from_config(&configured).unwrap();
        assert!(auth.is_enabled());
        assert!(auth.verify(&bearer("svc-key")).is_ok());

        let disabled = AuthConfig {
            enabled: false,
            api_key: None,
        };
        assert!(!ApiKeyAuth::from_config(&disabled).unwrap().is_enabled());
    }
}
