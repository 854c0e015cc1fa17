use crate::credentials::AgentId;
use axum::http::{header::AUTHORIZATION, HeaderMap};


/// Extract the bearer token from the Authorization header
///
/// Expected format: "Authorization: Bearer <token>"
pub fn extract_bearer_token(headers: &HeaderMap) -> Result<String, TokenError> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or(TokenError::Missing)?
        .to_str()
        .map_err(|_| TokenError::InvalidFormat)?;

    let (scheme, token) = value.split_once(' ').ok_or(TokenError::InvalidFormat)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(TokenError::InvalidFormat);
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(TokenError::Empty);
    }
    Ok(token.to_string())
}

/// Bearer token extraction errors
#[derive(Debug, PartialEq, Clone)]
pub enum TokenError {
    /// Authorization header not present
    Missing,
    /// Not "Bearer <token>"
    InvalidFormat,
    /// Bearer scheme with nothing after it
    Empty,
}

impl std::fmt::Display for TokenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenError::Missing => write!(f, "Authorization header not provided"),
            TokenError::InvalidFormat => {
                write!(f, "Invalid Authorization header format (expected 'Bearer <token>')")
            }
            TokenError::Empty => write!(f, "Bearer token is empty"),
        }
    }
}

impl std::error::Error for TokenError {}

/// Header carrying the calling agent's identifier.
pub const AGENT_ID_HEADER: &str = "x-agent-id";

/// Extract the calling agent from HTTP headers
///
/// Expected format: "X-Agent-Id: <agent id>"
/// The id is an assertion by the caller. It is only trusted on routes behind
/// the API key check, where the caller is the agent host itself.
pub fn extract_agent_id(headers: &HeaderMap) -> Result<AgentId, AgentIdError> {
    let value = headers
        .get(AGENT_ID_HEADER)
        .ok_or(AgentIdError::Missing)?
        .to_str()
        .map_err(|_| AgentIdError::InvalidFormat)?;

    parse_agent_id(value)
}

/// Internal helper for extract_agent_id
fn parse_agent_id(value: &str) -> Result<AgentId, AgentIdError> {
    let value = value.trim();

    if value.is_empty() {
        return Err(AgentIdError::Empty);
    }

    // Agent ids end up in logs and the credential table key
    if value.chars().any(|c| c.is_control() || c.is_whitespace()) {
        return Err(AgentIdError::InvalidFormat);
    }

    AgentId::new(value).map_err(|_| AgentIdError::Empty)
}

/// Agent id extraction errors
#[derive(Debug, PartialEq, Clone)]
pub enum AgentIdError {
    /// Header not present
    Missing,
    /// Not visible ASCII, or contains whitespace
    InvalidFormat,
    /// Header present but blank
    Empty,
}

impl std::fmt::Display for AgentIdError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentIdError::Missing => write!(f, "X-Agent-Id header not provided"),
            AgentIdError::InvalidFormat => write!(f, "Invalid X-Agent-Id header format"),
            AgentIdError::Empty => write!(f, "X-Agent-Id header is empty"),
        }
    }
}

impl std::error::Error for AgentIdError {}
