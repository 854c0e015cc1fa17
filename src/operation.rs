//! Gated operations and their classified outcomes.
//!
//! An [`Operation`] is a pure function of (credential, params) against some
//! external API. It carries no authorization logic of its own; the
//! [`AuthorizationGate`](crate::gate::AuthorizationGate) decides whether it
//! runs at all.

use crate::credentials::CredentialSet;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A downstream call made on an agent's behalf.
///
/// # Example
/// ```no_run
/// use pagegate::credentials::CredentialSet;
/// use pagegate::operation::{Operation, UpstreamFailure};
/// use async_trait::async_trait;
/// use serde_json::{json, Value};
///
/// struct WhoAmI;
///
/// #[async_trait]
/// impl Operation for WhoAmI {
///     fn name(&self) -> &str {
///         "who-am-i"
///     }
///
///     fn description(&self) -> &str {
///         "Returns the workspace the credential belongs to"
///     }
///
///     async fn perform(
///         &self,
///         credentials: &CredentialSet,
///         _params: Value,
///     ) -> Result<Value, UpstreamFailure> {
///         Ok(json!({ "workspace": credentials.metadata.get("workspace_id") }))
///     }
/// }
/// ```
#[async_trait]
pub trait Operation: Send + Sync {
    /// Unique tool identifier (e.g. "create-page"). Used in API paths and logs.
    fn name(&self) -> &str;

    /// One-line human description of what the tool does.
    fn description(&self) -> &str;

    /// Performs the call with the agent's credential.
    ///
    /// Implementations must not retry internally; failures are classified and
    /// returned to the caller as-is.
    async fn perform(&self, credentials: &CredentialSet, params: Value)
        -> Result<Value, UpstreamFailure>;
}

/// Classification of an upstream failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamKind {
    /// Params did not match the operation's input shape
    InvalidParams,
    /// Upstream rejected the request body
    Validation,
    /// Token rejected (revoked or expired upstream)
    Unauthorized,
    /// Token valid but lacks access to the resource
    Permission,
    NotFound,
    Conflict,
    RateLimited,
    Timeout,
    /// Connection-level failure before a response arrived
    Network,
    /// Upstream 5xx
    Unavailable,
    Other,
}

impl UpstreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpstreamKind::InvalidParams => "invalid_params",
            UpstreamKind::Validation => "validation",
            UpstreamKind::Unauthorized => "unauthorized",
            UpstreamKind::Permission => "permission",
            UpstreamKind::NotFound => "not_found",
            UpstreamKind::Conflict => "conflict",
            UpstreamKind::RateLimited => "rate_limited",
            UpstreamKind::Timeout => "timeout",
            UpstreamKind::Network => "network",
            UpstreamKind::Unavailable => "unavailable",
            UpstreamKind::Other => "other",
        }
    }
}

/// A failed downstream call, with whatever detail the upstream provided.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UpstreamFailure {
    pub kind: UpstreamKind,
    pub message: String,
    /// HTTP status, when the failure came with a response
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl UpstreamFailure {
    pub fn new(kind: UpstreamKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn invalid_params(err: impl fmt::Display) -> Self {
        Self::new(UpstreamKind::InvalidParams, format!("Invalid parameters: {}", err))
    }
}

impl fmt::Display for UpstreamFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} ({}): {}", self.kind.as_str(), status, self.message),
            None => write!(f, "{}: {}", self.kind.as_str(), self.message),
        }
    }
}

impl std::error::Error for UpstreamFailure {}

/// Why an invocation did not succeed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "class", rename_all = "snake_case")]
pub enum Failure {
    /// The authorization authority could not produce a challenge URL
    AuthorityUnavailable { message: String },
    /// The downstream operation failed
    Upstream(UpstreamFailure),
}

impl Failure {
    pub fn message(&self) -> &str {
        match self {
            Failure::AuthorityUnavailable { message } => message,
            Failure::Upstream(failure) => &failure.message,
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::AuthorityUnavailable { message } => {
                write!(f, "Authorization authority unavailable: {}", message)
            }
            Failure::Upstream(failure) => write!(f, "Upstream operation failed: {}", failure),
        }
    }
}

/// Challenge issued to an agent with no usable credential.
///
/// Never stored; the authority's own expiry policy governs the URL.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Challenge {
    pub agent_id: String,
    pub provider: String,
    pub authorization_url: String,
}

/// Outcome of one gated invocation.
///
/// Callers can always tell "authorization required", "failed" and "succeeded"
/// apart; no failure is reported as an empty success.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Invocation {
    NeedsAuthorization { challenge: Challenge },
    Success { data: Value },
    Failure { error: Failure },
}

impl Invocation {
    pub fn is_success(&self) -> bool {
        matches!(self, Invocation::Success { .. })
    }
}

/// Registered operations by name.
#[derive(Default, Clone)]
pub struct OperationRegistry {
    operations: BTreeMap<String, Arc<dyn Operation>>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an operation, replacing any earlier one with the same name.
    pub fn register(&mut self, operation: Arc<dyn Operation>) {
        self.operations
            .insert(operation.name().to_string(), operation);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Operation>> {
        self.operations.get(name).cloned()
    }

    /// (name, description) pairs in name order.
    pub fn list(&self) -> Vec<(String, String)> {
        self.operations
            .values()
            .map(|op| (op.name().to_string(), op.description().to_string()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}
