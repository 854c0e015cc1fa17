//! pagegate: per-agent credential store and authorization gate for tool calls
//! against per-user-authorized APIs.
//!
//! ```text
//! agent ──invoke──▶ AuthorizationGate ──lookup──▶ CredentialStore
//!                        │   ▲                        ▲
//!              challenge │   │ on_grant               │ set
//!                        ▼   │                        │
//!               AuthorizationAuthority ───────────────┘
//!                        │
//!                        ▼ (credential present)
//!                    Operation ──▶ external API
//! ```

// Per-agent credential storage
pub mod credentials;

// External authorization authority (OAuth 2.0)
pub mod authority;

// Authorization gate
pub mod gate;

// Gated operations and classified results
pub mod operation;

// Agent identity extraction
pub mod auth;

// HTTP tool layer
pub mod api;

// Configuration
pub mod config;

pub use gate::{AuthorizationGate, GatePolicy};
pub use operation::{Failure, Invocation, Operation, UpstreamFailure, UpstreamKind};
