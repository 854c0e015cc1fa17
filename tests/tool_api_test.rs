// Integration tests for /api/tools and /api/credentials

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use pagegate::api::{create_router, ApiKeyAuth, OAuthAppState, ToolAppState};
use pagegate::authority::{OAuth2Authority, ProviderConfig, ProviderSettings};
use pagegate::config::OAuthConfig;
use pagegate::credentials::{AgentId, CredentialSet, CredentialStore};
use pagegate::operation::OperationRegistry;
use pagegate::{AuthorizationGate, GatePolicy, Operation, UpstreamFailure, UpstreamKind};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

const API_KEY: &str = "test-key";

/// Echoes the caller's token and params back.
struct WhoAmI;

#[async_trait]
impl Operation for WhoAmI {
    fn name(&self) -> &str {
        "whoami"
    }

    fn description(&self) -> &str {
        "Returns the caller's access token"
    }

    async fn perform(
        &self,
        credentials: &CredentialSet,
        params: Value,
    ) -> Result<Value, UpstreamFailure> {
        Ok(json!({ "token": credentials.access_token, "params": params }))
    }
}

/// Always fails with a permission error.
struct Forbidden;

#[async_trait]
impl Operation for Forbidden {
    fn name(&self) -> &str {
        "forbidden"
    }

    fn description(&self) -> &str {
        "Fails with a permission error"
    }

    async fn perform(&self, _: &CredentialSet, _: Value) -> Result<Value, UpstreamFailure> {
        Err(UpstreamFailure::new(UpstreamKind::Permission, "no access to page").with_status(403))
    }
}

struct TestApp {
    router: Router,
    gate: Arc<AuthorizationGate>,
}

fn create_test_app() -> TestApp {
    let authority = Arc::new(
        OAuth2Authority::new(&OAuthConfig::default(), "http://localhost:2022")
            .unwrap()
            .with_provider(
                "notion",
                ProviderConfig {
                    settings: ProviderSettings::notion(),
                    client_id: "cid".to_string(),
                    client_secret: "csecret".to_string(),
                },
            ),
    );
    let gate = Arc::new(AuthorizationGate::new(
        Arc::new(CredentialStore::in_memory()),
        authority.clone(),
        "notion",
        GatePolicy::default(),
    ));

    let mut operations = OperationRegistry::new();
    operations.register(Arc::new(WhoAmI));
    operations.register(Arc::new(Forbidden));

    let router = create_router(
        ToolAppState {
            gate: Arc::clone(&gate),
            operations: Arc::new(operations),
        },
        OAuthAppState {
            gate: Arc::clone(&gate),
            authority,
        },
        ApiKeyAuth::new(API_KEY),
    );

    TestApp { router, gate }
}

fn agent(id: &str) -> AgentId {
    AgentId::new(id).unwrap()
}

fn invoke(tool: &str, agent_id: Option<&str>, body: &str) -> Request<Body> {
    invoke_with_key(tool, agent_id, Some(API_KEY), body)
}

fn invoke_with_key(
    tool: &str,
    agent_id: Option<&str>,
    api_key: Option<&str>,
    body: &str,
) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(format!("/api/tools/{}/invoke", tool))
        .header("content-type", "application/json");
    if let Some(key) = api_key {
        builder = builder.header("Authorization", format!("Bearer {}", key));
    }
    if let Some(id) = agent_id {
        builder = builder.header("X-Agent-Id", id);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

/// GET /api/tools lists registered tools with the gate's provider.
#[tokio::test]
async fn test_list_tools() {
    let app = create_test_app();

    let response = app
        .router
        .oneshot(
            Request::builder()
                .uri("/api/tools")
                .header("Authorization", format!("Bearer {}", API_KEY))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["provider"], "notion");
    assert_eq!(body["tools"][0]["name"], "forbidden");
    assert_eq!(body["tools"][1]["name"], "whoami");
}

#[tokio::test]
async fn test_health() {
    let app = create_test_app();
    let response = app
        .router
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

/// Missing X-Agent-Id is rejected before the gate.
#[tokio::test]
async fn test_invoke_without_agent_header() {
    let app = create_test_app();
    let response = app.router.oneshot(invoke("whoami", None, "{}")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_invoke_unknown_tool() {
    let app = create_test_app();
    let response = app
        .router
        .oneshot(invoke("does-not-exist", Some("a1"), "{}"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invoke_malformed_body() {
    let app = create_test_app();
    let response = app
        .router
        .oneshot(invoke("whoami", Some("a1"), "{not json"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

/// An agent with no credential gets a challenge naming itself.
#[tokio::test]
async fn test_invoke_without_credential_returns_challenge() {
    let app = create_test_app();
    let response = app
        .router
        .oneshot(invoke("whoami", Some("a1"), "{}"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = json_body(response).await;
    assert_eq!(body["status"], "needs_authorization");
    assert_eq!(body["challenge"]["agent_id"], "a1");
    assert_eq!(body["challenge"]["provider"], "notion");

    let url = body["challenge"]["authorization_url"].as_str().unwrap();
    assert!(url.starts_with("https://api.notion.com/v1/oauth/authorize?"));
    assert!(url.contains("state="));
    assert!(!app.gate.is_authorized(&agent("a1")));
}

/// After a grant the agent's own token reaches the operation.
#[tokio::test]
async fn test_invoke_after_grant_succeeds() {
    let app = create_test_app();
    app.gate
        .on_grant(&agent("a1"), CredentialSet::new("tok-a1"))
        .await
        .unwrap();

    let response = app
        .router
        .oneshot(invoke("whoami", Some("a1"), r#"{"pageId": "p1"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "success");
    assert_eq!(body["data"]["token"], "tok-a1");
    assert_eq!(body["data"]["params"]["pageId"], "p1");
}

/// Empty body means empty params.
#[tokio::test]
async fn test_invoke_empty_body() {
    let app = create_test_app();
    app.gate
        .on_grant(&agent("a1"), CredentialSet::new("tok-a1"))
        .await
        .unwrap();

    let response = app.router.oneshot(invoke("whoami", Some("a1"), "")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["data"]["params"], json!({}));
}

/// One agent's grant does not authorize another.
#[tokio::test]
async fn test_grants_are_per_agent() {
    let app = create_test_app();
    app.gate
        .on_grant(&agent("a1"), CredentialSet::new("tok-a1"))
        .await
        .unwrap();

    let response = app
        .router
        .oneshot(invoke("whoami", Some("a2"), "{}"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["challenge"]["agent_id"], "a2");
}

/// Upstream failures keep their classification and are not challenges.
#[tokio::test]
async fn test_upstream_failure_is_reported() {
    let app = create_test_app();
    app.gate
        .on_grant(&agent("a1"), CredentialSet::new("tok-a1"))
        .await
        .unwrap();

    let response = app
        .router
        .oneshot(invoke("forbidden", Some("a1"), "{}"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = json_body(response).await;
    assert_eq!(body["status"], "failure");
    assert_eq!(body["error"]["class"], "upstream");
    assert_eq!(body["error"]["kind"], "permission");
    assert_eq!(body["error"]["status"], 403);

    // The credential survives an upstream failure
    assert!(app.gate.is_authorized(&agent("a1")));
}

/// DELETE /api/credentials drops only the caller's credential.
#[tokio::test]
async fn test_revoke_credentials() {
    let app = create_test_app();
    app.gate
        .on_grant(&agent("a1"), CredentialSet::new("tok-a1"))
        .await
        .unwrap();
    app.gate
        .on_grant(&agent("a2"), CredentialSet::new("tok-a2"))
        .await
        .unwrap();

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/api/credentials")
                .header("Authorization", format!("Bearer {}", API_KEY))
                .header("X-Agent-Id", "a1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["success"], true);
    assert!(!app.gate.is_authorized(&agent("a1")));
    assert!(app.gate.is_authorized(&agent("a2")));

    let response = app
        .router
        .oneshot(invoke("whoami", Some("a1"), "{}"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

fn revoke_with_key(agent_id: &str, api_key: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("DELETE")
        .uri("/api/credentials")
        .header("X-Agent-Id", agent_id);
    if let Some(key) = api_key {
        builder = builder.header("Authorization", format!("Bearer {}", key));
    }
    builder.body(Body::empty()).unwrap()
}

fn authorize(agent_id: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/authorize")
        .header("Authorization", format!("Bearer {}", API_KEY))
        .header("X-Agent-Id", agent_id)
        .body(Body::empty())
        .unwrap()
}

/// A caller that only knows another agent's id cannot use its credential.
#[tokio::test]
async fn test_invoke_without_api_key_is_rejected() {
    let app = create_test_app();
    app.gate
        .on_grant(&agent("victim"), CredentialSet::new("victim-secret"))
        .await
        .unwrap();

    for key in [None, Some("wrong-key"), Some("")] {
        let response = app
            .router
            .clone()
            .oneshot(invoke_with_key("whoami", Some("victim"), key, "{}"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = json_body(response).await;
        // Rejected by the key check, not answered with a gate challenge
        assert!(body["error"].is_string());
        assert!(body.get("status").is_none());
        assert!(!body.to_string().contains("victim-secret"));
    }

    assert!(app.gate.is_authorized(&agent("victim")));
}

/// Revoke needs the API key too.
#[tokio::test]
async fn test_revoke_without_api_key_is_rejected() {
    let app = create_test_app();
    app.gate
        .on_grant(&agent("victim"), CredentialSet::new("victim-secret"))
        .await
        .unwrap();

    for key in [None, Some("wrong-key")] {
        let response = app
            .router
            .clone()
            .oneshot(revoke_with_key("victim", key))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    assert!(app.gate.is_authorized(&agent("victim")));
}

/// The tool list is behind the key; /health is not.
#[tokio::test]
async fn test_list_tools_without_api_key_is_rejected() {
    let app = create_test_app();
    let response = app
        .router
        .oneshot(
            Request::builder()
                .uri("/api/tools")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

/// With auth disabled the agent header alone is accepted.
#[tokio::test]
async fn test_auth_disabled_accepts_agent_header() {
    let authority = Arc::new(
        OAuth2Authority::new(&OAuthConfig::default(), "http://localhost:2022").unwrap(),
    );
    let gate = Arc::new(AuthorizationGate::new(
        Arc::new(CredentialStore::in_memory()),
        authority.clone(),
        "notion",
        GatePolicy::default(),
    ));
    gate.on_grant(&agent("a1"), CredentialSet::new("tok-a1"))
        .await
        .unwrap();

    let mut operations = OperationRegistry::new();
    operations.register(Arc::new(WhoAmI));
    let router = create_router(
        ToolAppState {
            gate: Arc::clone(&gate),
            operations: Arc::new(operations),
        },
        OAuthAppState { gate, authority },
        ApiKeyAuth::disabled(),
    );

    let response = router
        .oneshot(invoke_with_key("whoami", Some("a1"), None, "{}"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["data"]["token"], "tok-a1");
}

/// POST /api/authorize challenges even an agent that already holds a credential.
#[tokio::test]
async fn test_authorize_when_already_authorized() {
    let app = create_test_app();
    app.gate
        .on_grant(&agent("a1"), CredentialSet::new("tok-a1"))
        .await
        .unwrap();

    let response = app.router.clone().oneshot(authorize("a1")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "needs_authorization");
    assert_eq!(body["challenge"]["agent_id"], "a1");
    let url = body["challenge"]["authorization_url"].as_str().unwrap();
    assert!(url.contains("state="));

    // The existing credential stays usable until the new grant replaces it
    assert!(app.gate.is_authorized(&agent("a1")));
    let response = app
        .router
        .oneshot(invoke("whoami", Some("a1"), "{}"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

/// POST /api/authorize works for an agent with no credential and needs the key.
#[tokio::test]
async fn test_authorize_route() {
    let app = create_test_app();

    let response = app.router.clone().oneshot(authorize("a2")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["challenge"]["agent_id"], "a2");

    let response = app
        .router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/authorize")
                .header("X-Agent-Id", "a2")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
