//! Token endpoint calls: authorization-code exchange and refresh.

use super::provider::{ClientAuth, ProviderConfig};
use crate::credentials::CredentialSet;
use anyhow::{anyhow, Context, Result};
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// OAuth token response (standard OAuth 2.0 plus provider extras)
#[derive(Deserialize, Debug)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    /// Space-separated granted scopes
    #[serde(default)]
    scope: Option<String>,
    /// Everything else (Notion: workspace_id, workspace_name, bot_id, ...)
    #[serde(flatten)]
    extra: HashMap<String, Value>,
}

impl TokenResponse {
    fn into_credentials(self, requested_scopes: &[String]) -> CredentialSet {
        let expires_at = self
            .expires_in
            .map(|seconds| Utc::now() + Duration::seconds(seconds));

        // Providers that omit `scope` granted what was asked for
        let scopes = match self.scope {
            Some(scope) => scope.split_whitespace().map(str::to_string).collect(),
            None => requested_scopes.to_vec(),
        };

        // Keep scalar extras only; nested objects (e.g. Notion's `owner`) are dropped
        let metadata: BTreeMap<String, String> = self
            .extra
            .into_iter()
            .filter_map(|(key, value)| match value {
                Value::String(s) => Some((key, s)),
                Value::Number(n) => Some((key, n.to_string())),
                Value::Bool(b) => Some((key, b.to_string())),
                _ => None,
            })
            .collect();

        CredentialSet {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            scopes,
            metadata,
        }
    }
}

async fn request_token(
    http: &reqwest::Client,
    provider: &ProviderConfig,
    params: &[(&str, &str)],
) -> Result<TokenResponse> {
    let token_url = &provider.settings.token_url;
    let request = http.post(token_url).header("Accept", "application/json");

    let request = match provider.settings.client_auth {
        ClientAuth::Basic => {
            let body: HashMap<&str, &str> = params.iter().copied().collect();
            request
                .basic_auth(&provider.client_id, Some(&provider.client_secret))
                .json(&body)
        }
        ClientAuth::RequestBody => {
            let mut form: Vec<(&str, &str)> = params.to_vec();
            form.push(("client_id", provider.client_id.as_str()));
            form.push(("client_secret", provider.client_secret.as_str()));
            request.form(&form)
        }
    };

    tracing::debug!(token_url = %token_url, "Requesting token");

    let response = request
        .send()
        .await
        .context("Failed to send token request")?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(anyhow!("Token request failed with status {}: {}", status, body));
    }

    response
        .json::<TokenResponse>()
        .await
        .context("Failed to parse token response")
}

/// Exchange an authorization code for a credential set
pub async fn exchange_code_for_token(
    http: &reqwest::Client,
    provider: &ProviderConfig,
    code: &str,
    redirect_uri: &str,
) -> Result<CredentialSet> {
    let response = request_token(
        http,
        provider,
        &[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
        ],
    )
    .await?;

    tracing::debug!(
        has_refresh_token = response.refresh_token.is_some(),
        expires_in = ?response.expires_in,
        "Token exchange successful"
    );

    Ok(response.into_credentials(&provider.settings.scopes))
}

/// Use a refresh token to obtain a new credential set.
///
/// A response without a new refresh token keeps the old one; metadata the
/// refresh response omits is carried over from `current`.
pub async fn refresh_access_token(
    http: &reqwest::Client,
    provider: &ProviderConfig,
    current: &CredentialSet,
) -> Result<CredentialSet> {
    let refresh_token = current
        .refresh_token
        .as_deref()
        .ok_or_else(|| anyhow!("Credential has no refresh token"))?;

    let response = request_token(
        http,
        provider,
        &[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ],
    )
    .await?;

    let mut refreshed = response.into_credentials(&current.scopes);
    if refreshed.refresh_token.is_none() {
        refreshed.refresh_token = current.refresh_token.clone();
    }
    for (key, value) in &current.metadata {
        refreshed
            .metadata
            .entry(key.clone())
            .or_insert_with(|| value.clone());
    }

    Ok(refreshed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::provider::ProviderSettings;
    use mockito::{Matcher, Server};

    fn provider(token_url: String, client_auth: ClientAuth) -> ProviderConfig {
        ProviderConfig {
            settings: ProviderSettings {
                auth_url: "https://example.com/authorize".to_string(),
                token_url,
                scopes: vec!["page:write".to_string()],
                client_auth,
                extra_params: Default::default(),
            },
            client_id: "cid".to_string(),
            client_secret: "csecret".to_string(),
        }
    }

    #[test]
    fn test_token_response_deserialization() {
        let json = r#"{
            "access_token": "secret_123",
            "refresh_token": "refresh_456",
            "expires_in": 3600,
            "token_type": "bearer",
            "bot_id": "bot_1",
            "workspace_id": "ws_1",
            "workspace_name": "Team",
            "owner": {"type": "user"}
        }"#;

        let response: TokenResponse = serde_json::from_str(json).unwrap();
        let creds = response.into_credentials(&["page:write".to_string()]);
        assert_eq!(creds.access_token, "secret_123");
        assert_eq!(creds.refresh_token.as_deref(), Some("refresh_456"));
        assert!(creds.expires_at.is_some());
        assert_eq!(creds.scopes, vec!["page:write"]);
        assert_eq!(creds.metadata["workspace_id"], "ws_1");
        assert_eq!(creds.metadata["bot_id"], "bot_1");
        assert!(!creds.metadata.contains_key("owner"));
    }

    #[test]
    fn test_granted_scope_overrides_requested() {
        let response: TokenResponse =
            serde_json::from_str(r#"{"access_token": "t", "scope": "read write"}"#).unwrap();
        let creds = response.into_credentials(&["admin".to_string()]);
        assert_eq!(creds.scopes, vec!["read", "write"]);
        assert!(creds.expires_at.is_none());
    }

    #[tokio::test]
    async fn test_exchange_with_basic_auth() {
        let mut server = Server::new_async().await;
        // base64("cid:csecret")
        let mock = server
            .mock("POST", "/oauth/token")
            .match_header("authorization", "Basic Y2lkOmNzZWNyZXQ=")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "grant_type": "authorization_code",
                "code": "code_1",
                "redirect_uri": "http://localhost/cb"
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token": "tok1", "workspace_id": "ws_1"}"#)
            .create_async()
            .await;

        let provider = provider(format!("{}/oauth/token", server.url()), ClientAuth::Basic);
        let creds = exchange_code_for_token(
            &reqwest::Client::new(),
            &provider,
            "code_1",
            "http://localhost/cb",
        )
        .await
        .unwrap();

        mock.assert_async().await;
        assert_eq!(creds.access_token, "tok1");
        assert_eq!(creds.metadata["workspace_id"], "ws_1");
    }

    #[tokio::test]
    async fn test_exchange_with_form_body() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/oauth/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
                Matcher::UrlEncoded("client_id".into(), "cid".into()),
                Matcher::UrlEncoded("client_secret".into(), "csecret".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token": "tok2"}"#)
            .create_async()
            .await;

        let provider = provider(format!("{}/oauth/token", server.url()), ClientAuth::RequestBody);
        let creds = exchange_code_for_token(&reqwest::Client::new(), &provider, "c", "http://cb")
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(creds.access_token, "tok2");
    }

    #[tokio::test]
    async fn test_exchange_error_status() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/oauth/token")
            .with_status(400)
            .with_body(r#"{"error": "invalid_grant"}"#)
            .create_async()
            .await;

        let provider = provider(format!("{}/oauth/token", server.url()), ClientAuth::Basic);
        let err = exchange_code_for_token(&reqwest::Client::new(), &provider, "bad", "http://cb")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("400"));
        assert!(err.to_string().contains("invalid_grant"));
    }

    #[tokio::test]
    async fn test_refresh_keeps_old_refresh_token_and_metadata() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/oauth/token")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "grant_type": "refresh_token",
                "refresh_token": "ref1"
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token": "tok2", "expires_in": 3600}"#)
            .create_async()
            .await;

        let mut current = CredentialSet::new("tok1").with_refresh_token("ref1");
        current
            .metadata
            .insert("workspace_id".to_string(), "ws_1".to_string());

        let provider = provider(format!("{}/oauth/token", server.url()), ClientAuth::Basic);
        let refreshed = refresh_access_token(&reqwest::Client::new(), &provider, &current)
            .await
            .unwrap();

        assert_eq!(refreshed.access_token, "tok2");
        assert_eq!(refreshed.refresh_token.as_deref(), Some("ref1"));
        assert_eq!(refreshed.metadata["workspace_id"], "ws_1");
        assert!(refreshed.expires_at.is_some());
    }

    #[tokio::test]
    async fn test_refresh_without_refresh_token_fails() {
        let provider = provider("http://127.0.0.1:1/token".to_string(), ClientAuth::Basic);
        let result =
            refresh_access_token(&reqwest::Client::new(), &provider, &CredentialSet::new("t"))
                .await;
        assert!(result.is_err());
    }
}
