use anyhow::{Context, Result};
use notion_tools::config::{load_notion_settings, NotionSettings};
use notion_tools::{notion_operations, NotionClient};
use pagegate::api::{create_router, ApiKeyAuth, OAuthAppState, ToolAppState};
use pagegate::authority::{run_state_cleanup, OAuth2Authority};
use pagegate::config::env::{CONFIG_PATH_VAR, ENCRYPTION_KEY_VAR};
use pagegate::config::{load_config, GateConfig};
use pagegate::credentials::{CredentialStore, SqliteBackend};
use pagegate::{AuthorizationGate, GatePolicy};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pagegate=info,notion_tools=info".into()),
        )
        .init();

    info!("pagegate-notion starting...");

    let config_path =
        std::env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| "pagegate.toml".to_string());
    let (mut config, notion) = if Path::new(&config_path).exists() {
        let config = load_config(&config_path)?;
        let notion = load_notion_settings(&config_path)?;
        info!(path = %config_path, "Configuration loaded");
        (config, notion)
    } else {
        warn!(path = %config_path, "Config file not found, using defaults");
        (GateConfig::default(), NotionSettings::default())
    };
    config.apply_env();
    config.validate().context("Invalid configuration")?;

    let auth = ApiKeyAuth::from_config(&config.auth)?;

    // Credential store
    let store = if config.storage.persist {
        let encryption_key = std::env::var(ENCRYPTION_KEY_VAR).with_context(|| {
            format!(
                "{} is required when storage.persist is set (base64-encoded 32-byte key)",
                ENCRYPTION_KEY_VAR
            )
        })?;
        let backend = SqliteBackend::open(&config.storage.database_path, &encryption_key)
            .context("Failed to open credential database")?;
        info!(path = %config.storage.database_path, "Credential persistence enabled");
        CredentialStore::with_backend(backend)?
    } else {
        CredentialStore::in_memory()
    };
    let store = Arc::new(store.with_expiry_leeway(chrono::Duration::seconds(
        config.gate.expiry_leeway_seconds,
    )));

    // OAuth authority
    let authority = Arc::new(
        OAuth2Authority::from_config(&config.oauth, &config.server.public_url)
            .context("Failed to initialize OAuth authority")?,
    );
    tokio::spawn(run_state_cleanup(
        authority.state_manager().clone(),
        config.oauth.cleanup_interval_seconds,
    ));

    let gate = Arc::new(AuthorizationGate::new(
        Arc::clone(&store),
        authority.clone(),
        config.gate.provider.clone(),
        GatePolicy {
            refresh_expired: config.gate.refresh_expired,
        },
    ));

    // Notion tools
    let client = Arc::new(
        NotionClient::with_base_url(notion.base_url.clone(), notion.request_timeout())
            .context("Failed to initialize Notion client")?,
    );
    let operations = Arc::new(notion_operations(client));
    info!(tools = operations.len(), provider = %gate.provider(), "Tools registered");

    let router = create_router(
        ToolAppState {
            gate: Arc::clone(&gate),
            operations,
        },
        OAuthAppState {
            gate: Arc::clone(&gate),
            authority,
        },
        auth,
    );

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_addr))?;
    info!(
        addr = %config.server.bind_addr,
        public_url = %config.server.public_url,
        "pagegate-notion listening"
    );

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for ctrl_c signal");
            }
            info!("Shutdown signal received");
        })
        .await
        .context("Server error")?;

    info!("pagegate-notion stopped");
    Ok(())
}
