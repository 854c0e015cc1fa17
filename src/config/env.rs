use super::GateConfig;

/// Env var holding the base64 32-byte master key for credential persistence.
pub const ENCRYPTION_KEY_VAR: &str = "PAGEGATE_ENCRYPTION_KEY";

/// Env var holding the API key the agent host presents as a bearer token.
pub const API_KEY_VAR: &str = "PAGEGATE_API_KEY";

/// Env var naming the TOML config file.
pub const CONFIG_PATH_VAR: &str = "PAGEGATE_CONFIG";

impl GateConfig {
    /// Apply env var overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|name| std::env::var(name).ok());
    }

    /// Apply overrides using `lookup` as the environment. Unparseable values are ignored.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("PAGEGATE_BIND_ADDR") {
            self.server.bind_addr = v;
        }
        if let Some(v) = lookup("PAGEGATE_PUBLIC_URL") {
            self.server.public_url = v.trim_end_matches('/').to_string();
        }
        if let Some(v) = lookup("PAGEGATE_PROVIDER") {
            self.gate.provider = v;
        }
        if let Some(v) = lookup("PAGEGATE_REFRESH_EXPIRED") {
            if let Ok(b) = v.parse::<bool>() {
                self.gate.refresh_expired = b;
            }
        }
        if let Some(v) = lookup("PAGEGATE_PERSIST") {
            if let Ok(b) = v.parse::<bool>() {
                self.storage.persist = b;
            }
        }
        if let Some(v) = lookup("PAGEGATE_CREDENTIALS_DB") {
            self.storage.database_path = v;
        }
        if let Some(v) = lookup(API_KEY_VAR) {
            self.auth.api_key = Some(v);
        }
        if let Some(v) = lookup("PAGEGATE_AUTH_ENABLED") {
            if let Ok(b) = v.parse::<bool>() {
                self.auth.enabled = b;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("PAGEGATE_BIND_ADDR", "127.0.0.1:9000"),
            ("PAGEGATE_PUBLIC_URL", "https://tunnel.example.com/"),
            ("PAGEGATE_PERSIST", "true"),
            ("PAGEGATE_CREDENTIALS_DB", "/tmp/creds.db"),
            ("PAGEGATE_API_KEY", "svc-key-1"),
        ]);

        let mut config = GateConfig::default();
        config.apply_env_from(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(config.server.bind_addr, "127.0.0.1:9000");
        assert_eq!(config.server.public_url, "https://tunnel.example.com");
        assert!(config.storage.persist);
        assert_eq!(config.storage.database_path, "/tmp/creds.db");
        assert_eq!(config.auth.api_key.as_deref(), Some("svc-key-1"));
        assert!(config.auth.enabled);
        assert_eq!(config.gate.provider, "notion"); // untouched
    }

    #[test]
    fn test_unparseable_values_ignored() {
        let mut config = GateConfig::default();
        config.apply_env_from(|name| match name {
            "PAGEGATE_REFRESH_EXPIRED" => Some("maybe".to_string()),
            _ => None,
        });
        assert!(config.gate.refresh_expired);
    }
}
