//! `[notion]` section of the pagegate config file.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct NotionSettings {
    /// Notion API base URL (override for testing)
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

fn default_base_url() -> String {
    crate::client::BASE_URL.to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for NotionSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

impl NotionSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

#[derive(Deserialize)]
struct NotionSection {
    #[serde(default)]
    notion: NotionSettings,
}

/// Read the `[notion]` section from a config file; other sections are ignored.
pub fn load_notion_settings<P: AsRef<Path>>(path: P) -> Result<NotionSettings> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    parse_notion_settings(&contents)
        .with_context(|| format!("Invalid config file {}", path.display()))
}

fn parse_notion_settings(contents: &str) -> Result<NotionSettings> {
    let section: NotionSection = toml::from_str(contents)?;
    Ok(section.notion)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_section_missing() {
        let settings =
            parse_notion_settings("[server]\nbind_addr = \"127.0.0.1:9000\"\n").unwrap();
        assert_eq!(settings.base_url, "https://api.notion.com/v1");
        assert_eq!(settings.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_notion_section_overrides() {
        let settings = parse_notion_settings(
            r#"
            [notion]
            base_url = "http://127.0.0.1:4010"
            request_timeout_seconds = 5
            "#,
        )
        .unwrap();
        assert_eq!(settings.base_url, "http://127.0.0.1:4010");
        assert_eq!(settings.request_timeout_seconds, 5);
    }
}
