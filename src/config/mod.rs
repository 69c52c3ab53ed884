//! Application configuration
//!
//! Loaded from a TOML file discovered via the platform config directories
//! (or the `MAILDESK_CONFIG` environment variable), with serde defaults for
//! every tunable so an empty file is a valid configuration.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::info;

use crate::types::error::MaildeskError;

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// SQLite database file path (default: platform data dir)
    pub database_path: Option<PathBuf>,

    #[serde(default)]
    pub oauth: OAuthConfig,

    #[serde(default)]
    pub sync: SyncSettings,
}

/// OAuth client configuration for the token endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthConfig {
    /// Registered application client id
    #[serde(default)]
    pub client_id: String,

    /// Client secret (confidential client)
    #[serde(default)]
    pub client_secret: String,

    /// Token endpoint URL
    #[serde(default = "default_token_url")]
    pub token_url: String,

    /// Redirect URI used during the authorization-code exchange
    #[serde(default)]
    pub redirect_uri: String,

    /// Scopes requested on refresh
    #[serde(default = "default_scope")]
    pub scope: String,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            token_url: default_token_url(),
            redirect_uri: String::new(),
            scope: default_scope(),
        }
    }
}

/// Reconciliation tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Bound on re-scan cost: messages older than this are never re-listed
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,

    /// Scheduler tick interval in seconds
    #[serde(default = "default_tick_interval")]
    pub tick_interval_seconds: u64,

    /// Assign newly created tickets to the least-loaded active agent
    #[serde(default = "default_true")]
    pub auto_assign: bool,

    /// Page size for message listing
    #[serde(default = "default_page_size")]
    pub fetch_page_size: usize,

    /// Subject keywords that force high priority
    #[serde(default = "default_urgent_keywords")]
    pub urgent_keywords: Vec<String>,

    /// Subject keywords that raise priority to medium
    #[serde(default = "default_important_keywords")]
    pub important_keywords: Vec<String>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            lookback_days: default_lookback_days(),
            tick_interval_seconds: default_tick_interval(),
            auto_assign: true,
            fetch_page_size: default_page_size(),
            urgent_keywords: default_urgent_keywords(),
            important_keywords: default_important_keywords(),
        }
    }
}

fn default_token_url() -> String {
    "https://login.microsoftonline.com/common/oauth2/v2.0/token".to_string()
}

fn default_scope() -> String {
    "https://graph.microsoft.com/.default offline_access".to_string()
}

fn default_lookback_days() -> u32 {
    7
}

fn default_tick_interval() -> u64 {
    60
}

fn default_page_size() -> usize {
    50
}

fn default_true() -> bool {
    true
}

fn default_urgent_keywords() -> Vec<String> {
    ["urgent", "urgente", "critical", "crítico"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_important_keywords() -> Vec<String> {
    ["important", "importante", "asap"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Get default config paths
pub fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Ok(path) = std::env::var("MAILDESK_CONFIG") {
        paths.push(PathBuf::from(path));
    }

    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("maildesk").join("config.toml"));
    }

    if let Some(home_dir) = dirs::home_dir() {
        paths.push(home_dir.join(".config").join("maildesk").join("config.toml"));
    }

    paths
}

/// Default database location when the config does not name one
pub fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("maildesk")
        .join("maildesk.db")
}

impl AppConfig {
    /// Load configuration from the first existing default path,
    /// falling back to built-in defaults when no file is present
    pub fn load() -> Result<Self, MaildeskError> {
        for path in default_config_paths() {
            if path.exists() {
                info!("Loading configuration from: {:?}", path);
                return Self::load_from_path(&path);
            }
        }

        info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &PathBuf) -> Result<Self, MaildeskError> {
        let content = fs::read_to_string(path)
            .map_err(|e| MaildeskError::Config(format!("Failed to read config: {}", e)))?;

        let config: AppConfig = toml::from_str(&content)
            .map_err(|e| MaildeskError::Config(format!("Failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Resolved database path
    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(default_database_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_is_valid() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.sync.lookback_days, 7);
        assert!(config.sync.auto_assign);
        assert!(config.oauth.token_url.contains("oauth2/v2.0/token"));
    }

    #[test]
    fn test_partial_override_keeps_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [sync]
            lookback_days = 3
            auto_assign = false
            "#,
        )
        .unwrap();
        assert_eq!(config.sync.lookback_days, 3);
        assert!(!config.sync.auto_assign);
        assert_eq!(config.sync.tick_interval_seconds, 60);
        assert!(config
            .sync
            .urgent_keywords
            .iter()
            .any(|k| k == "urgente"));
    }
}
