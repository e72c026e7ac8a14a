//! Chat CLI configuration
//!
//! Settings come from three layers, lowest priority first: built-in defaults, an optional
//! TOML file (`-c chat.toml`), then command-line flags. The `[sync]` table accepts any
//! subset of the engine's [`SyncConfig`]; missing keys keep their defaults.
//!
//! ```toml
//! url = "wss://example.invalid/api/sync"
//! username = "Ada"
//!
//! [sync.mutations]
//! ack_timeout = { secs = 10, nanos = 0 }
//! ```

use std::fs;
use std::path::Path;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use livesync_core::{Endpoint, SyncConfig};
use livesync_ws::WsTransportConfig;

use crate::cli::Cli;
use crate::error::{CliError, Result};

/// Local development backend
pub const DEFAULT_URL: &str = "ws://127.0.0.1:3210/api/sync";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Backend WebSocket URL
    pub url: String,
    /// Bearer token sent during the handshake
    pub credentials: Option<String>,
    /// Display name; a random `User NNNN` is picked when unset
    pub username: Option<String>,
    /// Engine settings
    pub sync: SyncConfig,
    /// WebSocket transport settings; reconnect policy defaults to `sync.reconnect`
    pub transport: Option<WsTransportConfig>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            credentials: None,
            username: None,
            sync: SyncConfig::default(),
            transport: None,
        }
    }
}

impl ChatConfig {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: ChatConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Layer command-line flags over the loaded values
    pub fn apply_cli(&mut self, cli: &Cli) -> Result<()> {
        if let Some(url) = &cli.url {
            debug!(url = %url, "URL overridden from command line");
            self.url = url.clone();
        }
        if let Some(username) = &cli.username {
            self.username = Some(validate_username(username)?);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(CliError::Config("url must not be empty".to_string()));
        }
        if let Some(username) = &self.username {
            validate_username(username)?;
        }
        self.sync
            .validate()
            .map_err(|e| CliError::Config(e.to_string()))?;
        if let Some(transport) = &self.transport {
            transport
                .validate()
                .map_err(|e| CliError::Config(e.to_string()))?;
        }
        Ok(())
    }

    pub fn endpoint(&self) -> Endpoint {
        let endpoint = Endpoint::new(self.url.clone());
        match &self.credentials {
            Some(token) => endpoint.with_credentials(token.clone()),
            None => endpoint,
        }
    }

    pub fn transport_config(&self) -> WsTransportConfig {
        self.transport
            .clone()
            .unwrap_or_else(|| WsTransportConfig::from_sync_config(&self.sync))
    }

    /// Configured username, or a freshly generated one
    pub fn resolve_username(&self) -> String {
        self.username.clone().unwrap_or_else(random_username)
    }
}

/// `User NNNN` with a random four-digit number
pub fn random_username() -> String {
    let id: u32 = rand::thread_rng().gen_range(1111..=9999);
    format!("User {id}")
}

/// Trim surrounding whitespace and reject names that end up empty
pub fn validate_username(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(CliError::InvalidUsername(
            "username must contain a non-whitespace character".to_string(),
        ));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::time::Duration;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ChatConfig::from_toml(
            r#"
            url = "wss://chat.example.invalid/api/sync"

            [sync.mutations]
            ack_timeout = { secs = 5, nanos = 0 }
            "#,
        )
        .unwrap();

        assert_eq!(config.url, "wss://chat.example.invalid/api/sync");
        assert_eq!(config.sync.mutations.ack_timeout, Duration::from_secs(5));
        assert_eq!(config.sync.outbound, SyncConfig::default().outbound);
        assert!(config.username.is_none());
        assert_eq!(
            config.transport_config(),
            WsTransportConfig::from_sync_config(&config.sync)
        );
    }

    #[test]
    fn test_blank_username_in_file_rejected() {
        let result = ChatConfig::from_toml(r#"username = "   ""#);
        assert!(matches!(result, Err(CliError::InvalidUsername(_))));
    }

    #[test]
    fn test_flags_override_file() {
        let mut config = ChatConfig::from_toml(r#"username = "FromFile""#).unwrap();
        let cli = Cli::parse_from([
            "livesync-chat",
            "--url",
            "ws://10.0.0.2:3210/api/sync",
            "--username",
            "  Ada  ",
            "watch",
        ]);
        config.apply_cli(&cli).unwrap();

        assert_eq!(config.url, "ws://10.0.0.2:3210/api/sync");
        assert_eq!(config.resolve_username(), "Ada");
    }

    #[test]
    fn test_random_username_format() {
        for _ in 0..50 {
            let name = random_username();
            let number: u32 = name.strip_prefix("User ").unwrap().parse().unwrap();
            assert!((1111..=9999).contains(&number));
        }
    }

    #[test]
    fn test_endpoint_carries_credentials() {
        let config = ChatConfig {
            credentials: Some("token".into()),
            ..ChatConfig::default()
        };
        assert_eq!(config.endpoint().credentials(), Some("token"));
        assert_eq!(config.endpoint().url(), DEFAULT_URL);
    }
}
