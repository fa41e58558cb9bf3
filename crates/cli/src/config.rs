//! Configuration loading from skipper.toml.

use serde::Deserialize;
use std::path::Path;
use toolserver::ServersConfig;

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Model backend configuration.
    #[serde(default)]
    pub backend: BackendConfig,

    /// Tool servers to launch, keyed by logical name.
    #[serde(default)]
    pub servers: ServersConfig,
}

/// Backend provider configuration.
#[derive(Debug, Deserialize)]
pub struct BackendConfig {
    /// Model to use.
    #[serde(default = "default_model")]
    pub model: String,

    /// Gemini API key. Falls back to the GEMINI_API_KEY environment
    /// variable when unset.
    pub api_key: Option<String>,

    /// Maximum output tokens per model turn.
    pub max_output_tokens: Option<u32>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            api_key: None,
            max_output_tokens: None,
        }
    }
}

fn default_model() -> String {
    "gemini-2.0-flash-lite".to_string()
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(toml: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Resolve the API key from config or environment.
    pub fn api_key(&self) -> Result<String, ConfigError> {
        if let Some(key) = &self.backend.api_key {
            return Ok(key.clone());
        }
        std::env::var("GEMINI_API_KEY").map_err(|_| ConfigError::MissingApiKey)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("API key not configured: set backend.api_key or GEMINI_API_KEY")]
    MissingApiKey,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_servers_and_backend() {
        let config = Config::parse(
            r#"
            [backend]
            model = "gemini-2.5-pro"
            api_key = "AIza-test"

            [servers.docs]
            command = "docs-server"
            args = ["--root", "."]

            [servers.docs.env]
            DOCS_TOKEN = "$DOCS_TOKEN"
            "#,
        )
        .unwrap();

        assert_eq!(config.backend.model, "gemini-2.5-pro");
        assert_eq!(config.api_key().unwrap(), "AIza-test");
        let docs = &config.servers["docs"];
        assert_eq!(docs.command, "docs-server");
        assert_eq!(docs.args, vec!["--root".to_string(), ".".to_string()]);
        assert_eq!(docs.env["DOCS_TOKEN"], "$DOCS_TOKEN");
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.backend.model, "gemini-2.0-flash-lite");
        assert!(config.servers.is_empty());
    }
}
