//! Gateway configuration.
//!
//! A small TOML file; every key has a default so a missing file starts a
//! local gateway with an on-disk database and no LIS query endpoint.

use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;
use tracing::info;

/// Top-level gateway settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Address the instrument listener binds to.
    pub listen_addr: String,

    /// SQLite database file.
    pub database_path: String,

    /// LIS endpoint answering ASTM sample queries. Empty disables the
    /// query flow; query frames then fail their post-decode action and are
    /// logged.
    pub query_host: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:5600".to_string(),
            database_path: "labgate.db".to_string(),
            query_host: String::new(),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from a TOML file; a missing file yields the
    /// defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            info!("config file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }

        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&text)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.listen_addr, "0.0.0.0:5600");
        assert_eq!(config.database_path, "labgate.db");
        assert!(config.query_host.is_empty());
    }

    #[test]
    fn test_parse_partial_file_fills_defaults() {
        let config: GatewayConfig =
            toml::from_str("query_host = \"http://lis.local/query\"").unwrap();
        assert_eq!(config.query_host, "http://lis.local/query");
        assert_eq!(config.listen_addr, "0.0.0.0:5600");
    }

    #[test]
    fn test_parse_full_file() {
        let config: GatewayConfig = toml::from_str(
            r#"
            listen_addr = "127.0.0.1:7000"
            database_path = "/var/lib/labgate/labgate.db"
            query_host = "http://lis.local/query"
            "#,
        )
        .unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:7000");
        assert_eq!(config.database_path, "/var/lib/labgate/labgate.db");
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = GatewayConfig::load(Path::new("/nonexistent/labgate.toml")).unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:5600");
    }
}
