use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

/// Server configuration, read once at startup from a JSON file. The path
/// comes from `HATGAME_CONFIG`, defaulting to `config.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(rename = "Host", default = "default_host")]
    pub host: String,
    #[serde(rename = "Port", default = "default_port")]
    pub port: u16,
    #[serde(rename = "DatabaseUrl")]
    pub database_url: String,
    #[serde(rename = "TokenTtlMinutes", default = "default_token_ttl")]
    pub token_ttl_minutes: i64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_token_ttl() -> i64 {
    15
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .with_context(|| format!("could not read config file {}", path.display()))?;
        let config: Config = serde_json::from_str(&data)
            .with_context(|| format!("could not parse config file {}", path.display()))?;
        Ok(config)
    }

    pub fn from_env() -> anyhow::Result<Self> {
        let path =
            std::env::var("HATGAME_CONFIG").unwrap_or_else(|_| "config.json".to_string());
        Self::from_file(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_config_with_defaults() {
        let config: Config = serde_json::from_str(
            r#"{"DatabaseUrl": "sqlite::memory:"}"#,
        )
        .unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8080);
        assert_eq!(config.token_ttl_minutes, 15);
        assert_eq!(config.database_url, "sqlite::memory:");
    }

    #[test]
    fn explicit_values_win() {
        let config: Config = serde_json::from_str(
            r#"{"Host": "0.0.0.0", "Port": 9000, "DatabaseUrl": "sqlite://hat.db", "TokenTtlMinutes": 60}"#,
        )
        .unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.token_ttl_minutes, 60);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(Config::from_file("definitely/not/here.json").is_err());
    }
}
