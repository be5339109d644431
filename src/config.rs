//! Startup configuration: TOML file with environment-variable overrides.

use anyhow::Context as _;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data_dir: PathBuf,
    pub bind_addr: String,
    pub generator: GeneratorConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data_dir: PathBuf::from("./data"),
            bind_addr: "127.0.0.1:8090".into(),
            generator: GeneratorConfig::default(),
        }
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        GeneratorConfig {
            base_url: "https://api.openai.com/v1/chat/completions".into(),
            api_key: None,
            model: "gpt-4o-mini".into(),
            timeout_secs: 30,
        }
    }
}

impl Config {
    /// Load from a TOML file if present, then apply env overrides. A missing
    /// file yields defaults; a malformed file is an error.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read config: {}", path.display()))?;
                toml::from_str(&raw)
                    .with_context(|| format!("failed to parse config: {}", path.display()))?
            }
            None => Config::default(),
        };

        if let Ok(dir) = std::env::var("BUDDYBOT_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(addr) = std::env::var("BUDDYBOT_BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Ok(url) = std::env::var("BUDDYBOT_GENERATOR_URL") {
            config.generator.base_url = url;
        }
        if let Ok(key) = std::env::var("BUDDYBOT_GENERATOR_API_KEY") {
            config.generator.api_key = Some(key);
        }
        if let Ok(model) = std::env::var("BUDDYBOT_GENERATOR_MODEL") {
            config.generator.model = model;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::Config;

    #[test]
    fn partial_toml_fills_in_defaults() {
        let config: Config = toml::from_str(
            r#"
            bind_addr = "0.0.0.0:9000"

            [generator]
            model = "local-test"
            "#,
        )
        .expect("partial config should parse");

        assert_eq!(config.bind_addr, "0.0.0.0:9000");
        assert_eq!(config.generator.model, "local-test");
        assert_eq!(config.generator.timeout_secs, 30);
        assert_eq!(config.data_dir, std::path::PathBuf::from("./data"));
    }
}
