use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use contextdoc_llm::{LlmClient, LlmProvider};
use contextdoc_pipeline::PipelineConfig;
use serde::Deserialize;

const DEFAULT_CONFIG_PATH: &str = "contextdoc.toml";
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub bind_addr: Option<String>,
    pub pipeline: PipelineConfig,
    pub provider: ProviderSettings,
    pub store: StoreSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub name: String,
    /// Falls back to the provider's default model.
    pub model: Option<String>,
    pub request_timeout_secs: Option<u64>,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            name: "openai".to_string(),
            model: None,
            request_timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub path: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            path: "contextdoc.sqlite".to_string(),
        }
    }
}

impl ServiceConfig {
    /// Reads `CONTEXTDOC_CONFIG` (or `contextdoc.toml`) when present, then
    /// applies environment overrides.
    pub fn load() -> anyhow::Result<Self> {
        let config_path = std::env::var("CONTEXTDOC_CONFIG")
            .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut config = Self::from_path(Path::new(&config_path))?;
        config.apply_overrides(|name| std::env::var(name).ok());
        config.pipeline.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("parsing {}", path.display()))
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(name) = lookup("CONTEXTDOC_PROVIDER") {
            self.provider.name = name;
        }
        if let Some(model) = lookup("CONTEXTDOC_MODEL") {
            self.provider.model = Some(model);
        }
        if let Some(path) = lookup("CONTEXTDOC_DB") {
            self.store.path = path;
        }
        if let Some(addr) = lookup("BIND_ADDR") {
            self.bind_addr = Some(addr);
        }
    }

    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        let addr = self.bind_addr.as_deref().unwrap_or(DEFAULT_BIND_ADDR);
        addr.parse()
            .with_context(|| format!("invalid bind address {addr}"))
    }

    pub fn build_client(&self) -> anyhow::Result<LlmClient> {
        let provider: LlmProvider = self.provider.name.parse()?;
        let model = self
            .provider
            .model
            .clone()
            .unwrap_or_else(|| provider.default_model().to_string());
        let client = LlmClient::new(provider, model)?;
        match self.provider.request_timeout_secs {
            Some(secs) if secs > 0 => Ok(client.with_request_timeout(Duration::from_secs(secs))?),
            _ => Ok(client),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contextdoc_pipeline::TokenPolicy;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServiceConfig::from_path(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.provider.name, "openai");
        assert_eq!(config.store.path, "contextdoc.sqlite");
        assert_eq!(config.bind_addr().unwrap().port(), 8000);
    }

    #[test]
    fn file_sections_are_read() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
bind_addr = "127.0.0.1:9100"

[pipeline]
max_tokens_per_chunk = 800
overlap_tokens = 80
token_policy = "strict"

[provider]
name = "local"

[store]
path = "/tmp/docs.sqlite"
"#
        )
        .unwrap();
        let config = ServiceConfig::from_path(file.path()).unwrap();
        assert_eq!(config.pipeline.max_tokens_per_chunk, 800);
        assert_eq!(config.pipeline.token_policy, TokenPolicy::Strict);
        assert_eq!(config.pipeline.context_tail_chars, 1500);
        assert_eq!(config.provider.name, "local");
        assert_eq!(config.store.path, "/tmp/docs.sqlite");
        assert_eq!(config.bind_addr().unwrap().port(), 9100);
        assert_eq!(config.build_client().unwrap().provider(), LlmProvider::Local);
    }

    #[test]
    fn environment_overrides_file_values() {
        let env: HashMap<&str, &str> = [
            ("CONTEXTDOC_PROVIDER", "anthropic"),
            ("CONTEXTDOC_MODEL", "claude-3-5-haiku-latest"),
            ("CONTEXTDOC_DB", "override.sqlite"),
        ]
        .into_iter()
        .collect();
        let mut config = ServiceConfig::default();
        config.apply_overrides(|name| env.get(name).map(|v| v.to_string()));
        assert_eq!(config.provider.name, "anthropic");
        assert_eq!(
            config.provider.model.as_deref(),
            Some("claude-3-5-haiku-latest")
        );
        assert_eq!(config.store.path, "override.sqlite");
        assert_eq!(config.bind_addr, None);
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let mut config = ServiceConfig::default();
        config.provider.name = "carrier-pigeon".to_string();
        assert!(config.build_client().is_err());
    }
}
