use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header::HeaderValue, Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::sleep;

use crate::{Generation, ProviderError, TextGenerator};

const MAX_RETRIES: usize = 6;
const ANTHROPIC_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_ANTHROPIC_MAX_TOKENS: u32 = 4096;
const LOCAL_SUMMARY_WORDS: usize = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAi,
    Anthropic,
    Local,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "openai",
            LlmProvider::Anthropic => "anthropic",
            LlmProvider::Local => "local",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "gpt-4o-mini",
            LlmProvider::Anthropic => "claude-3-5-sonnet-latest",
            LlmProvider::Local => "local",
        }
    }
}

impl FromStr for LlmProvider {
    type Err = ProviderError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "openai" => Ok(LlmProvider::OpenAi),
            "anthropic" => Ok(LlmProvider::Anthropic),
            "local" => Ok(LlmProvider::Local),
            other => Err(ProviderError::Config(format!("unknown provider {other}"))),
        }
    }
}

impl fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// HTTP client for the supported providers.
#[derive(Clone)]
pub struct LlmClient {
    http: Client,
    provider: LlmProvider,
    model: String,
    config: ProviderConfig,
}

#[derive(Clone)]
enum ProviderConfig {
    OpenAi { api_key: String, base_url: String },
    Anthropic { api_key: String, max_tokens: u32 },
    Local,
}

impl LlmClient {
    /// Builds a client, reading credentials from the environment
    /// (`OPENAI_API_KEY`, `OPENAI_BASE_URL`, `ANTHROPIC_API_KEY`,
    /// `ANTHROPIC_MAX_TOKENS`).
    pub fn new(provider: LlmProvider, model: impl Into<String>) -> Result<Self, ProviderError> {
        let config = match provider {
            LlmProvider::OpenAi => ProviderConfig::OpenAi {
                api_key: read_api_key("OPENAI_API_KEY", "sk-")?,
                base_url: env::var("OPENAI_BASE_URL")
                    .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            },
            LlmProvider::Anthropic => ProviderConfig::Anthropic {
                api_key: read_api_key("ANTHROPIC_API_KEY", "sk-ant-")?,
                max_tokens: env::var("ANTHROPIC_MAX_TOKENS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_ANTHROPIC_MAX_TOKENS),
            },
            LlmProvider::Local => ProviderConfig::Local,
        };
        Ok(Self {
            http: Client::new(),
            provider,
            model: model.into(),
            config,
        })
    }

    /// Offline provider producing a deterministic digest of the prompt.
    pub fn local() -> Self {
        Self {
            http: Client::new(),
            provider: LlmProvider::Local,
            model: LlmProvider::Local.default_model().to_string(),
            config: ProviderConfig::Local,
        }
    }

    /// Caps each HTTP request; rate-limit retries still apply on top.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Result<Self, ProviderError> {
        self.http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ProviderError::Config(err.to_string()))?;
        Ok(self)
    }

    pub fn provider(&self) -> LlmProvider {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn chat_openai(
        &self,
        api_key: &str,
        base_url: &str,
        instructions: &str,
        content: &str,
    ) -> Result<Generation, ProviderError> {
        let url = format!("{}/chat/completions", base_url.trim_end_matches('/'));
        let payload = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": instructions },
                { "role": "user", "content": content },
            ],
        });
        let response = self
            .send_with_retry(|| self.http.post(&url).bearer_auth(api_key).json(&payload))
            .await?;
        let value = decode_body(self.provider, response).await?;
        let text = extract_openai_text(&value).ok_or(ProviderError::MissingText {
            provider: self.provider.as_str(),
        })?;
        let usage: OpenAiUsage = value
            .get("usage")
            .and_then(|usage| serde_json::from_value(usage.clone()).ok())
            .unwrap_or_default();
        Ok(Generation {
            content: text,
            tokens_used: usage.total(),
        })
    }

    async fn chat_anthropic(
        &self,
        api_key: &str,
        max_tokens: u32,
        instructions: &str,
        content: &str,
    ) -> Result<Generation, ProviderError> {
        let payload = json!({
            "model": self.model,
            "max_tokens": max_tokens,
            "system": instructions,
            "messages": [ { "role": "user", "content": content } ],
        });
        let response = self
            .send_with_retry(|| {
                self.http
                    .post(ANTHROPIC_URL)
                    .header("x-api-key", api_key)
                    .header("anthropic-version", ANTHROPIC_VERSION)
                    .json(&payload)
            })
            .await?;
        let value = decode_body(self.provider, response).await?;
        let parsed: AnthropicResponse =
            serde_json::from_value(value).map_err(|err| ProviderError::Request {
                provider: self.provider.as_str(),
                message: format!("failed to decode response: {err}"),
            })?;
        let text = parsed
            .content
            .into_iter()
            .filter_map(|part| part.text)
            .collect::<Vec<_>>()
            .join("");
        if text.trim().is_empty() {
            return Err(ProviderError::MissingText {
                provider: self.provider.as_str(),
            });
        }
        let usage = parsed.usage.unwrap_or_default();
        Ok(Generation {
            content: text,
            tokens_used: u64::from(usage.input_tokens.unwrap_or(0))
                + u64::from(usage.output_tokens.unwrap_or(0)),
        })
    }

    fn chat_local(&self, instructions: &str, content: &str) -> Generation {
        let body = content
            .split_once("\n\n")
            .map(|(_, rest)| rest)
            .unwrap_or(content);
        let digest = summarize_text(body, LOCAL_SUMMARY_WORDS);
        let heading = instructions
            .lines()
            .find(|line| line.starts_with("Part "))
            .and_then(|line| line.split_once('.'))
            .map(|(part, _)| part.to_string())
            .unwrap_or_else(|| "Part".to_string());
        let text = format!("## {heading}\n\n{digest}");
        let tokens_used = (word_count(instructions) + word_count(content) + word_count(&text)) as u64;
        Generation {
            content: text,
            tokens_used,
        }
    }

    async fn send_with_retry<F>(&self, build: F) -> Result<Response, ProviderError>
    where
        F: Fn() -> RequestBuilder,
    {
        let provider = self.provider.as_str();
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            let response = match build().send().await {
                Ok(resp) => resp,
                Err(err) => {
                    if attempt > MAX_RETRIES || err.is_timeout() {
                        return Err(ProviderError::Request {
                            provider,
                            message: err.to_string(),
                        });
                    }
                    tracing::debug!(provider, attempt, error = %err, "retrying request");
                    sleep(backoff_delay(attempt, None)).await;
                    continue;
                }
            };
            if response.status() == StatusCode::TOO_MANY_REQUESTS {
                if attempt > MAX_RETRIES {
                    return Err(ProviderError::RateLimited {
                        provider,
                        attempts: attempt,
                    });
                }
                let wait = backoff_delay(attempt, response.headers().get("retry-after"));
                tracing::debug!(provider, attempt, wait_secs = wait.as_secs(), "rate limited");
                sleep(wait).await;
                continue;
            }
            return Ok(response);
        }
    }
}

#[async_trait]
impl TextGenerator for LlmClient {
    async fn generate(
        &self,
        instructions: &str,
        content: &str,
    ) -> Result<Generation, ProviderError> {
        match &self.config {
            ProviderConfig::OpenAi { api_key, base_url } => {
                self.chat_openai(api_key, base_url, instructions, content)
                    .await
            }
            ProviderConfig::Anthropic {
                api_key,
                max_tokens,
            } => {
                self.chat_anthropic(api_key, *max_tokens, instructions, content)
                    .await
            }
            ProviderConfig::Local => Ok(self.chat_local(instructions, content)),
        }
    }

    fn label(&self) -> String {
        format!("{}:{}", self.provider, self.model)
    }
}

fn backoff_delay(attempt: usize, retry_after: Option<&HeaderValue>) -> Duration {
    if let Some(secs) = retry_after
        .and_then(|value| value.to_str().ok())
        .and_then(|text| text.trim().parse::<u64>().ok())
    {
        return Duration::from_secs(secs.max(1));
    }
    let capped = attempt.min(6) as u32;
    Duration::from_secs(1u64 << capped)
}

async fn decode_body(provider: LlmProvider, response: Response) -> Result<Value, ProviderError> {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if !status.is_success() {
        return Err(ProviderError::Status {
            provider: provider.as_str(),
            status: status.as_u16(),
            body,
        });
    }
    serde_json::from_str(&body).map_err(|err| ProviderError::Request {
        provider: provider.as_str(),
        message: format!("failed to decode response: {err}"),
    })
}

fn extract_openai_text(value: &Value) -> Option<String> {
    let message = value.get("choices")?.as_array()?.first()?.get("message")?;
    match message.get("content")? {
        Value::String(text) if !text.trim().is_empty() => Some(text.clone()),
        Value::Array(parts) => parts
            .iter()
            .find_map(|part| part.get("text").and_then(|t| t.as_str()))
            .map(str::to_string),
        _ => None,
    }
}

fn read_api_key(var: &str, prefix: &str) -> Result<String, ProviderError> {
    let value = env::var(var).map_err(|_| ProviderError::Config(format!("{var} is not set")))?;
    if !value.starts_with(prefix) {
        return Err(ProviderError::Config(format!(
            "{var} must start with '{prefix}'"
        )));
    }
    Ok(value)
}

fn summarize_text(text: &str, max_words: usize) -> String {
    text.split_whitespace()
        .take(max_words)
        .collect::<Vec<&str>>()
        .join(" ")
}

fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

#[derive(Default, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
    total_tokens: Option<u64>,
}

impl OpenAiUsage {
    fn total(&self) -> u64 {
        self.total_tokens.unwrap_or_else(|| {
            self.prompt_tokens.unwrap_or(0) + self.completion_tokens.unwrap_or(0)
        })
    }
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Deserialize)]
struct AnthropicContent {
    text: Option<String>,
}

#[derive(Default, Deserialize)]
struct AnthropicUsage {
    input_tokens: Option<u32>,
    output_tokens: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_names_roundtrip() {
        for provider in [LlmProvider::OpenAi, LlmProvider::Anthropic, LlmProvider::Local] {
            assert_eq!(provider.as_str().parse::<LlmProvider>().unwrap(), provider);
        }
        assert!("gemini".parse::<LlmProvider>().is_err());
    }

    #[test]
    fn backoff_honors_retry_after() {
        let header = HeaderValue::from_static("7");
        assert_eq!(backoff_delay(1, Some(&header)), Duration::from_secs(7));
        assert_eq!(backoff_delay(1, None), Duration::from_secs(2));
        assert_eq!(backoff_delay(40, None), Duration::from_secs(64));
    }

    #[test]
    fn extracts_chat_completion_text() {
        let value = json!({
            "choices": [ { "message": { "role": "assistant", "content": "## Overview" } } ],
            "usage": { "prompt_tokens": 10, "completion_tokens": 5 }
        });
        assert_eq!(extract_openai_text(&value).as_deref(), Some("## Overview"));
        let usage: OpenAiUsage = serde_json::from_value(value["usage"].clone()).unwrap();
        assert_eq!(usage.total(), 15);
        assert_eq!(extract_openai_text(&json!({ "choices": [] })), None);
    }

    #[tokio::test]
    async fn local_generation_is_deterministic() {
        let client = LlmClient::local();
        let instructions = "Role\n\nPart 2 of 3. Continue the document.";
        let content = "Source material (part 2 of 3):\n\nbusinessName: Acme Ropes";
        let first = client.generate(instructions, content).await.unwrap();
        let second = client.generate(instructions, content).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.content, "## Part 2 of 3\n\nbusinessName: Acme Ropes");
        assert!(first.tokens_used > 0);
        assert_eq!(client.label(), "local:local");
    }
}
