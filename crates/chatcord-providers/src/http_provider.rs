//! Generic HTTP-based LLM provider for OpenAI-compatible APIs.
//!
//! Talks directly to any `/chat/completions` endpoint. Covers every entry in
//! the catalog: Pollinations, Groq, OpenAI, Perplexity, DeepInfra, HuggingFace.

use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use chatcord_core::config::ProviderConfig;
use chatcord_core::types::ChatMessage;

use crate::catalog::ProviderSpec;
use crate::traits::{LlmProvider, LlmRequestConfig};

/// Per-request timeout; failover moves on once it elapses.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

// ─────────────────────────────────────────────
// Wire types
// ─────────────────────────────────────────────

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

// ─────────────────────────────────────────────
// HttpProvider
// ─────────────────────────────────────────────

/// A chat backend reached over an OpenAI-compatible HTTP API.
pub struct HttpProvider {
    /// HTTP client (shared, connection-pooled).
    client: reqwest::Client,
    /// API base URL (e.g. `"https://api.groq.com/openai/v1"`).
    api_base: String,
    /// Bearer token; empty for keyless providers.
    api_key: String,
    /// Extra headers sent with each request.
    extra_headers: HeaderMap,
    /// Static spec for naming and model id mapping.
    spec: &'static ProviderSpec,
}

impl std::fmt::Debug for HttpProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpProvider")
            .field("api_base", &self.api_base)
            .field("provider", &self.spec.display_name)
            .finish()
    }
}

impl HttpProvider {
    /// Build a provider from user config and its catalog spec.
    ///
    /// Fails when the spec needs an API key and none is configured.
    pub fn new(config: &ProviderConfig, spec: &'static ProviderSpec) -> anyhow::Result<Self> {
        if spec.requires_key && !config.is_configured() {
            bail!("{} requires an API key", spec.display_name);
        }

        // config > spec default
        let api_base = config
            .api_base
            .clone()
            .unwrap_or_else(|| spec.default_api_base.to_string());

        let mut extra_headers = HeaderMap::new();
        if let Some(ref headers) = config.extra_headers {
            for (key, value) in headers {
                if let (Ok(name), Ok(val)) = (
                    HeaderName::from_bytes(key.as_bytes()),
                    HeaderValue::from_str(value),
                ) {
                    extra_headers.insert(name, val);
                } else {
                    warn!(provider = spec.name, header = %key, "Invalid header, skipping");
                }
            }
        }

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;

        Ok(HttpProvider {
            client,
            api_base,
            api_key: config.api_key.clone(),
            extra_headers,
            spec,
        })
    }

    /// Build the full chat completions URL.
    fn completions_url(&self) -> String {
        let base = self.api_base.trim_end_matches('/');
        format!("{}/chat/completions", base)
    }
}

#[async_trait]
impl LlmProvider for HttpProvider {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        model: &str,
        config: &LlmRequestConfig,
    ) -> anyhow::Result<String> {
        let wire_model = self.spec.wire_model(model);

        debug!(
            provider = self.spec.display_name,
            model = %wire_model,
            messages = messages.len(),
            "Calling LLM"
        );

        let body = ChatCompletionRequest {
            model: wire_model,
            messages,
            max_tokens: Some(config.max_tokens),
            temperature: Some(config.temperature),
        };

        let mut request = self
            .client
            .post(self.completions_url())
            .headers(self.extra_headers.clone())
            .json(&body);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("request to {} failed", self.spec.display_name))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            bail!("{} returned {}: {}", self.spec.display_name, status, error_text);
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .with_context(|| format!("invalid response from {}", self.spec.display_name))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        debug!(
            provider = self.spec.display_name,
            chars = content.len(),
            "LLM response received"
        );
        Ok(content)
    }

    fn name(&self) -> &str {
        self.spec.name
    }

    fn display_name(&self) -> &str {
        self.spec.display_name
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::find_by_name;
    use std::collections::HashMap;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn make_config(api_key: &str, api_base: Option<&str>) -> ProviderConfig {
        ProviderConfig {
            api_key: api_key.to_string(),
            api_base: api_base.map(String::from),
            extra_headers: None,
        }
    }

    fn reply(content: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "chatcmpl-test",
            "choices": [{
                "message": { "role": "assistant", "content": content },
                "finish_reason": "stop"
            }]
        }))
    }

    // ── Unit tests ──

    #[test]
    fn test_completions_url_trailing_slash() {
        let spec = find_by_name("openai").unwrap();
        let config = make_config("key", Some("https://api.openai.com/v1/"));
        let provider = HttpProvider::new(&config, spec).unwrap();
        assert_eq!(
            provider.completions_url(),
            "https://api.openai.com/v1/chat/completions"
        );
    }

    #[test]
    fn test_default_api_base() {
        let spec = find_by_name("groq").unwrap();
        let provider = HttpProvider::new(&make_config("gsk", None), spec).unwrap();
        assert_eq!(provider.api_base, "https://api.groq.com/openai/v1");
    }

    #[test]
    fn test_missing_key_rejected() {
        let spec = find_by_name("groq").unwrap();
        let err = HttpProvider::new(&make_config("", None), spec).unwrap_err();
        assert!(err.to_string().contains("requires an API key"));
    }

    #[test]
    fn test_keyless_provider_builds() {
        let spec = find_by_name("pollinations").unwrap();
        let provider = HttpProvider::new(&make_config("", None), spec).unwrap();
        assert_eq!(provider.name(), "pollinations");
        assert_eq!(provider.display_name(), "Pollinations");
    }

    #[test]
    fn test_extra_headers() {
        let spec = find_by_name("openai").unwrap();
        let mut headers = HashMap::new();
        headers.insert("X-Title".to_string(), "chatcord".to_string());
        headers.insert("bad header".to_string(), "x".to_string());
        let config = ProviderConfig {
            api_key: "key".to_string(),
            api_base: None,
            extra_headers: Some(headers),
        };
        let provider = HttpProvider::new(&config, spec).unwrap();
        assert!(provider.extra_headers.contains_key("x-title"));
        assert_eq!(provider.extra_headers.len(), 1);
    }

    // ── Integration tests with mock server ──

    #[tokio::test]
    async fn test_chat_success() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("Authorization", "Bearer test-key-123"))
            .respond_with(reply("Hello from the mock"))
            .mount(&mock_server)
            .await;

        let spec = find_by_name("openai").unwrap();
        let config = make_config("test-key-123", Some(&mock_server.uri()));
        let provider = HttpProvider::new(&config, spec).unwrap();

        let messages = vec![ChatMessage::system("Be brief."), ChatMessage::user("Hello")];
        let text = provider
            .chat(&messages, "gpt-4o", &LlmRequestConfig::default())
            .await
            .unwrap();

        assert_eq!(text, "Hello from the mock");
    }

    #[tokio::test]
    async fn test_chat_sends_wire_model_and_history() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(serde_json::json!({
                "model": "llama-3.3-70b-versatile",
                "max_tokens": 4096,
                "messages": [{"role": "user", "content": "test"}]
            })))
            .respond_with(reply("ok"))
            .mount(&mock_server)
            .await;

        let spec = find_by_name("groq").unwrap();
        let config = make_config("gsk", Some(&mock_server.uri()));
        let provider = HttpProvider::new(&config, spec).unwrap();

        // If the body matcher fails, wiremock returns 404 and this errors
        let text = provider
            .chat(&[ChatMessage::user("test")], "llama-3.3-70b", &LlmRequestConfig::default())
            .await
            .unwrap();
        assert_eq!(text, "ok");
    }

    #[tokio::test]
    async fn test_chat_api_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_string("Rate limit exceeded"))
            .mount(&mock_server)
            .await;

        let spec = find_by_name("openai").unwrap();
        let config = make_config("key", Some(&mock_server.uri()));
        let provider = HttpProvider::new(&config, spec).unwrap();

        let err = provider
            .chat(&[ChatMessage::user("Hello")], "gpt-4o", &LlmRequestConfig::default())
            .await
            .unwrap_err()
            .to_string();
        assert!(err.contains("429"));
        assert!(err.contains("Rate limit exceeded"));
    }

    #[tokio::test]
    async fn test_chat_network_error() {
        // Point to a port that's not listening
        let spec = find_by_name("pollinations").unwrap();
        let config = make_config("", Some("http://127.0.0.1:1"));
        let provider = HttpProvider::new(&config, spec).unwrap();

        let result = provider
            .chat(&[ChatMessage::user("Hello")], "gpt-4o", &LlmRequestConfig::default())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_chat_without_choices_is_empty() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})))
            .mount(&mock_server)
            .await;

        let spec = find_by_name("pollinations").unwrap();
        let config = make_config("", Some(&mock_server.uri()));
        let provider = HttpProvider::new(&config, spec).unwrap();

        let text = provider
            .chat(&[ChatMessage::user("Hello")], "gpt-4o", &LlmRequestConfig::default())
            .await
            .unwrap();
        assert!(text.is_empty());
    }
}
