//! OpenAI-compatible LLM Provider
//!
//! Implementation of `LlmProvider` over the `/chat/completions` HTTP API.
//! Works against OpenAI itself or any compatible gateway (LiteLLM, vLLM,
//! Ollama's `/v1` endpoint).

use std::time::Duration;

use assistant_core::{
    error::{AssistantError, Result},
    message::{Message, Role},
    provider::{Completion, FinishReason, GenerationOptions, LlmProvider, TokenUsage},
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Chat-completions endpoint configuration
#[derive(Clone, Debug)]
pub struct LlmConfig {
    /// Base URL up to and including the API version, e.g. `https://api.openai.com/v1`
    pub base_url: String,

    /// Bearer token; local gateways usually need none
    pub api_key: Option<String>,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".into(),
            api_key: None,
            timeout_secs: 60,
        }
    }
}

impl LlmConfig {
    /// Read `OPENAI_BASE_URL`, `OPENAI_API_KEY` and `LLM_TIMEOUT_SECS`
    /// through `lookup`, falling back to the defaults for anything missing
    /// or unparsable. A blank key counts as missing.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let timeout_secs = match lookup("LLM_TIMEOUT_SECS") {
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                tracing::warn!(value = %raw, "Ignoring unparsable LLM_TIMEOUT_SECS");
                defaults.timeout_secs
            }),
            None => defaults.timeout_secs,
        };

        Self {
            base_url: lookup("OPENAI_BASE_URL").unwrap_or(defaults.base_url),
            api_key: lookup("OPENAI_API_KEY").filter(|k| !k.trim().is_empty()),
            timeout_secs,
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: Role,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<FinishReason>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible chat-completions provider
pub struct ChatCompletionsProvider {
    client: reqwest::Client,
    config: LlmConfig,
}

impl ChatCompletionsProvider {
    /// Create from configuration
    pub fn from_config(config: LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AssistantError::Config(format!("HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.config.base_url.trim_end_matches('/'))
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    fn build_request<'a>(messages: &'a [Message], options: &'a GenerationOptions) -> ChatRequest<'a> {
        ChatRequest {
            model: &options.model,
            messages: messages
                .iter()
                .map(|m| WireMessage {
                    role: m.role,
                    content: &m.content,
                })
                .collect(),
            temperature: options.temperature,
            max_tokens: options.max_tokens,
        }
    }

    fn convert_response(response: ChatResponse, requested_model: &str) -> Result<Completion> {
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AssistantError::Provider("Response contained no choices".into()))?;
        let content = choice
            .message
            .content
            .filter(|c| !c.is_empty())
            .ok_or_else(|| AssistantError::Provider("Response contained no content".into()))?;

        Ok(Completion {
            content,
            model: response.model.unwrap_or_else(|| requested_model.to_string()),
            usage: response.usage,
            finish_reason: choice.finish_reason,
        })
    }
}

fn transport_error(e: &reqwest::Error) -> AssistantError {
    if e.is_connect() || e.is_timeout() {
        AssistantError::ProviderUnavailable(e.to_string())
    } else {
        AssistantError::Provider(e.to_string())
    }
}

#[async_trait]
impl LlmProvider for ChatCompletionsProvider {
    fn name(&self) -> &str {
        "OpenAI-compatible"
    }

    async fn health_check(&self) -> Result<bool> {
        match self.authorized(self.client.get(self.url("models"))).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(e) => {
                tracing::warn!("LLM health check failed: {}", e);
                Ok(false)
            }
        }
    }

    async fn complete(&self, messages: &[Message], options: &GenerationOptions) -> Result<Completion> {
        let body = Self::build_request(messages, options);
        tracing::debug!(model = %options.model, messages = messages.len(), "Sending chat completion");

        let response = self
            .authorized(self.client.post(self.url("chat/completions")))
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            tracing::error!(model = %options.model, %status, body = %text, "Chat completion rejected");
            return Err(AssistantError::Provider(format!("HTTP {status}: {text}")));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| AssistantError::Provider(format!("Invalid response body: {e}")))?;
        Self::convert_response(parsed, &options.model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use assistant_core::provider::{ModelConfig, ModelFallback};
    use axum::{Json, Router, http::StatusCode, routing::post};
    use serde_json::{Value, json};

    /// Serve a stub endpoint where the "primary" model always fails
    async fn stub_server() -> String {
        async fn chat(Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
            let model = body["model"].as_str().unwrap_or_default().to_string();
            if model == "primary" {
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({"error": {"message": "overloaded"}})),
                );
            }
            let last = body["messages"]
                .as_array()
                .and_then(|m| m.last())
                .and_then(|m| m["content"].as_str())
                .unwrap_or_default()
                .to_string();
            (
                StatusCode::OK,
                Json(json!({
                    "model": model,
                    "choices": [{
                        "message": {"role": "assistant", "content": format!("echo: {last}")},
                        "finish_reason": "stop"
                    }],
                    "usage": {"prompt_tokens": 3, "completion_tokens": 2, "total_tokens": 5}
                })),
            )
        }

        let app = Router::new().route("/v1/chat/completions", post(chat));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/v1")
    }

    fn provider(base_url: String) -> ChatCompletionsProvider {
        ChatCompletionsProvider::from_config(LlmConfig {
            base_url,
            api_key: Some("test-key".into()),
            timeout_secs: 5,
        })
        .unwrap()
    }

    #[test]
    fn test_config_defaults() {
        let config = LlmConfig::default();
        assert_eq!(config.base_url, "https://api.openai.com/v1");
        assert_eq!(config.timeout_secs, 60);
    }

    #[test]
    fn test_config_from_lookup() {
        let config = LlmConfig::from_lookup(|key| match key {
            "OPENAI_BASE_URL" => Some("http://localhost:4000/v1".into()),
            "OPENAI_API_KEY" => Some("   ".into()),
            "LLM_TIMEOUT_SECS" => Some("soon".into()),
            _ => None,
        });
        assert_eq!(config.base_url, "http://localhost:4000/v1");
        assert!(config.api_key.is_none());
        assert_eq!(config.timeout_secs, 60);
    }

    #[test]
    fn test_request_serialization() {
        let messages = vec![Message::system("You are helpful."), Message::user("Hello")];
        let options = GenerationOptions::default();
        let body = serde_json::to_value(ChatCompletionsProvider::build_request(&messages, &options)).unwrap();

        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["max_tokens"], 1000);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "Hello");
    }

    #[test]
    fn test_empty_choices_is_error() {
        let response = ChatResponse {
            model: None,
            choices: Vec::new(),
            usage: None,
        };
        let err = ChatCompletionsProvider::convert_response(response, "m").unwrap_err();
        assert!(matches!(err, AssistantError::Provider(_)));
    }

    #[tokio::test]
    async fn test_http_error_maps_to_provider_error() {
        let provider = provider(stub_server().await);
        let options = GenerationOptions {
            model: "primary".into(),
            ..Default::default()
        };
        let err = provider
            .complete(&[Message::user("hi")], &options)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("500"));
    }

    #[tokio::test]
    async fn test_fallback_over_http() {
        let provider = Arc::new(provider(stub_server().await));
        let invoker = ModelFallback::new(
            provider,
            ModelConfig {
                primary_model: "primary".into(),
                fallback_model: "fallback".into(),
                ..Default::default()
            },
        );

        let completion = invoker.invoke(&[Message::user("hello")]).await.unwrap();
        assert_eq!(completion.content, "echo: hello");
        assert_eq!(completion.model, "fallback");
        assert_eq!(completion.usage.map(|u| u.total_tokens), Some(5));
        assert_eq!(completion.finish_reason, Some(FinishReason::Stop));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_unavailable() {
        let provider = provider("http://127.0.0.1:9/v1".into());
        let err = provider
            .complete(&[Message::user("hi")], &GenerationOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
