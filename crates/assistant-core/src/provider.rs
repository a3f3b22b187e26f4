//! LLM Provider Strategy Pattern
//!
//! Defines a common interface for chat-completion backends and the
//! primary/fallback model invoker the engine talks to.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use assistant_core::provider::{ModelConfig, ModelFallback};
//!
//! let invoker = ModelFallback::new(provider, ModelConfig::default());
//! let completion = invoker.invoke(&messages).await?;
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::message::Message;

/// Configuration for a single completion request
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Model identifier (e.g., "gpt-4o-mini")
    pub model: String,

    /// Temperature for sampling (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

const fn default_temperature() -> f32 {
    0.7
}
const fn default_max_tokens() -> u32 {
    1000
}

pub const DEFAULT_PRIMARY_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_FALLBACK_MODEL: &str = "gpt-3.5-turbo";

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            model: DEFAULT_PRIMARY_MODEL.into(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// Response from an LLM completion
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    /// The generated text
    pub content: String,

    /// Model that generated this response
    pub model: String,

    /// Token usage statistics (if available)
    pub usage: Option<TokenUsage>,

    /// Finish reason
    pub finish_reason: Option<FinishReason>,
}

/// Token usage statistics
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Reason for completion finishing
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    #[serde(other)]
    Other,
}

/// Strategy trait for LLM providers
///
/// Implement this trait to add support for new LLM backends.
/// The engine works exclusively through this interface.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name (e.g., "OpenAI")
    fn name(&self) -> &str;

    /// Check if the provider is reachable and configured correctly
    async fn health_check(&self) -> Result<bool>;

    /// Generate a completion from messages
    async fn complete(&self, messages: &[Message], options: &GenerationOptions)
    -> Result<Completion>;
}

/// Primary and fallback model selection
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub primary_model: String,
    pub fallback_model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            primary_model: DEFAULT_PRIMARY_MODEL.into(),
            fallback_model: DEFAULT_FALLBACK_MODEL.into(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl ModelConfig {
    fn options_for(&self, model: &str) -> GenerationOptions {
        GenerationOptions {
            model: model.to_string(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

/// Single-fallback invoker
///
/// Tries the primary model once; on any failure tries the fallback model
/// once. When both fail the fallback's error is returned.
#[derive(Clone)]
pub struct ModelFallback {
    provider: Arc<dyn LlmProvider>,
    config: ModelConfig,
}

impl ModelFallback {
    pub fn new(provider: Arc<dyn LlmProvider>, config: ModelConfig) -> Self {
        Self { provider, config }
    }

    pub const fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn provider(&self) -> &dyn LlmProvider {
        self.provider.as_ref()
    }

    /// Run a completion with fallback
    pub async fn invoke(&self, messages: &[Message]) -> Result<Completion> {
        let primary = self.config.options_for(&self.config.primary_model);
        match self.provider.complete(messages, &primary).await {
            Ok(completion) => Ok(completion),
            Err(primary_err) => {
                tracing::warn!(
                    model = %primary.model,
                    fallback = %self.config.fallback_model,
                    error = %primary_err,
                    "Primary model failed, retrying with fallback"
                );
                let fallback = self.config.options_for(&self.config.fallback_model);
                self.provider
                    .complete(messages, &fallback)
                    .await
                    .inspect_err(|e| {
                        tracing::error!(model = %fallback.model, error = %e, "Fallback model failed");
                    })
            }
        }
    }
}
