//! # assistant-runtime
//!
//! Runtime integrations for the trading assistant.
//!
//! ## Providers
//!
//! - **OpenAI-compatible** (default): chat completions over HTTP
//!
//! ## Persistence
//!
//! - `FileConversationStore`: one JSON file per conversation
//! - `JsonFileCache`: local cache in a single JSON file
//!
//! ## Usage
//!
//! ```rust,ignore
//! use assistant_runtime::{ChatCompletionsProvider, FileConversationStore, LlmConfig};
//!
//! let config = LlmConfig::from_lookup(|key| std::env::var(key).ok());
//! let provider = ChatCompletionsProvider::from_config(config)?;
//! let engine = EngineBuilder::new()
//!     .provider(Arc::new(provider))
//!     .store(Arc::new(FileConversationStore::open("./data/conversations").await?))
//!     .build()?;
//! ```

pub mod file_store;
pub mod openai;

pub use file_store::{FileConversationStore, JsonFileCache};
pub use openai::{ChatCompletionsProvider, LlmConfig};

// Re-export core types for convenience
pub use assistant_core::{AssistantEngine, AssistantError, LlmProvider, Message, Result, Role};
