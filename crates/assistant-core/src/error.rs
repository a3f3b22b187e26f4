//! Error Types

use thiserror::Error;

/// Result type alias for assistant operations
pub type Result<T> = std::result::Result<T, AssistantError>;

/// Assistant error types
#[derive(Error, Debug)]
pub enum AssistantError {
    /// LLM provider returned an error (non-2xx, malformed body)
    #[error("Provider error: {0}")]
    Provider(String),

    /// Provider unreachable (transport failure)
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// A market-context fetch failed. Never fatal to a turn.
    #[error("Context fetch failed ({category}): {message}")]
    ContextFetch { category: String, message: String },

    /// Conversation store or local cache failure. Never fatal to a turn.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Broker rejected or failed to process an order
    #[error("Broker error: {0}")]
    Broker(String),

    /// A message is already being sent
    #[error("A message is already being processed")]
    Busy,

    /// Submitted query was blank
    #[error("Query is empty")]
    EmptyQuery,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other/unknown error
    #[error("{0}")]
    Other(String),
}

impl AssistantError {
    /// Build a context-fetch error for the given category
    pub fn context(category: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::ContextFetch {
            category: category.into(),
            message: message.to_string(),
        }
    }

    /// Check if error is retryable
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Provider(_) | Self::ProviderUnavailable(_) | Self::Busy | Self::Io(_)
        )
    }

    /// Convert to a user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            Self::Provider(msg) => format!("The AI service encountered an error: {msg}"),
            Self::ProviderUnavailable(_) => {
                "The AI service is currently unavailable. Please try again.".into()
            }
            Self::ContextFetch { category, .. } => {
                format!("Some {category} data could not be loaded.")
            }
            Self::Persistence(_) => "Your conversation could not be saved.".into(),
            Self::Broker(msg) => format!("The broker rejected the order: {msg}"),
            Self::Busy => "Please wait for the current response to finish.".into(),
            Self::EmptyQuery => "Please enter a message.".into(),
            _ => "An unexpected error occurred.".into(),
        }
    }
}

impl From<anyhow::Error> for AssistantError {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
