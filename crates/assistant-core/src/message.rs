//! Conversation Messages
//!
//! Message format shared by the engine, the stores and the LLM providers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::directive::ExecutionResult;

/// Greeting shown at the top of every fresh conversation
pub const WELCOME_MESSAGE: &str = "Hello! I'm your AI trading assistant. I can analyze markets, \
review technical indicators, summarize the latest news and, when Control Mode is enabled, \
prepare trades for your confirmation. How can I help you today?";

/// Reply appended when the LLM call fails
pub const APOLOGY_MESSAGE: &str =
    "I apologize, but I encountered an error processing your request. Please try again.";

/// Role of a message sender
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System prompt (only ever sent to the provider, never stored)
    System,
    /// User input
    User,
    /// Assistant (LLM) response
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

/// A single message in a conversation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Message role
    pub role: Role,

    /// Text content
    pub content: String,

    /// Timestamp
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,

    /// Optional metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMetadata>,
}

/// Additional message metadata
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// Trade directives found in an assistant reply
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub execution_results: Vec<ExecutionResult>,

    /// Model that generated this (for assistant messages)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl Message {
    /// Create a new message
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
            metadata: None,
        }
    }

    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// The fixed greeting
    pub fn welcome() -> Self {
        Self::assistant(WELCOME_MESSAGE)
    }

    /// Attach metadata
    #[must_use]
    pub fn with_metadata(mut self, metadata: MessageMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Execution results attached to this message, if any
    pub fn execution_results(&self) -> &[ExecutionResult] {
        match &self.metadata {
            Some(metadata) => &metadata.execution_results,
            None => &[],
        }
    }
}

/// Ordered message history of the active chat
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// A conversation holding only the welcome message
    pub fn welcome() -> Self {
        Self {
            messages: vec![Message::welcome()],
        }
    }

    /// Rebuild from stored messages; an empty list yields the welcome message
    pub fn from_messages(messages: Vec<Message>) -> Self {
        if messages.is_empty() {
            Self::welcome()
        } else {
            Self { messages }
        }
    }

    /// Add a message
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Get all messages
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Get the last message
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Drop the most recent user message and everything after it.
    ///
    /// Returns the removed user message's content. Leaves the history
    /// untouched when it holds fewer than two messages or no user message.
    pub fn rewind_last_user(&mut self) -> Option<String> {
        if self.messages.len() < 2 {
            return None;
        }
        let pos = self.messages.iter().rposition(|m| m.role == Role::User)?;
        let content = self.messages[pos].content.clone();
        self.messages.truncate(pos);
        Some(content)
    }

    /// Reset to a single welcome message
    pub fn reset(&mut self) {
        self.messages = vec![Message::welcome()];
    }

    /// Number of messages
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
