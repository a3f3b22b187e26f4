//! # assistant-core
//!
//! Conversation engine for the trading dashboard assistant.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        AssistantEngine                           │
//! │  ┌──────────────┐  ┌──────────────┐  ┌────────────────────────┐  │
//! │  │   Context    │  │    Prompt    │  │  ModelFallback         │  │
//! │  │  Selection   │──│   Builder    │──│  (LlmProvider)         │  │
//! │  └──────────────┘  └──────────────┘  └────────────────────────┘  │
//! │         │                                       │                │
//! │  MarketContextProvider              Directive ──▶ Confirm ──▶ BrokerGateway
//! │                                                                  │
//! │  ConversationStore + LocalCache (persistence / mirror)           │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every collaborator is a trait object so the server can plug in the
//! HTTP LLM provider, file-backed stores and simulated market data, and
//! tests can plug in fakes.

pub mod broker;
pub mod context;
pub mod directive;
pub mod engine;
pub mod error;
pub mod market;
pub mod message;
pub mod prompt;
pub mod provider;
pub mod refresh;
pub mod session;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use broker::{BrokerGateway, OpenPosition, OrderReceipt, OrderRequest, PositionUpdate};
pub use directive::{ConfirmState, ExecutionResult, ExecutionStatus, TradeAction, TradeDirective};
pub use engine::{AssistantEngine, ConversationView, EngineBuilder, Phase, TurnOutcome, TurnStatus};
pub use error::{AssistantError, Result};
pub use market::{MarketContextBundle, MarketContextProvider};
pub use message::{Message, Role};
pub use prompt::{PromptBuilder, build_prompt};
pub use provider::{LlmProvider, ModelConfig, ModelFallback};
pub use refresh::{MarketSnapshot, MarketSnapshotRefresher};
pub use session::{AccountType, Preferences, SessionConfig};
pub use store::{ConversationStore, LocalCache};
