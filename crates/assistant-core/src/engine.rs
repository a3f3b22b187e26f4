//! Conversation Engine
//!
//! Owns the assistant's conversation state and drives each turn:
//! context selection, prompt construction, the LLM call with fallback,
//! trade-directive extraction and the confirmation workflow.
//!
//! ```text
//!            submit                 completion ok
//!   Idle ─────────────▶ Sending ───────────────────▶ Idle (+ reply, maybe Confirming)
//!                          │   completion failed
//!                          └────────────────────────▶ Idle (+ apology, error set)
//! ```
//!
//! `Idle → Sending` is a single atomic check-and-set; a second submit while
//! a turn is in flight is rejected with [`AssistantError::Busy`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::Mutex;

use crate::broker::{BrokerGateway, OrderRequest};
use crate::context::{gather_context, select_context};
use crate::directive::{
    ConfirmState, ExecutionResult, ExecutionStatus, TradeDirective, extract_directive,
};
use crate::error::{AssistantError, Result};
use crate::market::MarketContextProvider;
use crate::message::{APOLOGY_MESSAGE, Conversation, Message, MessageMetadata};
use crate::prompt::PromptBuilder;
use crate::provider::{Completion, LlmProvider, ModelFallback};
use crate::session::{Preferences, SessionConfig};
use crate::store::{
    CONVERSATION_ID_KEY, ConversationId, ConversationStore, ConversationUpdate, LocalCache,
    MESSAGES_KEY, MemoryConversationStore, MemoryLocalCache, NewConversation,
};

/// Whether a turn is in flight
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Idle,
    Sending,
}

/// How a turn ended
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnStatus {
    Success,
    Failed,
}

/// Report of a completed turn
#[derive(Clone, Debug, Serialize)]
pub struct TurnOutcome {
    pub status: TurnStatus,
    /// The assistant message appended for this turn
    pub reply: Message,
    /// Failure message when the LLM call failed
    pub error: Option<String>,
    /// Context fields that made it into the prompt
    pub context: Vec<&'static str>,
    /// Whether the baseline bundle was used
    pub baseline_context: bool,
    /// Non-fatal problems (context fetches, persistence)
    pub notices: Vec<String>,
    /// Bracket text of a directive awaiting confirmation
    pub pending_trade: Option<String>,
}

/// Snapshot of the engine state for a chat UI
#[derive(Clone, Debug, Serialize)]
pub struct ConversationView {
    pub messages: Vec<Message>,
    pub query: String,
    pub error: Option<String>,
    pub confirm: ConfirmState,
    pub phase: Phase,
    pub preferences: Preferences,
    pub conversation_id: Option<ConversationId>,
}

#[derive(Debug)]
struct EngineState {
    conversation: Conversation,
    conversation_id: Option<ConversationId>,
    query: String,
    error: Option<String>,
    confirm: ConfirmState,
    pending_directive: Option<TradeDirective>,
    preferences: Preferences,
}

/// Message list as of one state change, waiting to be written to the cache
struct MirrorSnapshot {
    seq: u64,
    /// `None` removes the cached messages
    json: Option<String>,
}

/// Marks the engine as sending for as long as it lives
struct SendingGuard<'a>(&'a AtomicBool);

impl<'a> SendingGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| AssistantError::Busy)?;
        Ok(Self(flag))
    }
}

impl Drop for SendingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// The assistant conversation engine
pub struct AssistantEngine {
    invoker: ModelFallback,
    market: Arc<dyn MarketContextProvider>,
    store: Arc<dyn ConversationStore>,
    cache: Arc<dyn LocalCache>,
    broker: Option<Arc<dyn BrokerGateway>>,
    config: SessionConfig,
    state: Mutex<EngineState>,
    sending: AtomicBool,
    persist_lock: Mutex<()>,
    mirror_seq: AtomicU64,
    /// Sequence number of the last snapshot written to the cache
    mirrored: Mutex<u64>,
}

impl AssistantEngine {
    /// Create an engine starting from a fresh welcome conversation and
    /// default preferences. Call [`restore`](Self::restore) to pick up the
    /// cached preferences and the previous conversation.
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        market: Arc<dyn MarketContextProvider>,
        store: Arc<dyn ConversationStore>,
        cache: Arc<dyn LocalCache>,
        config: SessionConfig,
    ) -> Self {
        Self {
            invoker: ModelFallback::new(provider, config.models.clone()),
            market,
            store,
            cache,
            broker: None,
            config,
            state: Mutex::new(EngineState {
                conversation: Conversation::welcome(),
                conversation_id: None,
                query: String::new(),
                error: None,
                confirm: ConfirmState::default(),
                pending_directive: None,
                preferences: Preferences::default(),
            }),
            sending: AtomicBool::new(false),
            persist_lock: Mutex::new(()),
            mirror_seq: AtomicU64::new(0),
            mirrored: Mutex::new(0),
        }
    }

    /// Route confirmed trades to a broker instead of simulating them
    #[must_use]
    pub fn with_broker(mut self, broker: Arc<dyn BrokerGateway>) -> Self {
        self.broker = Some(broker);
        self
    }

    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The fallback invoker, for stateless completions
    pub const fn invoker(&self) -> &ModelFallback {
        &self.invoker
    }

    pub fn phase(&self) -> Phase {
        if self.sending.load(Ordering::Acquire) {
            Phase::Sending
        } else {
            Phase::Idle
        }
    }

    /// Snapshot for rendering
    pub async fn view(&self) -> ConversationView {
        let state = self.state.lock().await;
        ConversationView {
            messages: state.conversation.messages().to_vec(),
            query: state.query.clone(),
            error: state.error.clone(),
            confirm: state.confirm.clone(),
            phase: self.phase(),
            preferences: state.preferences,
            conversation_id: state.conversation_id.clone(),
        }
    }

    pub async fn messages(&self) -> Vec<Message> {
        self.state.lock().await.conversation.messages().to_vec()
    }

    pub async fn query(&self) -> String {
        self.state.lock().await.query.clone()
    }

    /// Update the draft input
    pub async fn set_query(&self, query: impl Into<String>) {
        self.state.lock().await.query = query.into();
    }

    pub async fn confirm_state(&self) -> ConfirmState {
        self.state.lock().await.confirm.clone()
    }

    pub async fn preferences(&self) -> Preferences {
        self.state.lock().await.preferences
    }

    /// Replace the preference flags and mirror them into the local cache
    pub async fn set_preferences(&self, preferences: Preferences) -> Preferences {
        self.state.lock().await.preferences = preferences;
        if let Err(e) = preferences.save(self.cache.as_ref()).await {
            tracing::warn!(error = %e, "Failed to persist preferences");
        }
        preferences
    }

    pub async fn set_control_mode(&self, enabled: bool) -> Preferences {
        let mut preferences = self.preferences().await;
        preferences.control_mode = enabled;
        self.set_preferences(preferences).await
    }

    pub async fn set_auto_refresh(&self, enabled: bool) -> Preferences {
        let mut preferences = self.preferences().await;
        preferences.auto_refresh = enabled;
        self.set_preferences(preferences).await
    }

    /// Load the cached preferences and the previous conversation.
    ///
    /// The local cache is read first; a non-empty conversation from the
    /// durable store takes precedence over it. Failures leave the current
    /// state in place.
    pub async fn restore(&self) {
        let preferences = Preferences::load(self.cache.as_ref()).await;
        let cached = self.cached_messages().await;
        let cached_id = match self.cache.get(CONVERSATION_ID_KEY).await {
            Ok(id) => id.map(ConversationId::from_string),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read cached conversation id");
                None
            }
        };
        let remote = match self.store.get_latest().await {
            Ok(latest) => latest.filter(|c| !c.messages.is_empty()),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load latest conversation");
                None
            }
        };

        let snapshot = {
            let mut state = self.state.lock().await;
            state.preferences = preferences;
            if let Some(remote) = remote {
                tracing::info!(id = %remote.id, messages = remote.messages.len(), "Restored conversation");
                state.conversation = Conversation::from_messages(remote.messages);
                state.conversation_id = Some(remote.id);
            } else if let Some(messages) = cached {
                tracing::info!(messages = messages.len(), "Restored conversation from local cache");
                state.conversation = Conversation::from_messages(messages);
                state.conversation_id = cached_id;
            }
            self.snapshot(&state)
        };
        self.mirror(snapshot).await;
    }

    /// Send a user query through a full assistant turn.
    ///
    /// Errors only for blank queries or when a turn is already in flight;
    /// an LLM failure yields a `Failed` outcome with the apology appended.
    pub async fn submit(&self, query: &str) -> Result<TurnOutcome> {
        if query.trim().is_empty() {
            return Err(AssistantError::EmptyQuery);
        }
        let _sending = SendingGuard::acquire(&self.sending)?;

        let (control_mode, snapshot) = {
            let mut state = self.state.lock().await;
            state.conversation.push(Message::user(query));
            state.query.clear();
            state.error = None;
            (state.preferences.control_mode, self.snapshot(&state))
        };
        self.mirror(snapshot).await;

        let plan = select_context(query);
        tracing::debug!(?plan, "Selected market context");
        let gathered = gather_context(self.market.as_ref(), &plan).await;

        let prompt = PromptBuilder::new(control_mode, self.config.account_type).build(&gathered.bundle);
        let request = [Message::system(prompt), Message::user(query)];

        let mut outcome = TurnOutcome {
            status: TurnStatus::Success,
            reply: Message::assistant(String::new()),
            error: None,
            context: gathered.bundle.populated(),
            baseline_context: gathered.baseline,
            notices: gathered.notices,
            pending_trade: None,
        };

        match self.invoker.invoke(&request).await {
            Ok(completion) => {
                let (reply, pending) = self.accept_completion(completion, control_mode).await;
                outcome.reply = reply;
                outcome.pending_trade = pending;
                if let Err(e) = self.persist().await {
                    tracing::warn!(error = %e, "Conversation not saved");
                    outcome.notices.push(e.to_string());
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Assistant turn failed");
                let reply = Message::assistant(APOLOGY_MESSAGE);
                let message = e.to_string();
                let snapshot = {
                    let mut state = self.state.lock().await;
                    state.error = Some(message.clone());
                    state.conversation.push(reply.clone());
                    self.snapshot(&state)
                };
                self.mirror(snapshot).await;
                outcome.status = TurnStatus::Failed;
                outcome.reply = reply;
                outcome.error = Some(message);
            }
        }

        Ok(outcome)
    }

    /// Append the reply and arm the confirmation dialog if it proposes a trade
    async fn accept_completion(
        &self,
        completion: Completion,
        control_mode: bool,
    ) -> (Message, Option<String>) {
        let found = if control_mode {
            extract_directive(&completion.content)
        } else {
            None
        };

        let mut metadata = MessageMetadata {
            model: Some(completion.model),
            ..Default::default()
        };
        if let Some(found) = &found {
            tracing::info!(command = %found.command, "Trade directive awaiting confirmation");
            metadata
                .execution_results
                .push(ExecutionResult::pending(found.directive.clone()));
        }
        let reply = Message::assistant(completion.content).with_metadata(metadata);

        let (pending, snapshot) = {
            let mut state = self.state.lock().await;
            state.conversation.push(reply.clone());
            let pending = found.map(|found| {
                state.confirm = ConfirmState::pending(found.command.clone());
                state.pending_directive = Some(found.directive);
                found.command
            });
            (pending, self.snapshot(&state))
        };
        self.mirror(snapshot).await;
        (reply, pending)
    }

    /// Undo the last send: drop the latest user message and everything after
    /// it, and put its text back into the input. `None` when there is nothing
    /// to undo.
    ///
    /// A conversation that already lives in the store is rewritten there too,
    /// so a later [`restore`](Self::restore) does not bring the undone
    /// messages back.
    pub async fn retry_last_message(&self) -> Result<Option<String>> {
        let _sending = SendingGuard::acquire(&self.sending)?;
        let (content, snapshot, stored) = {
            let mut state = self.state.lock().await;
            let Some(content) = state.conversation.rewind_last_user() else {
                return Ok(None);
            };
            state.query.clone_from(&content);
            (content, self.snapshot(&state), state.conversation_id.is_some())
        };
        self.mirror(snapshot).await;

        let saved = if stored { self.persist().await } else { Ok(()) };
        if let Err(e) = saved {
            tracing::warn!(error = %e, "Undo not saved");
        }
        Ok(Some(content))
    }

    /// Start a new chat
    pub async fn clear_history(&self) -> Result<()> {
        let _sending = SendingGuard::acquire(&self.sending)?;
        let seq = {
            let mut state = self.state.lock().await;
            state.conversation.reset();
            state.conversation_id = None;
            state.error = None;
            state.confirm.clear();
            state.pending_directive = None;
            self.next_seq()
        };
        self.mirror(Some(MirrorSnapshot { seq, json: None })).await;
        if let Err(e) = self.cache.remove(CONVERSATION_ID_KEY).await {
            tracing::warn!(error = %e, "Failed to clear cached conversation id");
        }
        Ok(())
    }

    /// Resolve the pending trade.
    ///
    /// Confirming a pending trade appends exactly one assistant message,
    /// which is returned. Rejecting, or confirming with nothing pending,
    /// appends nothing. The confirmation state is cleared either way.
    pub async fn resolve_trade(&self, confirmed: bool) -> Result<Option<Message>> {
        let (command, directive) = {
            let mut state = self.state.lock().await;
            let command = state.confirm.pending_command().map(String::from);
            let directive = state.pending_directive.take();
            state.confirm.clear();
            (command, directive)
        };

        if !confirmed {
            if command.is_some() {
                tracing::info!("Pending trade rejected");
            }
            return Ok(None);
        }
        let Some(command) = command else {
            return Ok(None);
        };

        let message = self.execute(&command, directive).await;
        let snapshot = {
            let mut state = self.state.lock().await;
            state.conversation.push(message.clone());
            self.snapshot(&state)
        };
        self.mirror(snapshot).await;
        if let Err(e) = self.persist().await {
            tracing::warn!(error = %e, "Conversation not saved");
        }
        Ok(Some(message))
    }

    async fn execute(&self, command: &str, directive: Option<TradeDirective>) -> Message {
        let (Some(broker), Some(directive)) = (&self.broker, directive.clone()) else {
            tracing::info!(%command, "Trade confirmed (simulated execution)");
            let message = Message::assistant(format!("✅ Trade executed successfully: {command}"));
            return match directive {
                Some(directive) => {
                    let mut result = ExecutionResult::pending(directive);
                    result.status = ExecutionStatus::Executed;
                    message.with_metadata(execution_metadata(result))
                }
                None => message,
            };
        };

        let mut result = ExecutionResult::pending(directive.clone());
        match broker.place_order(OrderRequest::from(&directive)).await {
            Ok(receipt) => {
                tracing::info!(
                    broker = broker.name(),
                    order_id = %receipt.order_id,
                    "Trade executed"
                );
                result.status = ExecutionStatus::Executed;
                result.order_id = Some(receipt.order_id.clone());
                Message::assistant(format!(
                    "✅ Trade executed: {directive}. Order {} filled at {}.",
                    receipt.order_id, receipt.fill_price
                ))
                .with_metadata(execution_metadata(result))
            }
            Err(e) => {
                tracing::error!(broker = broker.name(), error = %e, "Trade execution failed");
                result.status = ExecutionStatus::Failed;
                result.message = Some(e.to_string());
                Message::assistant(format!(
                    "❌ Trade could not be executed: {directive}. {}",
                    e.user_message()
                ))
                .with_metadata(execution_metadata(result))
            }
        }
    }

    /// Write the conversation to the durable store. The first write creates
    /// the conversation and caches its id.
    async fn persist(&self) -> Result<()> {
        let _persisting = self.persist_lock.lock().await;
        let (messages, id) = {
            let state = self.state.lock().await;
            (
                state.conversation.messages().to_vec(),
                state.conversation_id.clone(),
            )
        };

        if let Some(id) = id {
            return self
                .store
                .update(&id, ConversationUpdate::messages(messages))
                .await;
        }

        let stored = self.store.insert(NewConversation { messages }).await?;
        tracing::debug!(id = %stored.id, "Created conversation");
        if let Err(e) = self.cache.set(CONVERSATION_ID_KEY, stored.id.as_str()).await {
            tracing::warn!(error = %e, "Failed to cache conversation id");
        }
        self.state.lock().await.conversation_id = Some(stored.id);
        Ok(())
    }

    fn next_seq(&self) -> u64 {
        self.mirror_seq.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Serialize the message list. Taken with the state lock held so that
    /// sequence numbers follow the order of state changes.
    fn snapshot(&self, state: &EngineState) -> Option<MirrorSnapshot> {
        let seq = self.next_seq();
        match serde_json::to_string(state.conversation.messages()) {
            Ok(json) => Some(MirrorSnapshot {
                seq,
                json: Some(json),
            }),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize messages for local cache");
                None
            }
        }
    }

    /// Write a snapshot to the local cache unless a newer one already landed.
    /// Must be called after the state lock is released.
    async fn mirror(&self, snapshot: Option<MirrorSnapshot>) {
        let Some(MirrorSnapshot { seq, json }) = snapshot else {
            return;
        };
        let mut mirrored = self.mirrored.lock().await;
        if seq <= *mirrored {
            tracing::debug!(seq, latest = *mirrored, "Skipping stale cache mirror");
            return;
        }
        *mirrored = seq;
        let result = match json {
            Some(json) => self.cache.set(MESSAGES_KEY, &json).await,
            None => self.cache.remove(MESSAGES_KEY).await,
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, "Failed to mirror messages to local cache");
        }
    }

    async fn cached_messages(&self) -> Option<Vec<Message>> {
        let json = match self.cache.get(MESSAGES_KEY).await {
            Ok(json) => json?,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read cached messages");
                return None;
            }
        };
        serde_json::from_str(&json)
            .inspect_err(|e| tracing::warn!(error = %e, "Discarding unreadable cached messages"))
            .ok()
    }
}

fn execution_metadata(result: ExecutionResult) -> MessageMetadata {
    MessageMetadata {
        execution_results: vec![result],
        model: None,
    }
}

/// Builder for [`AssistantEngine`]
#[derive(Default)]
pub struct EngineBuilder {
    provider: Option<Arc<dyn LlmProvider>>,
    market: Option<Arc<dyn MarketContextProvider>>,
    store: Option<Arc<dyn ConversationStore>>,
    cache: Option<Arc<dyn LocalCache>>,
    broker: Option<Arc<dyn BrokerGateway>>,
    config: SessionConfig,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    #[must_use]
    pub fn market(mut self, market: Arc<dyn MarketContextProvider>) -> Self {
        self.market = Some(market);
        self
    }

    #[must_use]
    pub fn store(mut self, store: Arc<dyn ConversationStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn cache(mut self, cache: Arc<dyn LocalCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    #[must_use]
    pub fn broker(mut self, broker: Arc<dyn BrokerGateway>) -> Self {
        self.broker = Some(broker);
        self
    }

    #[must_use]
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the engine. Store and cache default to in-memory implementations.
    pub fn build(self) -> Result<AssistantEngine> {
        let provider = self
            .provider
            .ok_or_else(|| AssistantError::Config("Provider is required".into()))?;
        let market = self
            .market
            .ok_or_else(|| AssistantError::Config("Market context provider is required".into()))?;
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryConversationStore::new()));
        let cache = self.cache.unwrap_or_else(|| Arc::new(MemoryLocalCache::new()));

        let engine = AssistantEngine::new(provider, market, store, cache, self.config);
        Ok(match self.broker {
            Some(broker) => engine.with_broker(broker),
            None => engine,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directive::TradeAction;
    use crate::message::{Role, WELCOME_MESSAGE};
    use crate::provider::ModelConfig;
    use crate::testing::{FakeBroker, FakeMarket, GatedCache, ScriptedProvider};
    use rust_decimal_macros::dec;
    use std::time::Duration;
    use tokio::sync::Notify;

    const TRADE_REPLY: &str =
        "BTC is holding support.\n[TRADE: BUY BTCUSD 0.1 42000 40000 45000]\nPlease confirm.";

    struct Harness {
        engine: Arc<AssistantEngine>,
        provider: Arc<ScriptedProvider>,
        market: Arc<FakeMarket>,
        store: Arc<MemoryConversationStore>,
        cache: Arc<MemoryLocalCache>,
    }

    fn models() -> ModelConfig {
        ModelConfig {
            primary_model: "primary".into(),
            fallback_model: "fallback".into(),
            ..Default::default()
        }
    }

    fn harness_with(provider: ScriptedProvider, broker: Option<Arc<FakeBroker>>) -> Harness {
        let provider = Arc::new(provider);
        let market = Arc::new(FakeMarket::default());
        let store = Arc::new(MemoryConversationStore::new());
        let cache = Arc::new(MemoryLocalCache::new());
        let mut builder = EngineBuilder::new()
            .provider(provider.clone())
            .market(market.clone())
            .store(store.clone())
            .cache(cache.clone())
            .config(SessionConfig::new(Default::default(), models()));
        if let Some(broker) = broker {
            builder = builder.broker(broker);
        }
        Harness {
            engine: Arc::new(builder.build().unwrap()),
            provider,
            market,
            store,
            cache,
        }
    }

    fn harness(reply: &str) -> Harness {
        harness_with(ScriptedProvider::new().reply("primary", reply), None)
    }

    fn contents(messages: &[Message]) -> Vec<&str> {
        messages.iter().map(|m| m.content.as_str()).collect()
    }

    #[tokio::test]
    async fn test_starts_with_welcome() {
        let h = harness("hi");
        let messages = h.engine.messages().await;
        assert_eq!(contents(&messages), vec![WELCOME_MESSAGE]);
        assert_eq!(h.engine.phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn test_successful_turn() {
        let h = harness("BTC looks strong.");
        h.engine.set_query("draft").await;

        let outcome = h.engine.submit("How is bitcoin doing?").await.unwrap();
        assert_eq!(outcome.status, TurnStatus::Success);
        assert_eq!(outcome.reply.content, "BTC looks strong.");
        assert!(outcome.context.contains(&"crypto_data"));

        let messages = h.engine.messages().await;
        assert_eq!(
            contents(&messages),
            vec![WELCOME_MESSAGE, "How is bitcoin doing?", "BTC looks strong."]
        );
        assert_eq!(messages[1].role, Role::User);
        assert!(h.engine.query().await.is_empty());

        // system prompt + user query only, not the whole history
        let request = h.provider.last_request();
        assert_eq!(request.len(), 2);
        assert_eq!(request[0].role, Role::System);
        assert!(request[0].content.contains("### Cryptocurrency Prices"));
        assert_eq!(request[1].content, "How is bitcoin doing?");
    }

    #[tokio::test]
    async fn test_first_turn_creates_conversation_then_updates() {
        let h = harness("ok");
        h.engine.submit("hello").await.unwrap();

        let view = h.engine.view().await;
        let id = view.conversation_id.clone().unwrap();
        assert_eq!(h.store.len(), 1);
        assert_eq!(
            h.cache.get(CONVERSATION_ID_KEY).await.unwrap().as_deref(),
            Some(id.as_str())
        );

        h.engine.submit("again").await.unwrap();
        assert_eq!(h.store.len(), 1);
        let stored = h.store.get_latest().await.unwrap().unwrap();
        assert_eq!(stored.id, id);
        assert_eq!(stored.messages.len(), 5);
    }

    #[tokio::test]
    async fn test_hello_uses_baseline_context() {
        let h = harness("hi there");
        let outcome = h.engine.submit("hello").await.unwrap();
        assert!(outcome.baseline_context);
        assert_eq!(h.market.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_turn_appends_apology() {
        let h = harness_with(
            ScriptedProvider::new()
                .fail("primary", "rate limited")
                .fail("fallback", "service down"),
            None,
        );

        let outcome = h.engine.submit("hello").await.unwrap();
        assert_eq!(outcome.status, TurnStatus::Failed);
        assert_eq!(outcome.reply.content, APOLOGY_MESSAGE);

        let view = h.engine.view().await;
        assert_eq!(view.error.as_deref(), Some("Provider error: service down"));
        assert_eq!(view.phase, Phase::Idle);
        assert_eq!(view.messages.len(), 3);
        assert!(h.store.is_empty());
        assert_eq!(h.provider.models_called(), vec!["primary", "fallback"]);
    }

    #[tokio::test]
    async fn test_next_turn_clears_error() {
        let h = harness_with(
            ScriptedProvider::new()
                .fail("primary", "rate limited")
                .fail("fallback", "service down")
                .reply("primary", "back online"),
            None,
        );
        let failed = h.engine.submit("first").await.unwrap();
        assert_eq!(failed.status, TurnStatus::Failed);
        assert!(h.engine.view().await.error.is_some());

        let outcome = h.engine.submit("second").await.unwrap();
        assert_eq!(outcome.status, TurnStatus::Success);
        let view = h.engine.view().await;
        assert!(view.error.is_none());
        assert_eq!(
            contents(&view.messages),
            vec![WELCOME_MESSAGE, "first", APOLOGY_MESSAGE, "second", "back online"]
        );
        assert_eq!(
            h.provider.models_called(),
            vec!["primary", "fallback", "primary"]
        );
    }

    #[tokio::test]
    async fn test_retry_last_message() {
        let h = harness("b");
        h.engine.submit("a").await.unwrap();

        let restored = h.engine.retry_last_message().await.unwrap();
        assert_eq!(restored.as_deref(), Some("a"));
        assert_eq!(contents(&h.engine.messages().await), vec![WELCOME_MESSAGE]);
        assert_eq!(h.engine.query().await, "a");
    }

    #[tokio::test]
    async fn test_retry_is_not_undone_by_restore() {
        let h = harness("b");
        h.engine.submit("a").await.unwrap();
        h.engine.submit("c").await.unwrap();
        assert_eq!(h.engine.retry_last_message().await.unwrap().as_deref(), Some("c"));

        let stored = h.store.get_latest().await.unwrap().unwrap();
        assert_eq!(contents(&stored.messages), vec![WELCOME_MESSAGE, "a", "b"]);

        let engine = EngineBuilder::new()
            .provider(h.provider.clone())
            .market(h.market.clone())
            .store(h.store.clone())
            .cache(h.cache.clone())
            .config(SessionConfig::new(Default::default(), models()))
            .build()
            .unwrap();
        engine.restore().await;
        assert_eq!(
            contents(&engine.messages().await),
            vec![WELCOME_MESSAGE, "a", "b"]
        );
    }

    #[tokio::test]
    async fn test_retry_on_welcome_is_noop() {
        let h = harness("b");
        assert!(h.engine.retry_last_message().await.unwrap().is_none());
        assert_eq!(h.engine.messages().await.len(), 1);
        assert!(h.engine.query().await.is_empty());
    }

    #[tokio::test]
    async fn test_clear_history() {
        let h = harness("b");
        h.engine.submit("a").await.unwrap();
        assert!(h.engine.view().await.conversation_id.is_some());

        h.engine.clear_history().await.unwrap();
        let view = h.engine.view().await;
        assert_eq!(contents(&view.messages), vec![WELCOME_MESSAGE]);
        assert!(view.conversation_id.is_none());
        assert!(h.cache.get(MESSAGES_KEY).await.unwrap().is_none());
        assert!(h.cache.get(CONVERSATION_ID_KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_directive_arms_confirmation_in_control_mode() {
        let h = harness(TRADE_REPLY);
        h.engine.set_control_mode(true).await;

        let outcome = h.engine.submit("buy some bitcoin").await.unwrap();
        assert_eq!(
            outcome.pending_trade.as_deref(),
            Some("[TRADE: BUY BTCUSD 0.1 42000 40000 45000]")
        );

        let confirm = h.engine.confirm_state().await;
        assert!(confirm.show);
        assert_eq!(
            confirm.command.as_deref(),
            Some("[TRADE: BUY BTCUSD 0.1 42000 40000 45000]")
        );

        let results = outcome.reply.execution_results();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, ExecutionStatus::Pending);
        assert_eq!(results[0].directive.symbol, "BTCUSD");

        // the prompt carried the protocol block
        assert!(h.provider.last_request()[0].content.contains("[TRADE:"));
    }

    #[tokio::test]
    async fn test_directive_ignored_without_control_mode() {
        let h = harness(TRADE_REPLY);
        let outcome = h.engine.submit("buy some bitcoin").await.unwrap();
        assert!(outcome.pending_trade.is_none());
        assert!(!h.engine.confirm_state().await.show);
        assert!(outcome.reply.execution_results().is_empty());
    }

    #[tokio::test]
    async fn test_confirm_appends_one_message() {
        let h = harness(TRADE_REPLY);
        h.engine.set_control_mode(true).await;
        h.engine.submit("buy some bitcoin").await.unwrap();
        let before = h.engine.messages().await.len();

        let message = h.engine.resolve_trade(true).await.unwrap().unwrap();
        assert_eq!(message.role, Role::Assistant);
        assert!(message.content.contains("[TRADE: BUY BTCUSD 0.1 42000 40000 45000]"));

        assert_eq!(h.engine.messages().await.len(), before + 1);
        assert_eq!(h.engine.confirm_state().await, ConfirmState::default());
    }

    #[tokio::test]
    async fn test_reject_appends_nothing() {
        let h = harness(TRADE_REPLY);
        h.engine.set_control_mode(true).await;
        h.engine.submit("buy some bitcoin").await.unwrap();
        let before = h.engine.messages().await.len();

        assert!(h.engine.resolve_trade(false).await.unwrap().is_none());
        assert_eq!(h.engine.messages().await.len(), before);
        assert_eq!(h.engine.confirm_state().await, ConfirmState::default());

        // nothing left to confirm
        assert!(h.engine.resolve_trade(true).await.unwrap().is_none());
        assert_eq!(h.engine.messages().await.len(), before);
    }

    #[tokio::test]
    async fn test_confirm_after_new_directive_following_reject() {
        let h = harness(TRADE_REPLY);
        h.engine.set_control_mode(true).await;

        h.engine.submit("buy some bitcoin").await.unwrap();
        assert!(h.engine.resolve_trade(false).await.unwrap().is_none());

        h.engine.submit("buy it again").await.unwrap();
        let before = h.engine.messages().await.len();
        let message = h.engine.resolve_trade(true).await.unwrap().unwrap();
        assert!(message.content.starts_with("✅ Trade executed successfully"));
        assert_eq!(h.engine.messages().await.len(), before + 1);
        assert_eq!(message.execution_results()[0].status, ExecutionStatus::Executed);
    }

    #[tokio::test]
    async fn test_confirm_places_order_with_broker() {
        let broker = Arc::new(FakeBroker::default());
        let h = harness_with(
            ScriptedProvider::new().reply("primary", TRADE_REPLY),
            Some(broker.clone()),
        );
        h.engine.set_control_mode(true).await;
        h.engine.submit("buy some bitcoin").await.unwrap();

        let message = h.engine.resolve_trade(true).await.unwrap().unwrap();
        assert!(message.content.contains("ord-1"));

        let orders = broker.orders.lock().unwrap().clone();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].action, TradeAction::Buy);
        assert_eq!(orders[0].amount, dec!(0.1));
        assert_eq!(orders[0].stop_loss, Some(dec!(40000)));
        assert_eq!(message.execution_results()[0].status, ExecutionStatus::Executed);
    }

    #[tokio::test]
    async fn test_broker_failure_reported_in_message() {
        let broker = Arc::new(FakeBroker {
            reject_with: Some("market closed".into()),
            ..Default::default()
        });
        let h = harness_with(
            ScriptedProvider::new().reply("primary", TRADE_REPLY),
            Some(broker),
        );
        h.engine.set_control_mode(true).await;
        h.engine.submit("buy some bitcoin").await.unwrap();

        let message = h.engine.resolve_trade(true).await.unwrap().unwrap();
        assert!(message.content.contains("market closed"));
        assert_eq!(message.execution_results()[0].status, ExecutionStatus::Failed);
        assert!(!h.engine.confirm_state().await.show);
    }

    #[tokio::test]
    async fn test_concurrent_submit_is_busy() {
        let gate = Arc::new(Notify::new());
        let h = harness_with(
            ScriptedProvider::new()
                .reply("primary", "done")
                .gated(gate.clone()),
            None,
        );

        let engine = h.engine.clone();
        let first = tokio::spawn(async move { engine.submit("first").await });
        while h.engine.phase() != Phase::Sending {
            tokio::task::yield_now().await;
        }

        assert!(matches!(h.engine.submit("second").await, Err(AssistantError::Busy)));
        assert!(matches!(h.engine.clear_history().await, Err(AssistantError::Busy)));

        gate.notify_one();
        let outcome = first.await.unwrap().unwrap();
        assert_eq!(outcome.reply.content, "done");
        assert_eq!(h.engine.phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn test_empty_query_rejected() {
        let h = harness("x");
        assert!(matches!(h.engine.submit("   ").await, Err(AssistantError::EmptyQuery)));
        assert_eq!(h.engine.messages().await.len(), 1);
    }

    #[tokio::test]
    async fn test_restore_prefers_store() {
        let h = harness("reply");
        h.engine.submit("persist me").await.unwrap();

        let engine = EngineBuilder::new()
            .provider(h.provider.clone())
            .market(h.market.clone())
            .store(h.store.clone())
            .config(SessionConfig::new(Default::default(), models()))
            .build()
            .unwrap();
        engine.restore().await;

        let view = engine.view().await;
        assert_eq!(view.messages.len(), 3);
        assert!(view.conversation_id.is_some());
    }

    #[tokio::test]
    async fn test_restore_from_local_cache() {
        let h = harness("reply");
        h.engine.submit("cached").await.unwrap();

        let engine = EngineBuilder::new()
            .provider(h.provider.clone())
            .market(h.market.clone())
            .cache(h.cache.clone())
            .config(SessionConfig::new(Default::default(), models()))
            .build()
            .unwrap();
        engine.restore().await;

        assert_eq!(
            contents(&engine.messages().await),
            vec![WELCOME_MESSAGE, "cached", "reply"]
        );
    }

    #[tokio::test]
    async fn test_preferences_persist_in_cache() {
        let h = harness("x");
        h.engine.set_control_mode(true).await;
        h.engine.set_auto_refresh(true).await;

        let reloaded = Preferences::load(h.cache.as_ref()).await;
        assert!(reloaded.control_mode);
        assert!(reloaded.auto_refresh);

        let engine = EngineBuilder::new()
            .provider(h.provider.clone())
            .market(h.market.clone())
            .cache(h.cache.clone())
            .build()
            .unwrap();
        assert_eq!(engine.preferences().await, Preferences::default());
        engine.restore().await;
        assert_eq!(engine.preferences().await, reloaded);
    }

    #[tokio::test]
    async fn test_cache_write_does_not_hold_state_lock() {
        let cache = Arc::new(GatedCache::default());
        let engine = Arc::new(
            EngineBuilder::new()
                .provider(Arc::new(ScriptedProvider::new().reply("primary", "ok")))
                .market(Arc::new(FakeMarket::default()))
                .cache(cache.clone())
                .config(SessionConfig::new(Default::default(), models()))
                .build()
                .unwrap(),
        );

        let sender = engine.clone();
        let turn = tokio::spawn(async move { sender.submit("hello").await });
        while cache.pending_writes() == 0 {
            tokio::task::yield_now().await;
        }

        // the user message is visible while its cache write is still blocked
        let view = tokio::time::timeout(Duration::from_secs(1), engine.view())
            .await
            .unwrap();
        assert_eq!(view.phase, Phase::Sending);
        assert_eq!(contents(&view.messages), vec![WELCOME_MESSAGE, "hello"]);

        cache.open();
        let outcome = turn.await.unwrap().unwrap();
        assert_eq!(outcome.status, TurnStatus::Success);
        let cached = cache.get(MESSAGES_KEY).await.unwrap().unwrap();
        let cached: Vec<Message> = serde_json::from_str(&cached).unwrap();
        assert_eq!(cached.len(), 3);
    }
}
