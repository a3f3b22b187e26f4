//! Application State

use std::sync::Arc;

use assistant_core::{AssistantEngine, BrokerGateway, MarketSnapshotRefresher};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Conversation engine for the single dashboard session
    pub engine: Arc<AssistantEngine>,

    /// Background market snapshot
    pub refresher: Arc<MarketSnapshotRefresher>,

    /// Broker the engine routes confirmed trades to
    pub broker: Arc<dyn BrokerGateway>,
}
