//! Trading assistant HTTP Server
//!
//! Axum-based server exposing the assistant conversation engine, the
//! stateless `ai-chat` completion, the market snapshot and paper positions.

mod config;
mod handlers;
mod state;

use std::sync::Arc;

use tokio::sync::watch;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use assistant_core::{EngineBuilder, LlmProvider, MarketSnapshotRefresher};
use assistant_runtime::{ChatCompletionsProvider, FileConversationStore, JsonFileCache};
use market_sim::{MockMarketData, PaperBroker};

use crate::config::AppConfig;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env();

    // Initialize LLM provider
    let provider = Arc::new(ChatCompletionsProvider::from_config(config.llm.clone())?);
    if config.llm.api_key.is_none() {
        tracing::warn!("⚠ OPENAI_API_KEY not set - requests are sent unauthenticated");
    }
    match provider.health_check().await {
        Ok(true) => tracing::info!("✓ Connected to LLM endpoint {}", config.llm.base_url),
        Ok(false) | Err(_) => {
            tracing::warn!("⚠ LLM endpoint {} not reachable - turns will fail", config.llm.base_url);
        }
    }
    tracing::info!(
        primary = %config.session.models.primary_model,
        fallback = %config.session.models.fallback_model,
        account = %config.session.account_type,
        "Model configuration"
    );

    // Market data and broker
    let market = Arc::new(MockMarketData::with_variance(0.5));
    let broker = Arc::new(PaperBroker::default());

    // Persistence
    let store = Arc::new(FileConversationStore::open(config.data_dir.join("conversations")).await?);
    let cache = Arc::new(JsonFileCache::open(config.data_dir.join("cache.json")).await?);

    // Build the engine and pick up the previous conversation
    let engine = EngineBuilder::new()
        .provider(provider)
        .market(market.clone())
        .store(store)
        .cache(cache)
        .broker(broker.clone())
        .config(config.session.clone())
        .build()?;
    engine.restore().await;
    let preferences = engine.preferences().await;

    // Background market snapshot
    let refresher = Arc::new(MarketSnapshotRefresher::new(market, preferences.auto_refresh));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let refresher_task = tokio::spawn(refresher.clone().run(shutdown_rx));

    let state = AppState {
        engine: Arc::new(engine),
        refresher,
        broker,
    };

    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = handlers::router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = config.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("🚀 trade-assistant server running on http://{}", addr);
    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("");
    tracing::info!("Endpoints:");
    tracing::info!("  GET  /health                  - Health check");
    tracing::info!("  GET  /api/assistant           - Conversation state");
    tracing::info!("  POST /api/assistant/messages  - Send message");
    tracing::info!("  POST /api/assistant/retry     - Undo last message");
    tracing::info!("  POST /api/assistant/clear     - New chat");
    tracing::info!("  POST /api/assistant/confirm   - Confirm/reject trade");
    tracing::info!("  GET  /api/preferences         - Control mode & auto-refresh");
    tracing::info!("  POST /api/ai-chat             - Stateless completion");
    tracing::info!("  GET  /api/market/snapshot     - Refreshed prices");
    tracing::info!("  GET  /api/positions           - Open paper positions");
    tracing::info!("  (control mode: {}, auto-refresh: {})", preferences.control_mode, preferences.auto_refresh);
    tracing::info!("");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await?;

    tracing::info!("Shutting down");
    shutdown_tx.send(true).ok();
    refresher_task.await?;

    Ok(())
}
