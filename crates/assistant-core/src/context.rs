//! Context Selection
//!
//! Decides which market data to fetch for a query using fixed keyword sets,
//! then fetches it. Selection is a pure function of the query text; fetching
//! tolerates each category failing on its own.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::error::{AssistantError, Result};
use crate::market::{MarketContextBundle, MarketContextProvider};

pub const TECHNICAL_KEYWORDS: &[&str] =
    &["technical", "analysis", "indicators", "chart", "rsi", "macd"];
pub const CRYPTO_KEYWORDS: &[&str] = &["crypto", "bitcoin", "btc", "ethereum", "eth"];
pub const COMMODITY_KEYWORDS: &[&str] = &["commodity", "commodities", "gold", "oil", "metals"];
pub const NEWS_KEYWORDS: &[&str] = &["news", "market", "latest", "update", "information"];

/// Coins quoted when the query is about crypto
pub const CRYPTO_BASKET: &[&str] = &["BTC", "ETH", "XRP", "ADA", "SOL"];
/// Coins quoted in the baseline bundle
pub const BASELINE_COINS: &[&str] = &["BTC", "ETH"];

pub const NEWS_LIMIT: usize = 5;
pub const BASELINE_NEWS_LIMIT: usize = 2;

static SYMBOL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(btc|eth|xrp|ada|btcusd|ethusd|eurusd|gbpusd|usdjpy|gold|xauusd)\b")
        .expect("symbol pattern is valid")
});

/// Which context categories a query asks for
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ContextPlan {
    /// Instrument mentioned in the query, uppercased
    pub symbol: Option<String>,
    pub technical: bool,
    pub crypto: bool,
    pub commodities: bool,
    pub news: bool,
}

impl ContextPlan {
    /// Symbol to fetch technical analysis for. Technical keywords alone,
    /// without a recognised instrument, fetch nothing.
    pub fn technical_symbol(&self) -> Option<&str> {
        if self.technical {
            self.symbol.as_deref()
        } else {
            None
        }
    }
}

fn mentions_any(text: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| text.contains(k))
}

/// First instrument token in the query, uppercased
pub fn detect_symbol(query: &str) -> Option<String> {
    let lowered = query.to_lowercase();
    SYMBOL_RE
        .captures(&lowered)
        .map(|caps| caps[1].to_uppercase())
}

/// Map a query to the context categories it triggers.
///
/// Matching is a case-insensitive substring test and every category is
/// evaluated independently, so several may fire at once.
pub fn select_context(query: &str) -> ContextPlan {
    let lowered = query.to_lowercase();
    ContextPlan {
        symbol: detect_symbol(&lowered),
        technical: mentions_any(&lowered, TECHNICAL_KEYWORDS),
        crypto: mentions_any(&lowered, CRYPTO_KEYWORDS),
        commodities: mentions_any(&lowered, COMMODITY_KEYWORDS),
        news: mentions_any(&lowered, NEWS_KEYWORDS),
    }
}

/// Result of fetching a plan
#[derive(Clone, Debug, Default)]
pub struct GatheredContext {
    pub bundle: MarketContextBundle,
    /// Non-fatal fetch failures, one per failed category
    pub notices: Vec<String>,
    /// Whether the baseline bundle was used
    pub baseline: bool,
}

impl GatheredContext {
    fn keep<T>(&mut self, outcome: Option<Result<T>>, category: &str) -> Option<T> {
        match outcome? {
            Ok(value) => Some(value),
            Err(e) => {
                let err = match e {
                    err @ AssistantError::ContextFetch { .. } => err,
                    other => AssistantError::context(category, other),
                };
                tracing::warn!(category, error = %err, "Context fetch failed");
                self.notices.push(err.to_string());
                None
            }
        }
    }
}

/// Fetch everything the plan asks for.
///
/// Fetches run concurrently and fail independently. When nothing could be
/// gathered the baseline bundle (two coins, two headlines) is fetched so the
/// prompt always carries some market data.
pub async fn gather_context(
    provider: &dyn MarketContextProvider,
    plan: &ContextPlan,
) -> GatheredContext {
    let technical = async {
        match plan.technical_symbol() {
            Some(symbol) => Some(provider.fetch_technical_analysis(symbol).await),
            None => None,
        }
    };
    let crypto = async {
        if plan.crypto {
            Some(provider.fetch_crypto_market_data(CRYPTO_BASKET).await)
        } else {
            None
        }
    };
    let commodities = async {
        if plan.commodities {
            Some(provider.fetch_commodity_prices().await)
        } else {
            None
        }
    };
    let news = async {
        if plan.news {
            Some(
                provider
                    .fetch_market_news(plan.symbol.as_deref(), NEWS_LIMIT)
                    .await,
            )
        } else {
            None
        }
    };

    let (technical, crypto, commodities, news) =
        futures::join!(technical, crypto, commodities, news);

    let mut gathered = GatheredContext::default();
    gathered.bundle.technical_analysis = gathered.keep(technical, "technical analysis");
    gathered.bundle.crypto_data = gathered.keep(crypto, "crypto");
    gathered.bundle.commodity_data = gathered.keep(commodities, "commodities");
    gathered.bundle.market_news = gathered.keep(news, "news");

    if gathered.bundle.is_empty() {
        tracing::debug!(provider = provider.name(), "No context matched, using baseline bundle");
        let (crypto, news) = futures::join!(
            provider.fetch_crypto_market_data(BASELINE_COINS),
            provider.fetch_market_news(None, BASELINE_NEWS_LIMIT),
        );
        gathered.baseline = true;
        gathered.bundle.crypto_data = gathered.keep(Some(crypto), "crypto");
        gathered.bundle.market_news = gathered.keep(Some(news), "news");
    }

    tracing::debug!(
        fields = ?gathered.bundle.populated(),
        baseline = gathered.baseline,
        "Gathered market context"
    );
    gathered
}
