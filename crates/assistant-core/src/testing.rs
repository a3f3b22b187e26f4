//! In-crate fakes shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::{Notify, Semaphore};

use crate::broker::{BrokerGateway, OpenPosition, OrderReceipt, OrderRequest, PositionUpdate};
use crate::error::{AssistantError, Result};
use crate::market::{
    CommodityQuote, CryptoQuote, Macd, MarketContextProvider, NewsItem, TechnicalAnalysis, Trend,
};
use crate::message::Message;
use crate::provider::{Completion, FinishReason, GenerationOptions, LlmProvider};
use crate::store::{LocalCache, MemoryLocalCache};

/// LLM fake answering per model name.
///
/// Each model answers its scripted results in order; the last one repeats.
#[derive(Default)]
pub struct ScriptedProvider {
    script: Mutex<HashMap<String, VecDeque<std::result::Result<String, String>>>>,
    calls: Mutex<Vec<(String, Vec<Message>)>>,
    gate: Option<Arc<Notify>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, model: &str, content: &str) -> Self {
        self.push(model, Ok(content.into()))
    }

    pub fn fail(self, model: &str, error: &str) -> Self {
        self.push(model, Err(error.into()))
    }

    fn push(self, model: &str, result: std::result::Result<String, String>) -> Self {
        self.script
            .lock()
            .unwrap()
            .entry(model.into())
            .or_default()
            .push_back(result);
        self
    }

    fn next_result(&self, model: &str) -> Option<std::result::Result<String, String>> {
        let mut script = self.script.lock().unwrap();
        let queue = script.get_mut(model)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }

    /// Hold every completion until the gate is notified
    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn models_called(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(m, _)| m.clone()).collect()
    }

    pub fn last_request(&self) -> Vec<Message> {
        self.calls
            .lock()
            .unwrap()
            .last()
            .map(|(_, msgs)| msgs.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "Scripted"
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    async fn complete(&self, messages: &[Message], options: &GenerationOptions) -> Result<Completion> {
        self.calls
            .lock()
            .unwrap()
            .push((options.model.clone(), messages.to_vec()));
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        match self.next_result(&options.model) {
            Some(Ok(content)) => Ok(Completion {
                content,
                model: options.model.clone(),
                usage: None,
                finish_reason: Some(FinishReason::Stop),
            }),
            Some(Err(e)) => Err(AssistantError::Provider(e)),
            None => Err(AssistantError::Provider(format!("no script for {}", options.model))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MarketCall {
    News(Option<String>, usize),
    Technical(String),
    Crypto(Vec<String>),
    Commodities,
}

/// Market-data fake recording every call
#[derive(Default)]
pub struct FakeMarket {
    calls: Mutex<Vec<MarketCall>>,
    failing: Vec<&'static str>,
}

impl FakeMarket {
    /// Categories ("news", "technical", "crypto", "commodities") that error
    pub fn failing(categories: &[&'static str]) -> Self {
        Self {
            calls: Mutex::default(),
            failing: categories.to_vec(),
        }
    }

    pub fn calls(&self) -> Vec<MarketCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: MarketCall, category: &str) -> Result<()> {
        self.calls.lock().unwrap().push(call);
        if self.failing.contains(&category) {
            Err(AssistantError::context(category, "upstream unavailable"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl MarketContextProvider for FakeMarket {
    async fn fetch_market_news(&self, symbol: Option<&str>, limit: usize) -> Result<Vec<NewsItem>> {
        self.record(MarketCall::News(symbol.map(String::from), limit), "news")?;
        Ok((0..limit)
            .map(|i| NewsItem {
                title: format!("Headline {i}"),
                source: "Fake".into(),
                summary: String::new(),
                symbol: symbol.map(String::from),
                published_at: Utc::now(),
            })
            .collect())
    }

    async fn fetch_technical_analysis(&self, symbol: &str) -> Result<TechnicalAnalysis> {
        self.record(MarketCall::Technical(symbol.into()), "technical")?;
        Ok(TechnicalAnalysis {
            symbol: symbol.into(),
            timeframe: "1D".into(),
            price: Decimal::from(100),
            rsi: 55.0,
            macd: Macd { value: 1.0, signal: 0.5, histogram: 0.5 },
            sma_50: Decimal::from(95),
            sma_200: Decimal::from(90),
            support: Decimal::from(92),
            resistance: Decimal::from(110),
            trend: Trend::Bullish,
        })
    }

    async fn fetch_crypto_market_data(&self, coins: &[&str]) -> Result<Vec<CryptoQuote>> {
        self.record(
            MarketCall::Crypto(coins.iter().map(|c| (*c).to_string()).collect()),
            "crypto",
        )?;
        Ok(coins
            .iter()
            .map(|c| CryptoQuote {
                symbol: (*c).to_string(),
                name: (*c).to_string(),
                price_usd: Decimal::from(10),
                change_24h: Decimal::ONE,
                market_cap: None,
            })
            .collect())
    }

    async fn fetch_commodity_prices(&self) -> Result<Vec<CommodityQuote>> {
        self.record(MarketCall::Commodities, "commodities")?;
        Ok(vec![CommodityQuote {
            symbol: "XAU".into(),
            name: "Gold".into(),
            price_usd: Decimal::from(2300),
            change_24h: Decimal::ZERO,
            unit: "oz".into(),
        }])
    }

    fn name(&self) -> &str {
        "FakeMarket"
    }
}

/// Broker fake recording placed orders
#[derive(Default)]
pub struct FakeBroker {
    pub orders: Mutex<Vec<OrderRequest>>,
    pub reject_with: Option<String>,
}

#[async_trait]
impl BrokerGateway for FakeBroker {
    async fn place_order(&self, order: OrderRequest) -> Result<OrderReceipt> {
        if let Some(reason) = &self.reject_with {
            return Err(AssistantError::Broker(reason.clone()));
        }
        self.orders.lock().unwrap().push(order.clone());
        Ok(OrderReceipt {
            order_id: "ord-1".into(),
            position_id: "pos-1".into(),
            symbol: order.symbol,
            action: order.action,
            amount: order.amount,
            fill_price: order.price.unwrap_or(Decimal::from(100)),
            placed_at: Utc::now(),
        })
    }

    async fn close_position(&self, _position_id: &str) -> Result<()> {
        Ok(())
    }

    async fn modify_position(&self, position_id: &str, _update: PositionUpdate) -> Result<OpenPosition> {
        Err(AssistantError::Broker(format!("unknown position {position_id}")))
    }

    async fn get_open_positions(&self) -> Result<Vec<OpenPosition>> {
        Ok(Vec::new())
    }

    fn name(&self) -> &str {
        "FakeBroker"
    }
}

/// Local cache whose writes block until [`GatedCache::open`] is called
pub struct GatedCache {
    inner: MemoryLocalCache,
    permits: Semaphore,
    pending: AtomicUsize,
}

impl Default for GatedCache {
    fn default() -> Self {
        Self {
            inner: MemoryLocalCache::new(),
            permits: Semaphore::new(0),
            pending: AtomicUsize::new(0),
        }
    }
}

impl GatedCache {
    /// Writes that have started waiting for the gate
    pub fn pending_writes(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn open(&self) {
        self.permits.add_permits(1024);
    }

    async fn wait(&self) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        let _permit = self.permits.acquire().await.unwrap();
    }
}

#[async_trait]
impl LocalCache for GatedCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.wait().await;
        self.inner.set(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.wait().await;
        self.inner.remove(key).await
    }
}
