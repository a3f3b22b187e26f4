//! Mock Market Data
//!
//! For development and demo purposes. Quotes come from the static
//! catalogue, indicators are derived from price and 24h change, and news is
//! a fixed set of headlines.

use assistant_core::{
    error::{AssistantError, Result},
    market::{
        CommodityQuote, CryptoQuote, Macd, MarketContextProvider, NewsItem, TechnicalAnalysis,
        Trend,
    },
};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal_macros::dec;

use crate::error::SimError;
use crate::instruments::{self, AssetClass, Instrument};

/// (title, source, summary, related symbols)
const HEADLINES: &[(&str, &str, &str, &[&str])] = &[
    (
        "Bitcoin holds above key support as ETF inflows continue",
        "CoinDesk",
        "Spot ETF demand keeps BTC bid while funding rates stay neutral.",
        &["BTC"],
    ),
    (
        "Ethereum gas fees drop to multi-month lows",
        "The Block",
        "Layer-2 adoption pushes mainnet activity down.",
        &["ETH"],
    ),
    (
        "Gold steadies near record as traders weigh rate-cut bets",
        "Reuters",
        "Bullion is supported by central-bank buying.",
        &["XAU"],
    ),
    (
        "Euro edges higher after stronger PMI data",
        "Bloomberg",
        "EUR/USD climbs as eurozone services activity beats forecasts.",
        &["EURUSD"],
    ),
    (
        "Ripple settlement volumes hit new high",
        "Decrypt",
        "Cross-border corridors drive record on-ledger payments.",
        &["XRP"],
    ),
    (
        "Yen slides as BoJ keeps policy unchanged",
        "Financial Times",
        "USD/JPY pushes toward the 152 handle.",
        &["USDJPY"],
    ),
    (
        "Cardano upgrade goes live on mainnet",
        "CoinTelegraph",
        "Governance features roll out after community vote.",
        &["ADA"],
    ),
    (
        "Fed minutes signal patience on rate cuts",
        "Wall Street Journal",
        "Risk assets pare gains as officials stress data dependence.",
        &[],
    ),
];

/// Mock market-context provider with static prices
pub struct MockMarketData {
    /// Random price variance in percent
    variance_percent: f64,
}

impl Default for MockMarketData {
    fn default() -> Self {
        Self::new()
    }
}

impl MockMarketData {
    pub const fn new() -> Self {
        Self {
            variance_percent: 0.0,
        }
    }

    /// Create with price variance so refreshed snapshots move
    pub const fn with_variance(variance_percent: f64) -> Self {
        Self { variance_percent }
    }

    fn instrument(symbol: &str) -> Result<&'static Instrument> {
        instruments::lookup(symbol).ok_or_else(|| {
            AssistantError::context("technical", SimError::UnsupportedSymbol(symbol.to_string()))
        })
    }

    fn price(&self, instrument: &Instrument) -> Decimal {
        if self.variance_percent <= 0.0 {
            return instrument.price;
        }
        let factor = 1.0 + (jitter() - 0.5) * 2.0 * self.variance_percent / 100.0;
        (instrument.price * Decimal::from_f64_retain(factor).unwrap_or(Decimal::ONE)).round_dp(4)
    }

    fn analyse(&self, instrument: &Instrument) -> TechnicalAnalysis {
        let price = self.price(instrument);
        let change = instrument.change_24h.to_f64().unwrap_or(0.0);
        let trend = if change > 1.0 {
            Trend::Bullish
        } else if change < -1.0 {
            Trend::Bearish
        } else {
            Trend::Sideways
        };
        let macd_value = price.to_f64().unwrap_or(0.0) * change / 1000.0;
        let signal = macd_value * 0.8;
        let drift = instrument.change_24h / dec!(100);

        TechnicalAnalysis {
            symbol: instrument.symbol.to_string(),
            timeframe: "1D".into(),
            price,
            rsi: 6.0f64.mul_add(change, 50.0).clamp(5.0, 95.0),
            macd: Macd {
                value: macd_value,
                signal,
                histogram: macd_value - signal,
            },
            sma_50: (price * (Decimal::ONE - drift)).round_dp(4),
            sma_200: (price * (Decimal::ONE - drift * dec!(3))).round_dp(4),
            support: (price * dec!(0.97)).round_dp(4),
            resistance: (price * dec!(1.03)).round_dp(4),
            trend,
        }
    }
}

#[async_trait]
impl MarketContextProvider for MockMarketData {
    async fn fetch_market_news(&self, symbol: Option<&str>, limit: usize) -> Result<Vec<NewsItem>> {
        let wanted = symbol.and_then(instruments::lookup).map(|i| i.symbol);
        let now = Utc::now();

        let related = HEADLINES
            .iter()
            .filter(|(_, _, _, symbols)| wanted.is_some_and(|w| symbols.contains(&w)));
        let general = HEADLINES
            .iter()
            .filter(|(_, _, _, symbols)| wanted.is_none_or(|w| !symbols.contains(&w)));

        Ok(related
            .chain(general)
            .take(limit)
            .zip(0i64..)
            .map(|((title, source, summary, symbols), age)| NewsItem {
                title: (*title).to_string(),
                source: (*source).to_string(),
                summary: (*summary).to_string(),
                symbol: symbols.first().map(|s| (*s).to_string()),
                published_at: now - Duration::hours(age),
            })
            .collect())
    }

    async fn fetch_technical_analysis(&self, symbol: &str) -> Result<TechnicalAnalysis> {
        let instrument = Self::instrument(symbol)?;
        Ok(self.analyse(instrument))
    }

    async fn fetch_crypto_market_data(&self, coins: &[&str]) -> Result<Vec<CryptoQuote>> {
        let quotes = coins
            .iter()
            .filter_map(|coin| {
                let instrument = instruments::lookup(coin)?;
                if instrument.class != AssetClass::Crypto {
                    tracing::debug!(coin, "Not a crypto instrument, skipping");
                    return None;
                }
                Some(CryptoQuote {
                    symbol: instrument.symbol.to_string(),
                    name: instrument.name.to_string(),
                    price_usd: self.price(instrument),
                    change_24h: instrument.change_24h,
                    market_cap: instrument.market_cap,
                })
            })
            .collect();
        Ok(quotes)
    }

    async fn fetch_commodity_prices(&self) -> Result<Vec<CommodityQuote>> {
        Ok(instruments::of_class(AssetClass::Commodity)
            .map(|instrument| CommodityQuote {
                symbol: instrument.symbol.to_string(),
                name: instrument.name.to_string(),
                price_usd: self.price(instrument),
                change_24h: instrument.change_24h,
                unit: instrument.unit.unwrap_or_default().to_string(),
            })
            .collect())
    }

    fn name(&self) -> &str {
        "MockMarketData"
    }
}

/// Pseudo-random number in `[0, 1)` from the clock
fn jitter() -> f64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.subsec_nanos());
    f64::from(nanos % 1000) / 1000.0
}
