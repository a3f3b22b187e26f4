//! Market Context
//!
//! Market data the assistant grounds its system prompt on, and the
//! provider trait it is fetched through.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A market headline
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewsItem {
    pub title: String,
    pub source: String,
    #[serde(default)]
    pub summary: String,
    /// Instrument the story is about, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    pub published_at: DateTime<Utc>,
}

/// Direction of the prevailing trend
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Bullish,
    Bearish,
    Sideways,
}

impl std::fmt::Display for Trend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bullish => write!(f, "Bullish"),
            Self::Bearish => write!(f, "Bearish"),
            Self::Sideways => write!(f, "Sideways"),
        }
    }
}

/// MACD line, signal line and histogram
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Macd {
    pub value: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// Indicator snapshot for one instrument
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TechnicalAnalysis {
    pub symbol: String,
    pub timeframe: String,
    pub price: Decimal,
    pub rsi: f64,
    pub macd: Macd,
    pub sma_50: Decimal,
    pub sma_200: Decimal,
    pub support: Decimal,
    pub resistance: Decimal,
    pub trend: Trend,
}

impl TechnicalAnalysis {
    /// Qualitative RSI reading
    pub fn rsi_label(&self) -> &'static str {
        rsi_label(self.rsi)
    }
}

/// "Overbought" above 70, "Oversold" below 30, otherwise "Neutral"
pub fn rsi_label(rsi: f64) -> &'static str {
    if rsi > 70.0 {
        "Overbought"
    } else if rsi < 30.0 {
        "Oversold"
    } else {
        "Neutral"
    }
}

/// Spot quote for a cryptocurrency
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CryptoQuote {
    /// Ticker symbol (e.g., "BTC")
    pub symbol: String,
    pub name: String,
    pub price_usd: Decimal,
    /// 24-hour change percentage
    pub change_24h: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_cap: Option<Decimal>,
}

/// Spot quote for a commodity
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommodityQuote {
    pub symbol: String,
    pub name: String,
    pub price_usd: Decimal,
    pub change_24h: Decimal,
    /// Pricing unit (e.g., "oz", "bbl")
    pub unit: String,
}

/// Market data gathered for a single prompt
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketContextBundle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub technical_analysis: Option<TechnicalAnalysis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crypto_data: Option<Vec<CryptoQuote>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commodity_data: Option<Vec<CommodityQuote>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_news: Option<Vec<NewsItem>>,
}

impl MarketContextBundle {
    pub const fn is_empty(&self) -> bool {
        self.technical_analysis.is_none()
            && self.crypto_data.is_none()
            && self.commodity_data.is_none()
            && self.market_news.is_none()
    }

    /// Names of the populated fields, for logging and turn reports
    pub fn populated(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.technical_analysis.is_some() {
            fields.push("technical_analysis");
        }
        if self.crypto_data.is_some() {
            fields.push("crypto_data");
        }
        if self.commodity_data.is_some() {
            fields.push("commodity_data");
        }
        if self.market_news.is_some() {
            fields.push("market_news");
        }
        fields
    }
}

/// Source of market context (Strategy pattern)
///
/// Implement this for each data vendor. Every call is independent and
/// stateless; failures are reported per call.
#[async_trait]
pub trait MarketContextProvider: Send + Sync {
    /// Latest headlines, optionally about one instrument
    async fn fetch_market_news(&self, symbol: Option<&str>, limit: usize) -> Result<Vec<NewsItem>>;

    /// Indicator snapshot for an instrument
    async fn fetch_technical_analysis(&self, symbol: &str) -> Result<TechnicalAnalysis>;

    /// Quotes for the given coin tickers
    async fn fetch_crypto_market_data(&self, coins: &[&str]) -> Result<Vec<CryptoQuote>>;

    /// Quotes for the tracked commodities
    async fn fetch_commodity_prices(&self) -> Result<Vec<CommodityQuote>>;

    /// Provider name
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rsi_labels() {
        assert_eq!(rsi_label(70.1), "Overbought");
        assert_eq!(rsi_label(70.0), "Neutral");
        assert_eq!(rsi_label(30.0), "Neutral");
        assert_eq!(rsi_label(29.9), "Oversold");
    }

    #[test]
    fn test_bundle_populated() {
        let mut bundle = MarketContextBundle::default();
        assert!(bundle.is_empty());

        bundle.market_news = Some(Vec::new());
        assert!(!bundle.is_empty());
        assert_eq!(bundle.populated(), vec!["market_news"]);
    }
}
