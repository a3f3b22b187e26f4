//! System Prompt Construction
//!
//! Assembles the system prompt from the session mode, the account type and
//! whatever market context was gathered for the turn. Pure string assembly,
//! no I/O.

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;

use crate::market::{CommodityQuote, CryptoQuote, MarketContextBundle, NewsItem, TechnicalAnalysis};
use crate::session::AccountType;

/// Headlines included in the prompt at most
pub const MAX_HEADLINES: usize = 3;

const ROLE_DESCRIPTION: &str = "You are an expert AI trading assistant embedded in a trading \
dashboard. You help the user understand market conditions, interpret technical indicators, \
follow relevant news and manage risk. Be concise, ground your answers in the market data \
provided below when it is relevant, and always point out the risks of any trade you discuss.";

const TRADE_PROTOCOL: &str = r"## Trade Execution Protocol

Control Mode is enabled. When the user asks you to place a trade, include exactly one
directive on its own line using this exact format:

[TRADE: ACTION SYMBOL AMOUNT PRICE STOPLOSS TAKEPROFIT]

- ACTION is BUY or SELL
- SYMBOL is the instrument, e.g. BTCUSD, EURUSD, XAUUSD
- AMOUNT is the position size
- PRICE, STOPLOSS and TAKEPROFIT are optional decimal levels; omit trailing values you do not need

Examples:
[TRADE: BUY BTCUSD 0.1 42000 40000 45000]
[TRADE: SELL EURUSD 1000]

Every directive is shown to the user for confirmation before execution. Never emit a
directive unless the user clearly intends to trade.";

const ADVISORY_NOTE: &str = "Control Mode is disabled. Provide analysis and education only \
and do not format any reply as an executable trade instruction.";

/// Builder for the assistant's system prompt
#[derive(Clone, Debug)]
pub struct PromptBuilder {
    control_mode: bool,
    account_type: AccountType,
    date: NaiveDate,
}

impl PromptBuilder {
    /// Builder dated today (UTC)
    pub fn new(control_mode: bool, account_type: AccountType) -> Self {
        Self {
            control_mode,
            account_type,
            date: Utc::now().date_naive(),
        }
    }

    /// Pin the date printed in the prompt
    #[must_use]
    pub const fn on_date(mut self, date: NaiveDate) -> Self {
        self.date = date;
        self
    }

    /// Assemble the prompt for a context bundle
    pub fn build(&self, context: &MarketContextBundle) -> String {
        let mut prompt = String::from(ROLE_DESCRIPTION);
        prompt.push_str("\n\n");

        let mode = if self.control_mode {
            "Control Mode (trades may be proposed for execution)"
        } else {
            "Advisory Mode (analysis only)"
        };
        prompt.push_str(&format!("Current mode: {mode}\n"));
        prompt.push_str(&format!("Account type: {}\n", self.account_type.label()));
        prompt.push_str(&format!("Current date: {}\n", self.date.format("%Y-%m-%d")));

        let market = market_section(context);
        if !market.is_empty() {
            prompt.push_str("\n## Market Context\n");
            prompt.push_str(&market);
        }

        prompt.push('\n');
        if self.control_mode {
            prompt.push_str(TRADE_PROTOCOL);
        } else {
            prompt.push_str(ADVISORY_NOTE);
        }
        prompt.push('\n');
        prompt
    }
}

/// Build a system prompt dated today
pub fn build_prompt(
    control_mode: bool,
    account_type: AccountType,
    context: &MarketContextBundle,
) -> String {
    PromptBuilder::new(control_mode, account_type).build(context)
}

fn market_section(context: &MarketContextBundle) -> String {
    let mut out = String::new();

    if let Some(coins) = context.crypto_data.as_deref().filter(|c| !c.is_empty()) {
        out.push_str("\n### Cryptocurrency Prices\n");
        for coin in coins {
            out.push_str(&crypto_line(coin));
        }
    }

    if let Some(ta) = &context.technical_analysis {
        out.push_str(&technical_block(ta));
    }

    if let Some(commodities) = context.commodity_data.as_deref().filter(|c| !c.is_empty()) {
        out.push_str("\n### Commodity Prices\n");
        for commodity in commodities {
            out.push_str(&commodity_line(commodity));
        }
    }

    if let Some(news) = context.market_news.as_deref().filter(|n| !n.is_empty()) {
        out.push_str("\n### Latest News\n");
        for (i, item) in news.iter().take(MAX_HEADLINES).enumerate() {
            out.push_str(&headline_line(i + 1, item));
        }
    }

    out
}

/// "▲ 2.35%" or "▼ 1.20%"
fn change_label(change: Decimal) -> String {
    let glyph = if change.is_sign_negative() { '▼' } else { '▲' };
    format!("{glyph} {:.2}%", change.abs())
}

fn crypto_line(coin: &CryptoQuote) -> String {
    format!(
        "- {} ({}): ${:.2} {} (24h)\n",
        coin.name,
        coin.symbol,
        coin.price_usd,
        change_label(coin.change_24h)
    )
}

fn commodity_line(commodity: &CommodityQuote) -> String {
    format!(
        "- {} ({}): ${:.2}/{} {} (24h)\n",
        commodity.name,
        commodity.symbol,
        commodity.price_usd,
        commodity.unit,
        change_label(commodity.change_24h)
    )
}

fn technical_block(ta: &TechnicalAnalysis) -> String {
    let mut out = format!("\n### Technical Analysis: {} ({})\n", ta.symbol, ta.timeframe);
    out.push_str(&format!("- Price: ${:.2}\n", ta.price));
    out.push_str(&format!("- Trend: {}\n", ta.trend));
    out.push_str(&format!("- RSI (14): {:.2} ({})\n", ta.rsi, ta.rsi_label()));
    out.push_str(&format!(
        "- MACD: {:.2} (signal {:.2}, histogram {:.2})\n",
        ta.macd.value, ta.macd.signal, ta.macd.histogram
    ));
    out.push_str(&format!(
        "- SMA 50: ${:.2}, SMA 200: ${:.2}\n",
        ta.sma_50, ta.sma_200
    ));
    out.push_str(&format!(
        "- Support: ${:.2}, Resistance: ${:.2}\n",
        ta.support, ta.resistance
    ));
    out
}

fn headline_line(index: usize, item: &NewsItem) -> String {
    format!("{index}. {} ({})\n", item.title, item.source)
}
