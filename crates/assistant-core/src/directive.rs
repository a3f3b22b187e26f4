//! Trade Directives
//!
//! The assistant proposes trades inline using the bracket grammar
//! `[TRADE: ACTION SYMBOL AMOUNT [PRICE] [STOPLOSS] [TAKEPROFIT]]`.
//! This module extracts the first such directive from a reply and holds the
//! confirmation state that gates its execution.

use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Marker the reply must contain before extraction is attempted
pub const DIRECTIVE_MARKER: &str = "[TRADE:";

static DIRECTIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\[TRADE:\s*((?i:buy|sell))\s+([A-Za-z0-9]+)\s+(\d+(?:\.\d+)?)(?:\s+(\d+(?:\.\d+)?))?(?:\s+(\d+(?:\.\d+)?))?(?:\s+(\d+(?:\.\d+)?))?\s*\]",
    )
    .expect("directive pattern is valid")
});

/// Order side
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeAction {
    Buy,
    Sell,
}

impl TradeAction {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }
}

impl std::fmt::Display for TradeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TradeAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "buy" => Ok(Self::Buy),
            "sell" => Ok(Self::Sell),
            other => Err(format!("unknown trade action: {other}")),
        }
    }
}

/// A trade proposed by the assistant
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeDirective {
    pub action: TradeAction,
    pub symbol: String,
    pub amount: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_loss: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub take_profit: Option<Decimal>,
}

impl std::fmt::Display for TradeDirective {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.action, self.amount, self.symbol)?;
        if let Some(price) = self.price {
            write!(f, " @ {price}")?;
        }
        if let Some(sl) = self.stop_loss {
            write!(f, ", SL {sl}")?;
        }
        if let Some(tp) = self.take_profit {
            write!(f, ", TP {tp}")?;
        }
        Ok(())
    }
}

/// A directive together with the exact bracket text it was parsed from
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirectiveMatch {
    pub directive: TradeDirective,
    pub command: String,
}

/// Extract the first directive from an assistant reply.
///
/// Returns `None` when the reply has no `[TRADE:` marker or the bracket text
/// does not follow the grammar.
pub fn extract_directive(text: &str) -> Option<DirectiveMatch> {
    if !text.contains(DIRECTIVE_MARKER) {
        return None;
    }

    let caps = DIRECTIVE_RE.captures(text)?;
    // Outer None: present but unparseable. Inner None: not supplied.
    let decimal = |idx: usize| -> Option<Option<Decimal>> {
        match caps.get(idx) {
            Some(m) => Decimal::from_str(m.as_str()).ok().map(Some),
            None => Some(None),
        }
    };

    let directive = TradeDirective {
        action: caps[1].parse().ok()?,
        symbol: caps[2].to_uppercase(),
        amount: Decimal::from_str(&caps[3]).ok()?,
        price: decimal(4)?,
        stop_loss: decimal(5)?,
        take_profit: decimal(6)?,
    };

    Some(DirectiveMatch {
        directive,
        command: caps[0].to_string(),
    })
}

/// Lifecycle of a proposed trade
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Executed,
    Rejected,
    Failed,
}

/// Record of a directive attached to the message that proposed it
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    #[serde(flatten)]
    pub directive: TradeDirective,
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ExecutionResult {
    pub const fn pending(directive: TradeDirective) -> Self {
        Self {
            directive,
            status: ExecutionStatus::Pending,
            order_id: None,
            message: None,
        }
    }
}

/// The single trade awaiting user confirmation
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmState {
    pub show: bool,
    pub command: Option<String>,
}

impl ConfirmState {
    pub fn pending(command: impl Into<String>) -> Self {
        Self {
            show: true,
            command: Some(command.into()),
        }
    }

    /// The pending command; ignored unless the dialog is shown
    pub fn pending_command(&self) -> Option<&str> {
        if self.show {
            self.command.as_deref()
        } else {
            None
        }
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
