//! Broker Gateway
//!
//! Order-routing interface the engine hands confirmed trades to.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::directive::{TradeAction, TradeDirective};
use crate::error::Result;

/// An order to place
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub action: TradeAction,
    pub amount: Decimal,
    /// Limit price; `None` means market
    pub price: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
}

impl From<&TradeDirective> for OrderRequest {
    fn from(directive: &TradeDirective) -> Self {
        Self {
            symbol: directive.symbol.clone(),
            action: directive.action,
            amount: directive.amount,
            price: directive.price,
            stop_loss: directive.stop_loss,
            take_profit: directive.take_profit,
        }
    }
}

/// Acknowledgement of a filled order
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderReceipt {
    pub order_id: String,
    pub position_id: String,
    pub symbol: String,
    pub action: TradeAction,
    pub amount: Decimal,
    pub fill_price: Decimal,
    pub placed_at: DateTime<Utc>,
}

/// A position held at the broker
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenPosition {
    pub id: String,
    pub symbol: String,
    pub action: TradeAction,
    pub amount: Decimal,
    pub entry_price: Decimal,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub opened_at: DateTime<Utc>,
}

/// New protective levels for a position. `None` leaves a level unchanged.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionUpdate {
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
}

/// Broker client trait (Strategy pattern)
///
/// Implement this for each broker connection.
#[async_trait]
pub trait BrokerGateway: Send + Sync {
    async fn place_order(&self, order: OrderRequest) -> Result<OrderReceipt>;

    async fn close_position(&self, position_id: &str) -> Result<()>;

    async fn modify_position(&self, position_id: &str, update: PositionUpdate)
    -> Result<OpenPosition>;

    async fn get_open_positions(&self) -> Result<Vec<OpenPosition>>;

    /// Broker name
    fn name(&self) -> &str;
}
