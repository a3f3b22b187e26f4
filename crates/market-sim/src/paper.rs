//! Paper Broker
//!
//! Simulated order routing. Orders fill immediately at their limit price or
//! the catalogue price, and each fill opens a position against a cash
//! balance.

use std::collections::HashMap;

use assistant_core::{
    broker::{BrokerGateway, OpenPosition, OrderReceipt, OrderRequest, PositionUpdate},
    directive::TradeAction,
    error::Result,
};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::SimError;
use crate::instruments;

/// Starting cash for a demo account
pub const DEFAULT_BALANCE: Decimal = dec!(100_000);

#[derive(Debug)]
struct Account {
    cash: Decimal,
    positions: HashMap<String, OpenPosition>,
}

/// In-memory paper trading account
pub struct PaperBroker {
    account: RwLock<Account>,
}

impl Default for PaperBroker {
    fn default() -> Self {
        Self::new(DEFAULT_BALANCE)
    }
}

impl PaperBroker {
    pub fn new(balance: Decimal) -> Self {
        Self {
            account: RwLock::new(Account {
                cash: balance,
                positions: HashMap::new(),
            }),
        }
    }

    /// Free cash
    pub async fn cash(&self) -> Decimal {
        self.account.read().await.cash
    }
}

fn overflow() -> SimError {
    SimError::InvalidOrder("order size overflows".into())
}

/// Stops must sit on the losing side of the entry and targets on the winning side
fn validate_levels(
    action: TradeAction,
    entry: Decimal,
    stop_loss: Option<Decimal>,
    take_profit: Option<Decimal>,
) -> std::result::Result<(), SimError> {
    let (stop_ok, target_ok) = match action {
        TradeAction::Buy => (
            stop_loss.is_none_or(|sl| sl < entry),
            take_profit.is_none_or(|tp| tp > entry),
        ),
        TradeAction::Sell => (
            stop_loss.is_none_or(|sl| sl > entry),
            take_profit.is_none_or(|tp| tp < entry),
        ),
    };
    if !stop_ok {
        return Err(SimError::InvalidOrder(format!(
            "stop loss is on the wrong side of {entry} for a {action} order"
        )));
    }
    if !target_ok {
        return Err(SimError::InvalidOrder(format!(
            "take profit is on the wrong side of {entry} for a {action} order"
        )));
    }
    Ok(())
}

#[async_trait]
impl BrokerGateway for PaperBroker {
    async fn place_order(&self, order: OrderRequest) -> Result<OrderReceipt> {
        if order.amount <= Decimal::ZERO {
            return Err(SimError::InvalidOrder("amount must be positive".into()).into());
        }
        let instrument = instruments::lookup(&order.symbol)
            .ok_or_else(|| SimError::UnsupportedSymbol(order.symbol.clone()))?;
        let fill_price = order.price.unwrap_or(instrument.price);
        validate_levels(order.action, fill_price, order.stop_loss, order.take_profit)?;

        let notional = order.amount.checked_mul(fill_price).ok_or_else(overflow)?;
        let mut account = self.account.write().await;
        if notional > account.cash {
            return Err(SimError::InsufficientMargin {
                needed: notional,
                available: account.cash,
            }
            .into());
        }

        let now = Utc::now();
        let position = OpenPosition {
            id: Uuid::new_v4().to_string(),
            symbol: order.symbol.to_uppercase(),
            action: order.action,
            amount: order.amount,
            entry_price: fill_price,
            stop_loss: order.stop_loss,
            take_profit: order.take_profit,
            opened_at: now,
        };
        account.cash -= notional;
        account.positions.insert(position.id.clone(), position.clone());

        let receipt = OrderReceipt {
            order_id: Uuid::new_v4().to_string(),
            position_id: position.id,
            symbol: position.symbol,
            action: position.action,
            amount: position.amount,
            fill_price,
            placed_at: now,
        };
        tracing::info!(
            order_id = %receipt.order_id,
            symbol = %receipt.symbol,
            action = %receipt.action,
            amount = %receipt.amount,
            price = %fill_price,
            "Paper order filled"
        );
        Ok(receipt)
    }

    async fn close_position(&self, position_id: &str) -> Result<()> {
        let mut account = self.account.write().await;
        let position = account
            .positions
            .get(position_id)
            .ok_or_else(|| SimError::PositionNotFound(position_id.to_string()))?;

        let exit_price = instruments::lookup(&position.symbol).map_or(position.entry_price, |i| i.price);
        let per_unit = match position.action {
            TradeAction::Buy => exit_price - position.entry_price,
            TradeAction::Sell => position.entry_price - exit_price,
        };
        let pnl = per_unit.checked_mul(position.amount).ok_or_else(overflow)?;
        let cash = position
            .entry_price
            .checked_mul(position.amount)
            .and_then(|notional| notional.checked_add(pnl))
            .and_then(|proceeds| account.cash.checked_add(proceeds))
            .ok_or_else(overflow)?;

        account.cash = cash;
        account.positions.remove(position_id);
        tracing::info!(position_id, %pnl, "Paper position closed");
        Ok(())
    }

    async fn modify_position(&self, position_id: &str, update: PositionUpdate) -> Result<OpenPosition> {
        let mut account = self.account.write().await;
        let position = account
            .positions
            .get_mut(position_id)
            .ok_or_else(|| SimError::PositionNotFound(position_id.to_string()))?;

        let stop_loss = update.stop_loss.or(position.stop_loss);
        let take_profit = update.take_profit.or(position.take_profit);
        validate_levels(position.action, position.entry_price, stop_loss, take_profit)?;

        position.stop_loss = stop_loss;
        position.take_profit = take_profit;
        Ok(position.clone())
    }

    async fn get_open_positions(&self) -> Result<Vec<OpenPosition>> {
        let account = self.account.read().await;
        let mut positions: Vec<_> = account.positions.values().cloned().collect();
        positions.sort_by_key(|p| p.opened_at);
        Ok(positions)
    }

    fn name(&self) -> &str {
        "PaperBroker"
    }
}
