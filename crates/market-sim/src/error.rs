//! Error Types for the market simulator

use assistant_core::AssistantError;
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SimError {
    #[error("Instrument not supported: {0}")]
    UnsupportedSymbol(String),

    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    #[error("Position not found: {0}")]
    PositionNotFound(String),

    #[error("Insufficient margin: need {needed}, have {available}")]
    InsufficientMargin { needed: Decimal, available: Decimal },
}

/// Every simulator error is an order-side rejection the user should see
impl From<SimError> for AssistantError {
    fn from(err: SimError) -> Self {
        Self::Broker(err.to_string())
    }
}
