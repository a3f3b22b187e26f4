//! # market-sim
//!
//! Simulated market collaborators for the trading assistant.
//!
//! - [`MockMarketData`] answers every market-context request from a static
//!   instrument catalogue (crypto, commodities, forex) with derived
//!   indicators and canned headlines.
//! - [`PaperBroker`] fills orders immediately against an in-memory cash
//!   balance and tracks open positions.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  Instrument catalogue (rust_decimal prices)  │
//! ├──────────────────────┬───────────────────────┤
//! │  MockMarketData      │  PaperBroker          │
//! │  (context provider)  │  (broker gateway)     │
//! └──────────────────────┴───────────────────────┘
//! ```

pub mod error;
pub mod instruments;
pub mod mock;
pub mod paper;

pub use error::SimError;
pub use instruments::{AssetClass, Instrument};
pub use mock::MockMarketData;
pub use paper::PaperBroker;
