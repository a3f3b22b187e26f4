//! Instrument Catalogue
//!
//! Static reference prices for every instrument the simulator quotes.
//! Uses `rust_decimal` for all prices.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;

/// Asset class of an instrument
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetClass {
    Crypto,
    Commodity,
    Forex,
}

/// A quotable instrument
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Instrument {
    pub symbol: &'static str,
    pub name: &'static str,
    pub class: AssetClass,
    pub price: Decimal,
    /// 24-hour change in percent
    pub change_24h: Decimal,
    pub market_cap: Option<Decimal>,
    /// Quoting unit for commodities ("oz", "bbl")
    pub unit: Option<&'static str>,
}

const fn crypto(
    symbol: &'static str,
    name: &'static str,
    price: Decimal,
    change_24h: Decimal,
    market_cap: Decimal,
) -> Instrument {
    Instrument {
        symbol,
        name,
        class: AssetClass::Crypto,
        price,
        change_24h,
        market_cap: Some(market_cap),
        unit: None,
    }
}

const fn commodity(
    symbol: &'static str,
    name: &'static str,
    price: Decimal,
    change_24h: Decimal,
    unit: &'static str,
) -> Instrument {
    Instrument {
        symbol,
        name,
        class: AssetClass::Commodity,
        price,
        change_24h,
        market_cap: None,
        unit: Some(unit),
    }
}

const fn forex(
    symbol: &'static str,
    name: &'static str,
    price: Decimal,
    change_24h: Decimal,
) -> Instrument {
    Instrument {
        symbol,
        name,
        class: AssetClass::Forex,
        price,
        change_24h,
        market_cap: None,
        unit: None,
    }
}

/// Every instrument the simulator knows
pub const CATALOGUE: &[Instrument] = &[
    crypto("BTC", "Bitcoin", dec!(97500), dec!(2.5), dec!(1_930_000_000_000)),
    crypto("ETH", "Ethereum", dec!(3450), dec!(1.8), dec!(415_000_000_000)),
    crypto("XRP", "Ripple", dec!(2.35), dec!(0.9), dec!(134_000_000_000)),
    crypto("ADA", "Cardano", dec!(0.95), dec!(-1.2), dec!(33_000_000_000)),
    crypto("SOL", "Solana", dec!(195), dec!(4.2), dec!(94_000_000_000)),
    crypto("DOT", "Polkadot", dec!(7.20), dec!(0.8), dec!(11_000_000_000)),
    crypto("LTC", "Litecoin", dec!(105), dec!(1.5), dec!(7_900_000_000)),
    commodity("XAU", "Gold", dec!(2345.10), dec!(0.45), "oz"),
    commodity("XAG", "Silver", dec!(29.85), dec!(-0.62), "oz"),
    commodity("WTI", "Crude Oil", dec!(78.40), dec!(1.10), "bbl"),
    forex("EURUSD", "Euro / US Dollar", dec!(1.0850), dec!(0.12)),
    forex("GBPUSD", "British Pound / US Dollar", dec!(1.2710), dec!(-0.08)),
    forex("USDJPY", "US Dollar / Japanese Yen", dec!(151.42), dec!(0.31)),
];

/// Look up an instrument by ticker or trading pair.
///
/// Accepts coin tickers ("BTC"), USD pairs ("BTCUSD", "XAUUSD") and a few
/// plain names ("gold"); matching is case-insensitive.
pub fn lookup(symbol: &str) -> Option<&'static Instrument> {
    let upper = symbol.trim().to_uppercase();
    let key = match upper.as_str() {
        "GOLD" => "XAU",
        "SILVER" => "XAG",
        "OIL" => "WTI",
        other => other,
    };

    CATALOGUE.iter().find(|i| i.symbol == key).or_else(|| {
        let base = key.strip_suffix("USD")?;
        CATALOGUE
            .iter()
            .find(|i| i.symbol == base && i.class != AssetClass::Forex)
    })
}

/// Instruments of one asset class, in catalogue order
pub fn of_class(class: AssetClass) -> impl Iterator<Item = &'static Instrument> {
    CATALOGUE.iter().filter(move |i| i.class == class)
}
