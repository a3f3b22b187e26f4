//! Market Snapshot Refresher
//!
//! Periodically re-fetches crypto and commodity prices into a snapshot the
//! dashboard reads. The conversation is never touched.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{RwLock, watch};
use tokio::time::MissedTickBehavior;

use crate::context::CRYPTO_BASKET;
use crate::market::{CommodityQuote, CryptoQuote, MarketContextProvider};

/// Default refresh period
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// Latest refreshed prices
#[derive(Clone, Debug, Default, Serialize)]
pub struct MarketSnapshot {
    pub crypto: Vec<CryptoQuote>,
    pub commodities: Vec<CommodityQuote>,
    pub refreshed_at: Option<DateTime<Utc>>,
}

pub struct MarketSnapshotRefresher {
    market: Arc<dyn MarketContextProvider>,
    interval: Duration,
    enabled: AtomicBool,
    in_flight: AtomicBool,
    snapshot: RwLock<MarketSnapshot>,
}

impl MarketSnapshotRefresher {
    pub fn new(market: Arc<dyn MarketContextProvider>, enabled: bool) -> Self {
        Self {
            market,
            interval: REFRESH_INTERVAL,
            enabled: AtomicBool::new(enabled),
            in_flight: AtomicBool::new(false),
            snapshot: RwLock::new(MarketSnapshot::default()),
        }
    }

    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Follow the auto-refresh preference
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub async fn snapshot(&self) -> MarketSnapshot {
        self.snapshot.read().await.clone()
    }

    /// Refresh once. Returns `false` if another refresh was already running.
    ///
    /// A category that fails to load keeps its previous values.
    pub async fn refresh(&self) -> bool {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Refresh already in flight, skipping");
            return false;
        }

        let (crypto, commodities) = futures::join!(
            self.market.fetch_crypto_market_data(CRYPTO_BASKET),
            self.market.fetch_commodity_prices(),
        );

        {
            let mut snapshot = self.snapshot.write().await;
            match crypto {
                Ok(quotes) => snapshot.crypto = quotes,
                Err(e) => tracing::warn!(error = %e, "Crypto refresh failed"),
            }
            match commodities {
                Ok(quotes) => snapshot.commodities = quotes,
                Err(e) => tracing::warn!(error = %e, "Commodity refresh failed"),
            }
            snapshot.refreshed_at = Some(Utc::now());
        }

        self.in_flight.store(false, Ordering::Release);
        true
    }

    /// Tick until `shutdown` flips to `true` or its sender is dropped.
    /// Ticks are no-ops while auto-refresh is disabled.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(interval_secs = self.interval.as_secs(), "Market refresher started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if !self.is_enabled() {
                        continue;
                    }
                    let refresher = Arc::clone(&self);
                    tokio::spawn(async move {
                        refresher.refresh().await;
                    });
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Market refresher stopped");
    }
}
