use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{Bar, Fill, Order, Position, Resolution, Result, Snapshot, Symbol};

/// Abstraction over the exchange connection.
///
/// `BinanceClient` implements this for live trading.
/// `PaperClient` implements this for simulation.
///
/// Only `OrderExecutor` in `crates/engine` submits orders through it; the
/// pipeline driver uses the read-only queries to refresh its account snapshot.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Submit an order and return the fill confirmation.
    async fn submit_order(&self, order: &Order) -> Result<Fill>;

    /// Query currently open positions from the exchange.
    async fn open_positions(&self) -> Result<Vec<Position>>;

    /// Get the latest price for a symbol.
    async fn current_price(&self, symbol: &Symbol) -> Result<f64>;

    /// Total account value in quote currency (cash plus marked positions).
    async fn equity(&self) -> Result<f64>;
}

/// Source of historical bars used to warm up indicators.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Fetch time-ordered bars in `[start, end]` for every requested symbol.
    /// Symbols without data may be absent from the returned map.
    async fn fetch_bars(
        &self,
        symbols: &[Symbol],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        resolution: Resolution,
    ) -> Result<HashMap<Symbol, Vec<Bar>>>;
}

/// Durable sink for status snapshots. Nothing reads snapshots back.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn save(&self, snapshot: &Snapshot) -> Result<()>;
}
