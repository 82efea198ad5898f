use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Error;

/// Ticker identifier, e.g. "BTCUSDT".
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self(symbol.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Symbol {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Borrow<str> for Symbol {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Bar frequency of a market-data stream or an indicator set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    Minute,
    #[default]
    Day,
}

impl Resolution {
    /// Binance kline interval code.
    pub fn interval(&self) -> &'static str {
        match self {
            Resolution::Minute => "1m",
            Resolution::Day => "1d",
        }
    }

    pub fn from_interval(code: &str) -> Option<Self> {
        match code {
            "1m" => Some(Resolution::Minute),
            "1d" => Some(Resolution::Day),
            _ => None,
        }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Resolution::Minute => write!(f, "minute"),
            Resolution::Day => write!(f, "day"),
        }
    }
}

/// Asset class, used to size historical-data requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AssetClass {
    Equity,
    #[default]
    Crypto,
}

impl AssetClass {
    pub fn trading_days_per_year(&self) -> f64 {
        match self {
            AssetClass::Equity => 252.0,
            AssetClass::Crypto => 365.25,
        }
    }

    pub fn trading_minutes_per_day(&self) -> f64 {
        match self {
            AssetClass::Equity => 6.5 * 60.0,
            AssetClass::Crypto => 24.0 * 60.0,
        }
    }
}

/// One OHLCV observation for a symbol.
///
/// `timestamp` is the start of the bar's interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: Symbol,
    pub resolution: Resolution,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub timestamp: DateTime<Utc>,
}

/// Side of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// An order to be submitted to the exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub symbol: Symbol,
    pub side: OrderSide,
    pub quantity: f64,
    /// `None` = market order; `Some(price)` = limit order.
    pub price: Option<f64>,
}

impl Order {
    pub fn market(symbol: impl Into<Symbol>, side: OrderSide, quantity: f64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            symbol: symbol.into(),
            side,
            quantity,
            price: None,
        }
    }
}

/// Confirmation of a filled order returned by the exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: String,
    pub symbol: Symbol,
    pub side: OrderSide,
    pub fill_price: f64,
    pub quantity: f64,
    pub timestamp: DateTime<Utc>,
}

/// Outcome of an order reported back by the executor.
#[derive(Debug, Clone)]
pub enum TradeUpdate {
    Filled(Fill),
    Failed { order: Order, error: String },
}

impl TradeUpdate {
    pub fn symbol(&self) -> &Symbol {
        match self {
            TradeUpdate::Filled(fill) => &fill.symbol,
            TradeUpdate::Failed { order, .. } => &order.symbol,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalDirection {
    Up,
    Down,
    Flat,
}

/// Directional view on a symbol emitted by signal generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: Symbol,
    pub direction: SignalDirection,
}

impl Signal {
    pub fn new(symbol: impl Into<Symbol>, direction: SignalDirection) -> Self {
        Self {
            symbol: symbol.into(),
            direction,
        }
    }
}

/// Portfolio instruction produced by the portfolio builder.
///
/// Weights are fractions of account equity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Allocation {
    /// Hold `weight` of equity in `symbol`. A zero weight closes the position.
    Target { symbol: Symbol, weight: f64 },
    /// Change exposure to `symbol` by `weight` of equity (negative reduces).
    Adjustment { symbol: Symbol, weight: f64 },
}

impl Allocation {
    pub fn target(symbol: impl Into<Symbol>, weight: f64) -> Self {
        Allocation::Target {
            symbol: symbol.into(),
            weight,
        }
    }

    pub fn adjustment(symbol: impl Into<Symbol>, weight: f64) -> Self {
        Allocation::Adjustment {
            symbol: symbol.into(),
            weight,
        }
    }

    pub fn symbol(&self) -> &Symbol {
        match self {
            Allocation::Target { symbol, .. } | Allocation::Adjustment { symbol, .. } => symbol,
        }
    }

    pub fn weight(&self) -> f64 {
        match self {
            Allocation::Target { weight, .. } | Allocation::Adjustment { weight, .. } => *weight,
        }
    }
}

/// An open trading position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub symbol: Symbol,
    pub side: OrderSide,
    pub entry_price: f64,
    pub quantity: f64,
    pub mode: TradingMode,
    pub opened_at: DateTime<Utc>,
}

impl Position {
    /// Unrealized profit as a fraction of entry value (e.g. -0.05 = 5% loss).
    pub fn unrealized_pct(&self, price: f64) -> Option<f64> {
        if self.entry_price <= 0.0 {
            return None;
        }
        let change = (price - self.entry_price) / self.entry_price;
        Some(match self.side {
            OrderSide::Buy => change,
            OrderSide::Sell => -change,
        })
    }
}

/// Durable record of positions and indicator values, written after trade events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub taken_at: DateTime<Utc>,
    pub positions: Vec<Position>,
    pub indicators: BTreeMap<Symbol, BTreeMap<String, Option<f64>>>,
}

/// Whether the bot is running against the real exchange or simulating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    Live,
    Paper,
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradingMode::Live => write!(f, "live"),
            TradingMode::Paper => write!(f, "paper"),
        }
    }
}

impl FromStr for TradingMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "paper" => Ok(TradingMode::Paper),
            "live" => Ok(TradingMode::Live),
            other => Err(Error::Config(format!(
                "trading mode must be 'paper' or 'live', got: '{other}'"
            ))),
        }
    }
}
