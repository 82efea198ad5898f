use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use common::{Error, ExchangeClient, Fill, Order, OrderSide, Position, Result, Symbol, TradingMode};

/// Simulated exchange client for paper trading.
///
/// Fills are simulated at the latest known price with configurable slippage.
/// Keeps a cash balance and one long position per symbol; sells may be
/// partial but never exceed the held quantity. No real orders are ever sent.
pub struct PaperClient {
    /// Simulated cash balance in quote currency.
    balance_usd: Arc<RwLock<f64>>,
    /// Open simulated positions, at most one per symbol.
    positions: Arc<RwLock<Vec<Position>>>,
    /// Latest known price per symbol, updated via `update_price`.
    prices: Arc<RwLock<HashMap<Symbol, f64>>>,
    /// Slippage in basis points applied to all fills.
    slippage_bps: f64,
}

impl PaperClient {
    pub fn new(initial_balance_usd: f64, slippage_bps: f64) -> Self {
        info!(
            balance = initial_balance_usd,
            slippage_bps = slippage_bps,
            "PaperClient initialized"
        );
        Self {
            balance_usd: Arc::new(RwLock::new(initial_balance_usd)),
            positions: Arc::new(RwLock::new(Vec::new())),
            prices: Arc::new(RwLock::new(HashMap::new())),
            slippage_bps,
        }
    }

    /// Update the latest price for a symbol (called by the market bar loop).
    pub async fn update_price(&self, symbol: &Symbol, price: f64) {
        self.prices.write().await.insert(symbol.clone(), price);
    }

    pub async fn balance(&self) -> f64 {
        *self.balance_usd.read().await
    }

    fn fill_price(&self, mid_price: f64, side: OrderSide) -> f64 {
        // Buys pay more, sells receive less
        match side {
            OrderSide::Buy => mid_price * (1.0 + self.slippage_bps / 10_000.0),
            OrderSide::Sell => mid_price * (1.0 - self.slippage_bps / 10_000.0),
        }
    }
}

#[async_trait]
impl ExchangeClient for PaperClient {
    async fn submit_order(&self, order: &Order) -> Result<Fill> {
        let mid_price = self.current_price(&order.symbol).await.map_err(|_| {
            Error::Exchange(format!(
                "PaperClient has no price for '{}'. Ensure market bars are flowing.",
                order.symbol
            ))
        })?;
        let fill_price = self.fill_price(mid_price, order.side);
        let notional = fill_price * order.quantity;

        let mut balance = self.balance_usd.write().await;
        let mut positions = self.positions.write().await;
        let held = positions.iter().position(|p| p.symbol == order.symbol);

        match order.side {
            OrderSide::Buy => {
                if notional > *balance {
                    return Err(Error::Exchange(format!(
                        "insufficient paper balance: need {notional:.2}, have {:.2}",
                        *balance
                    )));
                }
                *balance -= notional;
                match held {
                    Some(idx) => {
                        let position = &mut positions[idx];
                        let total = position.quantity + order.quantity;
                        position.entry_price = (position.entry_price * position.quantity
                            + fill_price * order.quantity)
                            / total;
                        position.quantity = total;
                    }
                    None => positions.push(Position {
                        id: order.id.clone(),
                        symbol: order.symbol.clone(),
                        side: OrderSide::Buy,
                        entry_price: fill_price,
                        quantity: order.quantity,
                        mode: TradingMode::Paper,
                        opened_at: Utc::now(),
                    }),
                }
            }
            OrderSide::Sell => {
                let Some(idx) = held.filter(|&i| positions[i].quantity + 1e-12 >= order.quantity)
                else {
                    return Err(Error::Exchange(format!(
                        "insufficient paper position in '{}' to sell {}",
                        order.symbol, order.quantity
                    )));
                };
                *balance += notional;
                positions[idx].quantity -= order.quantity;
                if positions[idx].quantity <= 1e-12 {
                    positions.remove(idx);
                }
            }
        }

        debug!(
            symbol = %order.symbol,
            side = ?order.side,
            mid = mid_price,
            fill = fill_price,
            qty = order.quantity,
            balance = *balance,
            "Paper fill simulated"
        );

        Ok(Fill {
            order_id: order.id.clone(),
            symbol: order.symbol.clone(),
            side: order.side,
            fill_price,
            quantity: order.quantity,
            timestamp: Utc::now(),
        })
    }

    async fn open_positions(&self) -> Result<Vec<Position>> {
        Ok(self.positions.read().await.clone())
    }

    async fn current_price(&self, symbol: &Symbol) -> Result<f64> {
        self.prices
            .read()
            .await
            .get(symbol)
            .copied()
            .ok_or_else(|| Error::Exchange(format!("No price available for {symbol}")))
    }

    async fn equity(&self) -> Result<f64> {
        let prices = self.prices.read().await;
        let marked: f64 = self
            .positions
            .read()
            .await
            .iter()
            .map(|p| p.quantity * prices.get(&p.symbol).copied().unwrap_or(p.entry_price))
            .sum();
        Ok(*self.balance_usd.read().await + marked)
    }
}
