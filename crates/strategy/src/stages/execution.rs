use common::{Allocation, Order, OrderSide, Result};
use tracing::{debug, warn};

use super::OrderExecution;
use crate::context::Context;

/// Market orders sized from account equity and the latest close.
///
/// Symbols with an order still in flight are skipped. A zero target closes
/// the whole position; other quantities are truncated to `precision`
/// decimal places.
#[derive(Debug, Clone)]
pub struct InstantExecution {
    precision: u32,
}

impl InstantExecution {
    pub const DEFAULT_PRECISION: u32 = 6;
    /// Decimals beyond this exceed what an `f64` quantity can carry.
    pub const MAX_PRECISION: u32 = 15;

    /// `precision` is clamped to [`Self::MAX_PRECISION`].
    pub fn new(precision: u32) -> Self {
        Self {
            precision: precision.min(Self::MAX_PRECISION),
        }
    }

    pub fn precision(&self) -> u32 {
        self.precision
    }

    fn truncate(&self, quantity: f64) -> f64 {
        let scale = 10f64.powi(self.precision as i32);
        (quantity * scale).trunc() / scale
    }

    fn order_for_delta(&self, symbol: &common::Symbol, delta: f64) -> Option<Order> {
        let quantity = self.truncate(delta.abs());
        if quantity <= 0.0 {
            return None;
        }
        let side = if delta > 0.0 { OrderSide::Buy } else { OrderSide::Sell };
        Some(Order::market(symbol.clone(), side, quantity))
    }
}

impl Default for InstantExecution {
    fn default() -> Self {
        Self::new(Self::DEFAULT_PRECISION)
    }
}

impl OrderExecution for InstantExecution {
    fn name(&self) -> &'static str {
        "instant"
    }

    fn plan(&self, ctx: &Context, allocations: &[Allocation]) -> Result<Vec<Order>> {
        let mut orders = Vec::new();

        for allocation in allocations {
            let symbol = allocation.symbol();
            if ctx.is_pending(symbol.as_str()) {
                debug!(symbol = %symbol, "Order pending, skipping allocation");
                continue;
            }

            let held = ctx.position_quantity(symbol.as_str());
            let order = match allocation {
                Allocation::Target { weight, .. } if *weight == 0.0 => {
                    if held == 0.0 {
                        None
                    } else {
                        let side = if held > 0.0 { OrderSide::Sell } else { OrderSide::Buy };
                        Some(Order::market(symbol.clone(), side, held.abs()))
                    }
                }
                Allocation::Adjustment { weight, .. } if *weight == 0.0 => None,
                Allocation::Target { weight, .. } | Allocation::Adjustment { weight, .. } => {
                    let Some(price) = ctx.latest_price(symbol.as_str()).filter(|p| *p > 0.0) else {
                        warn!(symbol = %symbol, "No price for allocation, skipping");
                        continue;
                    };
                    let notional = ctx.equity() * weight / price;
                    let delta = match allocation {
                        Allocation::Target { .. } => notional - held,
                        Allocation::Adjustment { .. } => notional,
                    };
                    self.order_for_delta(symbol, delta)
                }
            };

            if let Some(order) = order {
                debug!(symbol = %order.symbol, side = %order.side, quantity = order.quantity, "Planned order");
                orders.push(order);
            }
        }

        Ok(orders)
    }
}
