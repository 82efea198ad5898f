use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use common::{Allocation, Result, Symbol};
use strategy::{Context, RiskManagement};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopLossConfig {
    /// Loss on a position, as a fraction of entry value, that triggers a
    /// liquidation (e.g. 0.10 = 10%).
    #[serde(default = "default_percent_loss")]
    pub percent_loss: f64,
}

fn default_percent_loss() -> f64 {
    0.10
}

impl Default for StopLossConfig {
    fn default() -> Self {
        Self {
            percent_loss: default_percent_loss(),
        }
    }
}

/// Liquidates positions whose unrealized loss reached `percent_loss`.
///
/// Any allocation for a breached symbol is replaced by a zero target.
#[derive(Debug, Clone)]
pub struct FixedStopLoss {
    config: StopLossConfig,
}

impl FixedStopLoss {
    pub fn new(config: StopLossConfig) -> Self {
        Self { config }
    }

    fn breached(&self, ctx: &Context) -> BTreeSet<Symbol> {
        ctx.positions()
            .iter()
            .filter_map(|position| {
                let price = ctx.latest_price(position.symbol.as_str())?;
                let pnl_pct = position.unrealized_pct(price)?;
                debug!(symbol = %position.symbol, pnl_pct, "Stop-loss check");
                (pnl_pct <= -self.config.percent_loss).then(|| {
                    info!(symbol = %position.symbol, pnl_pct, "Stop-loss triggered");
                    position.symbol.clone()
                })
            })
            .collect()
    }
}

impl RiskManagement for FixedStopLoss {
    fn name(&self) -> &'static str {
        "fixed_stop_loss"
    }

    fn filter(&self, ctx: &Context, mut allocations: Vec<Allocation>) -> Result<Vec<Allocation>> {
        let breached = self.breached(ctx);
        if breached.is_empty() {
            return Ok(allocations);
        }

        allocations.retain(|a| !breached.contains(a.symbol()));
        allocations.extend(breached.into_iter().map(|symbol| Allocation::target(symbol, 0.0)));
        Ok(allocations)
    }
}
