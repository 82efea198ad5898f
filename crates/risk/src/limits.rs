use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::warn;

use common::{Allocation, Result, Symbol};
use strategy::{Context, RiskManagement};

/// Hard ceiling on simultaneously held symbols. Config may lower it, never
/// raise it.
pub const MAX_OPEN_POSITIONS: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaxPositionsConfig {
    #[serde(default = "default_max")]
    pub max: usize,
}

fn default_max() -> usize {
    MAX_OPEN_POSITIONS
}

impl Default for MaxPositionsConfig {
    fn default() -> Self {
        Self { max: default_max() }
    }
}

/// Drops allocations that would open a new symbol once the position limit
/// is reached. Allocations for held symbols and closing targets always pass.
#[derive(Debug, Clone)]
pub struct MaxPositions {
    max: usize,
}

impl MaxPositions {
    pub fn new(config: MaxPositionsConfig) -> Self {
        Self {
            max: config.max.min(MAX_OPEN_POSITIONS),
        }
    }

    pub fn max(&self) -> usize {
        self.max
    }
}

fn is_closing(allocation: &Allocation) -> bool {
    matches!(allocation, Allocation::Target { weight, .. } if *weight == 0.0)
}

impl RiskManagement for MaxPositions {
    fn name(&self) -> &'static str {
        "max_positions"
    }

    fn filter(&self, ctx: &Context, allocations: Vec<Allocation>) -> Result<Vec<Allocation>> {
        let closing: BTreeSet<&Symbol> = allocations
            .iter()
            .filter(|a| is_closing(a))
            .map(Allocation::symbol)
            .collect();
        let held: BTreeSet<Symbol> = ctx
            .positions()
            .iter()
            .map(|p| p.symbol.clone())
            .collect();

        let mut open = held.iter().filter(|s| !closing.contains(s)).count();
        let mut admitted: BTreeSet<Symbol> = BTreeSet::new();

        let mut kept = Vec::with_capacity(allocations.len());
        for allocation in &allocations {
            let symbol = allocation.symbol();
            let new_entry = !held.contains(symbol) && allocation.weight() > 0.0;
            if new_entry && !admitted.contains(symbol) {
                if open >= self.max {
                    warn!(symbol = %symbol, open, max = self.max, "Allocation rejected: position ceiling reached");
                    continue;
                }
                open += 1;
                admitted.insert(symbol.clone());
            }
            kept.push(allocation.clone());
        }
        Ok(kept)
    }
}
