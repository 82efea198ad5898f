use common::{Allocation, Result, Signal, SignalDirection};

use super::PortfolioBuilder;
use crate::context::Context;

/// Splits equity evenly across `Up` signals and targets zero for `Down`
/// signals. `Flat` leaves a symbol untouched.
#[derive(Debug, Clone, Default)]
pub struct EqualWeight;

impl PortfolioBuilder for EqualWeight {
    fn name(&self) -> &'static str {
        "equal_weight"
    }

    fn build(&self, _ctx: &Context, signals: &[Signal]) -> Result<Vec<Allocation>> {
        let longs = signals
            .iter()
            .filter(|s| s.direction == SignalDirection::Up)
            .count();

        let allocations = signals
            .iter()
            .filter_map(|s| match s.direction {
                SignalDirection::Up => Some(Allocation::target(s.symbol.clone(), 1.0 / longs as f64)),
                SignalDirection::Down => Some(Allocation::target(s.symbol.clone(), 0.0)),
                SignalDirection::Flat => None,
            })
            .collect();
        Ok(allocations)
    }
}
