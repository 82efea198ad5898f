use common::{Result, Signal, SignalDirection};
use tracing::trace;

use super::SignalGeneration;
use crate::context::Context;
use crate::indicators::IndicatorKey;

/// Emits the same direction for every universe member.
#[derive(Debug, Clone)]
pub struct ConstantSignal {
    pub direction: SignalDirection,
}

impl Default for ConstantSignal {
    fn default() -> Self {
        Self {
            direction: SignalDirection::Up,
        }
    }
}

impl SignalGeneration for ConstantSignal {
    fn name(&self) -> &'static str {
        "constant"
    }

    fn generate(&self, ctx: &Context) -> Result<Vec<Signal>> {
        Ok(ctx
            .universe()
            .iter()
            .map(|symbol| Signal::new(symbol.clone(), self.direction))
            .collect())
    }
}

/// Emits nothing.
#[derive(Debug, Clone, Default)]
pub struct NullSignal;

impl SignalGeneration for NullSignal {
    fn name(&self) -> &'static str {
        "null"
    }

    fn generate(&self, _ctx: &Context) -> Result<Vec<Signal>> {
        Ok(Vec::new())
    }
}

/// Band rule on one indicator: at or below `lower` is `Up` (oversold), at or
/// above `upper` is `Down` (overbought), anything between is `Flat`.
/// Symbols whose indicator has no value yet are skipped.
#[derive(Debug, Clone)]
pub struct ThresholdSignal {
    key: IndicatorKey,
    lower: f64,
    upper: f64,
}

impl ThresholdSignal {
    pub fn new(key: IndicatorKey, lower: f64, upper: f64) -> Self {
        Self { key, lower, upper }
    }

    fn direction(&self, value: f64) -> SignalDirection {
        if value <= self.lower {
            SignalDirection::Up
        } else if value >= self.upper {
            SignalDirection::Down
        } else {
            SignalDirection::Flat
        }
    }
}

impl SignalGeneration for ThresholdSignal {
    fn name(&self) -> &'static str {
        "threshold"
    }

    fn generate(&self, ctx: &Context) -> Result<Vec<Signal>> {
        let signals = ctx
            .universe()
            .iter()
            .filter_map(|symbol| {
                let value = ctx.registry().value(symbol.as_str(), self.key)?;
                let direction = self.direction(value);
                trace!(symbol = %symbol, value, ?direction, "Threshold signal");
                Some(Signal::new(symbol.clone(), direction))
            })
            .collect();
        Ok(signals)
    }
}
