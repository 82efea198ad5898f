//! Risk-management stages.
//!
//! Every allocation produced by the portfolio builder passes through the
//! configured rules before order execution sees it. Rules run in the order
//! they appear in the pipeline config.

pub mod limits;
pub mod stop_loss;

use serde::de::DeserializeOwned;
use tracing::info;

use common::{Allocation, Result};
use strategy::{ConfigError, Context, RiskManagement, StageConfig};

pub use limits::{MaxPositions, MaxPositionsConfig, MAX_OPEN_POSITIONS};
pub use stop_loss::{FixedStopLoss, StopLossConfig};

/// Passes allocations through untouched.
#[derive(Debug, Clone, Default)]
pub struct NullRisk;

impl RiskManagement for NullRisk {
    fn name(&self) -> &'static str {
        "null"
    }

    fn filter(&self, _ctx: &Context, allocations: Vec<Allocation>) -> Result<Vec<Allocation>> {
        Ok(allocations)
    }
}

/// Several rules applied one after another.
pub struct RiskChain {
    rules: Vec<Box<dyn RiskManagement>>,
}

impl RiskChain {
    pub fn new(rules: Vec<Box<dyn RiskManagement>>) -> Self {
        Self { rules }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl RiskManagement for RiskChain {
    fn name(&self) -> &'static str {
        "chain"
    }

    fn filter(&self, ctx: &Context, allocations: Vec<Allocation>) -> Result<Vec<Allocation>> {
        self.rules
            .iter()
            .try_fold(allocations, |allocations, rule| rule.filter(ctx, allocations))
    }
}

/// Build the risk stage from the `[[risk]]` entries of the pipeline config.
/// No entries means no filtering.
pub fn build_risk(configs: &[StageConfig]) -> Result<Box<dyn RiskManagement>, ConfigError> {
    let mut rules = configs
        .iter()
        .map(build_rule)
        .collect::<Result<Vec<_>, _>>()?;

    for rule in &rules {
        info!(rule = rule.name(), "Registered risk rule");
    }

    Ok(match rules.len() {
        0 => Box::new(NullRisk),
        1 => rules.remove(0),
        _ => Box::new(RiskChain::new(rules)),
    })
}

fn build_rule(cfg: &StageConfig) -> Result<Box<dyn RiskManagement>, ConfigError> {
    match cfg.kind.as_str() {
        "null" => Ok(Box::new(NullRisk)),
        "fixed_stop_loss" => Ok(Box::new(FixedStopLoss::new(params(cfg)?))),
        "max_positions" => Ok(Box::new(MaxPositions::new(params(cfg)?))),
        other => Err(ConfigError::UnknownType {
            stage: "risk",
            kind: other.to_string(),
        }),
    }
}

/// Deserialize a rule's `params` table into its config struct.
fn params<T: DeserializeOwned>(cfg: &StageConfig) -> Result<T, ConfigError> {
    let table: toml::Table = cfg.params.clone().into_iter().collect();
    toml::Value::Table(table)
        .try_into()
        .map_err(|e: toml::de::Error| ConfigError::InvalidParam {
            stage: cfg.kind.clone(),
            param: "params",
            reason: e.to_string(),
        })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Utc;
    use common::{OrderSide, Position, Resolution, Symbol, TradingMode};
    use std::collections::HashMap;
    use strategy::{AccountSnapshot, IndicatorGraph, IndicatorRegistry};

    pub(crate) fn position(symbol: &str, entry_price: f64) -> Position {
        Position {
            id: format!("{symbol}-pos"),
            symbol: symbol.into(),
            side: OrderSide::Buy,
            entry_price,
            quantity: 1.0,
            mode: TradingMode::Paper,
            opened_at: Utc::now(),
        }
    }

    pub(crate) fn context(positions: Vec<Position>, prices: &[(&str, f64)]) -> Context {
        let registry = IndicatorRegistry::new(IndicatorGraph::default(), Resolution::Day);
        let mut ctx = Context::new(registry);
        ctx.set_account(AccountSnapshot {
            equity: 10_000.0,
            positions,
        });
        for (symbol, price) in prices {
            ctx.record_price(&Symbol::from(*symbol), *price);
        }
        ctx
    }

    fn stage(kind: &str, params: &[(&str, toml::Value)]) -> StageConfig {
        StageConfig {
            kind: kind.into(),
            params: params
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect::<HashMap<_, _>>(),
        }
    }

    #[test]
    fn null_passes_through() {
        let allocations = vec![Allocation::target("AAA", 0.5)];
        let out = NullRisk.filter(&context(vec![], &[]), allocations.clone()).unwrap();
        assert_eq!(out, allocations);
    }

    #[test]
    fn empty_config_builds_null_risk() {
        assert_eq!(build_risk(&[]).unwrap().name(), "null");
    }

    #[test]
    fn builds_chain_in_order() {
        let rules = build_risk(&[
            stage("fixed_stop_loss", &[("percent_loss", toml::Value::Float(0.05))]),
            stage("max_positions", &[("max", toml::Value::Integer(1))]),
        ])
        .unwrap();
        assert_eq!(rules.name(), "chain");

        // AAA is down 10% and gets liquidated; only one new entry survives.
        let ctx = context(vec![position("AAA", 100.0)], &[("AAA", 90.0)]);
        let out = rules
            .filter(
                &ctx,
                vec![
                    Allocation::target("AAA", 0.3),
                    Allocation::target("BBB", 0.3),
                    Allocation::target("CCC", 0.3),
                ],
            )
            .unwrap();
        assert_eq!(out, vec![Allocation::target("BBB", 0.3), Allocation::target("AAA", 0.0)]);
    }

    #[test]
    fn bad_params_are_config_errors() {
        let err = build_risk(&[stage(
            "fixed_stop_loss",
            &[("percent_loss", toml::Value::String("lots".into()))],
        )])
        .err()
        .unwrap();
        assert!(matches!(err, ConfigError::InvalidParam { .. }));

        let err = build_risk(&[stage("trailing", &[])]).err().unwrap();
        assert!(matches!(err, ConfigError::UnknownType { stage: "risk", .. }));
    }
}
