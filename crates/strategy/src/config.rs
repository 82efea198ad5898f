use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use common::{AssetClass, Resolution, SignalDirection};

use crate::indicators::{
    Calculation, IndicatorError, IndicatorGraph, IndicatorSpec, Macd, Rsi, Sampling, Sma, Stoch,
};
use crate::registry::IndicatorRegistry;
use crate::stages::{
    AssetSelection, ConstantSignal, EqualWeight, InstantExecution, ManualSelection, NullSignal,
    OrderExecution, Pipeline, PortfolioBuilder, RiskManagement, SignalGeneration, ThresholdSignal,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown {stage} type '{kind}'")]
    UnknownType { stage: &'static str, kind: String },

    #[error("{stage}: missing parameter '{param}'")]
    MissingParam { stage: String, param: &'static str },

    #[error("{stage}: invalid parameter '{param}': {reason}")]
    InvalidParam {
        stage: String,
        param: &'static str,
        reason: String,
    },

    #[error("signal references unknown indicator '{0}'")]
    UnknownIndicator(String),

    #[error(transparent)]
    Indicator(#[from] IndicatorError),

    #[error("failed to parse pipeline config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level pipeline config file (TOML).
///
/// Example `config/pipeline.toml`:
/// ```toml
/// resolution = "day"
/// cycle_resolution = "day"
/// asset_class = "crypto"
///
/// [[indicator]]
/// type = "rsi"
/// name = "rsi"
/// sampling = "1d"
///
/// [indicator.params]
/// period = 14
///
/// [selection]
/// type = "manual"
/// params = { symbols = ["BTCUSDT", "ETHUSDT"] }
///
/// [signal]
/// type = "threshold"
/// params = { indicator = "rsi", lower = 30.0, upper = 70.0 }
///
/// [portfolio]
/// type = "equal_weight"
///
/// [[risk]]
/// type = "fixed_stop_loss"
/// params = { percent_loss = 0.1 }
///
/// [execution]
/// type = "instant"
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Bar resolution that feeds the indicators.
    #[serde(default)]
    pub resolution: Resolution,
    /// Bar resolution that triggers a full pipeline cycle. Defaults to `resolution`.
    #[serde(default)]
    pub cycle_resolution: Option<Resolution>,
    #[serde(default)]
    pub asset_class: AssetClass,
    /// Overrides the history length requested during warmup.
    #[serde(default)]
    pub warmup_length: Option<usize>,
    #[serde(default, rename = "indicator")]
    pub indicators: Vec<IndicatorConfig>,
    pub selection: StageConfig,
    pub signal: StageConfig,
    pub portfolio: StageConfig,
    #[serde(default)]
    pub risk: Vec<StageConfig>,
    pub execution: StageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IndicatorConfig {
    /// Calculation identifier: "sma", "rsi", "macd" or "stoch".
    #[serde(rename = "type")]
    pub kind: String,
    /// Display name; defaults to the calculation label, e.g. `RSI_14`.
    pub name: Option<String>,
    pub cache_size: Option<usize>,
    pub sampling: Option<Sampling>,
    /// Name of an indicator declared earlier whose outputs feed this one.
    pub feeder: Option<String>,
    #[serde(default)]
    pub params: HashMap<String, toml::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StageConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub params: HashMap<String, toml::Value>,
}

impl PipelineConfig {
    /// Load from a TOML file. Exits process on error.
    pub fn load(path: &str) -> Self {
        let content = std::fs::read_to_string(path).unwrap_or_else(|e| {
            panic!("Failed to read pipeline config at '{path}': {e}")
        });
        Self::from_toml_str(&content).unwrap_or_else(|e| {
            panic!("Failed to parse pipeline config at '{path}': {e}")
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn cycle_resolution(&self) -> Resolution {
        self.cycle_resolution.unwrap_or(self.resolution)
    }

    pub fn build_graph(&self) -> Result<IndicatorGraph, ConfigError> {
        let mut builder = IndicatorGraph::builder();
        for cfg in &self.indicators {
            let mut spec = IndicatorSpec::from_arc(build_calculation(cfg)?);
            if let Some(name) = &cfg.name {
                spec = spec.named(name.clone());
            }
            if let Some(cache_size) = cfg.cache_size {
                spec = spec.cache_size(cache_size);
            }
            if let Some(sampling) = cfg.sampling {
                spec = spec.sampling(sampling);
            }
            if let Some(feeder) = &cfg.feeder {
                let key = builder
                    .key(feeder)
                    .ok_or_else(|| IndicatorError::UnknownFeeder(feeder.clone()))?;
                spec = spec.fed_by(key);
            }
            builder.add(spec)?;
        }
        Ok(builder.build())
    }

    pub fn build_registry(&self) -> Result<IndicatorRegistry, ConfigError> {
        let registry = IndicatorRegistry::new(self.build_graph()?, self.resolution);
        Ok(match self.warmup_length {
            Some(length) => registry.with_warmup_length(length),
            None => registry,
        })
    }

    /// Build the registry and every stage except risk management, which
    /// lives in its own crate and is passed in.
    pub fn build(
        &self,
        risk: Box<dyn RiskManagement>,
    ) -> Result<(IndicatorRegistry, Pipeline), ConfigError> {
        let registry = self.build_registry()?;
        let pipeline = Pipeline {
            selection: build_selection(&self.selection)?,
            signal: build_signal(&self.signal, registry.prototype())?,
            portfolio: build_portfolio(&self.portfolio)?,
            risk,
            execution: build_execution(&self.execution)?,
        };
        Ok((registry, pipeline))
    }
}

// ─── Builders ─────────────────────────────────────────────────────────────────

pub fn build_calculation(cfg: &IndicatorConfig) -> Result<Arc<dyn Calculation>, ConfigError> {
    let p = &cfg.params;
    let stage = cfg.name.as_deref().unwrap_or(&cfg.kind);
    let calc: Arc<dyn Calculation> = match cfg.kind.as_str() {
        "sma" => Arc::new(Sma::new(param_int(p, stage, "period", 20)?)?),
        "rsi" => Arc::new(Rsi::new(param_int(p, stage, "period", 14)?)?),
        "macd" => Arc::new(Macd::new(
            param_int(p, stage, "fast", 12)?,
            param_int(p, stage, "slow", 26)?,
            param_int(p, stage, "signal", 9)?,
        )?),
        "stoch" => Arc::new(Stoch::new(
            param_int(p, stage, "period", 14)?,
            param_int(p, stage, "smoothing", 3)?,
        )?),
        other => {
            return Err(ConfigError::UnknownType {
                stage: "indicator",
                kind: other.to_string(),
            })
        }
    };
    Ok(calc)
}

pub fn build_selection(cfg: &StageConfig) -> Result<Box<dyn AssetSelection>, ConfigError> {
    match cfg.kind.as_str() {
        "manual" => {
            let symbols = param_str_list(&cfg.params, "symbols").ok_or(ConfigError::MissingParam {
                stage: cfg.kind.clone(),
                param: "symbols",
            })?;
            Ok(Box::new(ManualSelection::new(symbols)))
        }
        other => Err(ConfigError::UnknownType {
            stage: "selection",
            kind: other.to_string(),
        }),
    }
}

pub fn build_signal(
    cfg: &StageConfig,
    graph: &IndicatorGraph,
) -> Result<Box<dyn SignalGeneration>, ConfigError> {
    match cfg.kind.as_str() {
        "null" => Ok(Box::new(NullSignal)),
        "constant" => {
            let direction = match param_str(&cfg.params, "direction").unwrap_or("up") {
                "up" => SignalDirection::Up,
                "down" => SignalDirection::Down,
                "flat" => SignalDirection::Flat,
                other => {
                    return Err(ConfigError::InvalidParam {
                        stage: cfg.kind.clone(),
                        param: "direction",
                        reason: format!("expected up, down or flat, got '{other}'"),
                    })
                }
            };
            Ok(Box::new(ConstantSignal { direction }))
        }
        "threshold" => {
            let name = param_str(&cfg.params, "indicator").ok_or(ConfigError::MissingParam {
                stage: cfg.kind.clone(),
                param: "indicator",
            })?;
            let key = graph
                .key(name)
                .ok_or_else(|| ConfigError::UnknownIndicator(name.to_string()))?;
            let lower = param_f64(&cfg.params, "lower", 30.0);
            let upper = param_f64(&cfg.params, "upper", 70.0);
            if lower >= upper {
                return Err(ConfigError::InvalidParam {
                    stage: cfg.kind.clone(),
                    param: "lower",
                    reason: format!("lower ({lower}) must be below upper ({upper})"),
                });
            }
            Ok(Box::new(ThresholdSignal::new(key, lower, upper)))
        }
        other => Err(ConfigError::UnknownType {
            stage: "signal",
            kind: other.to_string(),
        }),
    }
}

pub fn build_portfolio(cfg: &StageConfig) -> Result<Box<dyn PortfolioBuilder>, ConfigError> {
    match cfg.kind.as_str() {
        "equal_weight" => Ok(Box::new(EqualWeight)),
        other => Err(ConfigError::UnknownType {
            stage: "portfolio",
            kind: other.to_string(),
        }),
    }
}

pub fn build_execution(cfg: &StageConfig) -> Result<Box<dyn OrderExecution>, ConfigError> {
    match cfg.kind.as_str() {
        "instant" => {
            let precision = param_int(
                &cfg.params,
                &cfg.kind,
                "precision",
                InstantExecution::DEFAULT_PRECISION,
            )?;
            Ok(Box::new(InstantExecution::new(precision)))
        }
        other => Err(ConfigError::UnknownType {
            stage: "execution",
            kind: other.to_string(),
        }),
    }
}

// ─── Param helpers ────────────────────────────────────────────────────────────

/// Float parameter; integer literals are accepted too.
pub fn param_f64(params: &HashMap<String, toml::Value>, key: &str, default: f64) -> f64 {
    params
        .get(key)
        .and_then(|v| v.as_float().or_else(|| v.as_integer().map(|i| i as f64)))
        .unwrap_or(default)
}

/// Integer parameter. Values that do not fit `T` (negative counts, for
/// one) are rejected rather than wrapped.
pub fn param_int<T: TryFrom<i64>>(
    params: &HashMap<String, toml::Value>,
    stage: &str,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    let Some(raw) = params.get(key).and_then(|v| v.as_integer()) else {
        return Ok(default);
    };
    T::try_from(raw).map_err(|_| ConfigError::InvalidParam {
        stage: stage.to_string(),
        param: key,
        reason: format!("{raw} is out of range"),
    })
}

pub fn param_str<'a>(params: &'a HashMap<String, toml::Value>, key: &str) -> Option<&'a str> {
    params.get(key).and_then(|v| v.as_str())
}

pub fn param_str_list(params: &HashMap<String, toml::Value>, key: &str) -> Option<Vec<String>> {
    let array = params.get(key)?.as_array()?;
    Some(
        array
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        resolution = "day"
        cycle_resolution = "day"
        asset_class = "equity"

        [[indicator]]
        type = "sma"
        name = "sma"
        sampling = "1d"
        params = { period = 5 }

        [[indicator]]
        type = "rsi"
        name = "rsi_of_sma"
        feeder = "sma"
        cache_size = 40
        params = { period = 14 }

        [selection]
        type = "manual"
        params = { symbols = ["AAPL", "MSFT"] }

        [signal]
        type = "threshold"
        params = { indicator = "rsi_of_sma", lower = 25, upper = 75.0 }

        [portfolio]
        type = "equal_weight"

        [[risk]]
        type = "fixed_stop_loss"
        params = { percent_loss = 0.05 }

        [execution]
        type = "instant"
        params = { precision = 3 }
    "#;

    #[test]
    fn parses_sample_config() {
        let cfg = PipelineConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(cfg.resolution, Resolution::Day);
        assert_eq!(cfg.asset_class, AssetClass::Equity);
        assert_eq!(cfg.indicators.len(), 2);
        assert_eq!(cfg.indicators[0].sampling, Some(Sampling::Day));
        assert_eq!(cfg.risk.len(), 1);
        assert_eq!(param_f64(&cfg.signal.params, "lower", 0.0), 25.0);
    }

    #[test]
    fn builds_calibrated_graph() {
        let cfg = PipelineConfig::from_toml_str(SAMPLE).unwrap();
        let graph = cfg.build_graph().unwrap();
        let sma = graph.key("sma").unwrap();
        let rsi = graph.key("rsi_of_sma").unwrap();

        assert_eq!(graph.feeder(rsi), Some(sma));
        assert_eq!(graph.get(sma).unwrap().cache_size(), 40);
        assert_eq!(graph.get(rsi).unwrap().sampling(), Some(Sampling::Day));
        assert_eq!(cfg.build_registry().unwrap().required_warmup_length(), 40);
    }

    #[test]
    fn builds_pipeline_stages() {
        let cfg = PipelineConfig::from_toml_str(SAMPLE).unwrap();
        let (_, pipeline) = cfg.build(Box::new(NoRisk)).unwrap();
        assert_eq!(
            pipeline.describe(),
            "manual → threshold → equal_weight → none → instant"
        );
    }

    #[test]
    fn unknown_feeder_is_an_error() {
        let cfg = PipelineConfig::from_toml_str(
            &SAMPLE.replace(r#"feeder = "sma""#, r#"feeder = "ema""#),
        )
        .unwrap();
        assert!(matches!(
            cfg.build_graph(),
            Err(ConfigError::Indicator(IndicatorError::UnknownFeeder(name))) if name == "ema"
        ));
    }

    #[test]
    fn cache_below_window_is_an_error() {
        let cfg = PipelineConfig::from_toml_str(&SAMPLE.replace("cache_size = 40", "cache_size = 3"))
            .unwrap();
        assert!(matches!(
            cfg.build_graph(),
            Err(ConfigError::Indicator(IndicatorError::CacheTooSmall { .. }))
        ));
    }

    #[test]
    fn negative_period_is_an_invalid_param() {
        let cfg = PipelineConfig::from_toml_str(
            &SAMPLE.replace("params = { period = 5 }", "params = { period = -1 }"),
        )
        .unwrap();
        assert!(matches!(
            cfg.build_graph(),
            Err(ConfigError::InvalidParam { param: "period", stage, .. }) if stage == "sma"
        ));
    }

    #[test]
    fn negative_precision_is_an_invalid_param() {
        let cfg = PipelineConfig::from_toml_str(
            &SAMPLE.replace("params = { precision = 3 }", "params = { precision = -2 }"),
        )
        .unwrap();
        assert!(matches!(
            build_execution(&cfg.execution),
            Err(ConfigError::InvalidParam { param: "precision", .. })
        ));
    }

    #[test]
    fn threshold_requires_known_indicator() {
        let cfg = PipelineConfig::from_toml_str(SAMPLE).unwrap();
        let graph = cfg.build_graph().unwrap();
        let mut signal = cfg.signal.clone();
        signal
            .params
            .insert("indicator".into(), toml::Value::String("nope".into()));
        assert!(matches!(
            build_signal(&signal, &graph),
            Err(ConfigError::UnknownIndicator(_))
        ));
    }

    #[test]
    fn unknown_stage_type_is_an_error() {
        let cfg = StageConfig {
            kind: "kelly".into(),
            params: HashMap::new(),
        };
        assert!(matches!(
            build_portfolio(&cfg),
            Err(ConfigError::UnknownType { stage: "portfolio", .. })
        ));
    }

    struct NoRisk;

    impl RiskManagement for NoRisk {
        fn name(&self) -> &'static str {
            "none"
        }

        fn filter(
            &self,
            _ctx: &crate::context::Context,
            allocations: Vec<common::Allocation>,
        ) -> common::Result<Vec<common::Allocation>> {
            Ok(allocations)
        }
    }
}
