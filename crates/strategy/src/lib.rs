pub mod config;
pub mod context;
pub mod indicators;
pub mod registry;
pub mod stages;

pub use config::{ConfigError, IndicatorConfig, PipelineConfig, StageConfig};
pub use context::{AccountSnapshot, Context, ContextDelta};
pub use indicators::{
    Calculation, Indicator, IndicatorError, IndicatorGraph, IndicatorInput, IndicatorKey,
    IndicatorSpec, Point, Sampling,
};
pub use registry::{IndicatorRegistry, WarmupReport};
pub use stages::{
    AssetSelection, OrderExecution, Pipeline, PortfolioBuilder, RiskManagement, SignalGeneration,
};
