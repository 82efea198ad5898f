//! Downstream pipeline stages.
//!
//! Each stage is a pure function of the [`Context`] (plus the previous
//! stage's output) and returns a new slice of domain objects. The driver
//! applies that slice to the context before the next stage runs.

pub mod execution;
pub mod portfolio;
pub mod selection;
pub mod signal;

use std::collections::BTreeSet;

use common::{Allocation, Order, Result, Signal, Symbol};

use crate::context::Context;

pub use execution::InstantExecution;
pub use portfolio::EqualWeight;
pub use selection::ManualSelection;
pub use signal::{ConstantSignal, NullSignal, ThresholdSignal};

/// Chooses the symbols the pipeline trades.
pub trait AssetSelection: Send + Sync {
    fn name(&self) -> &'static str;

    fn select(&self, ctx: &Context) -> Result<BTreeSet<Symbol>>;
}

/// Turns indicator state into directional views.
pub trait SignalGeneration: Send + Sync {
    fn name(&self) -> &'static str;

    fn generate(&self, ctx: &Context) -> Result<Vec<Signal>>;
}

/// Turns signals into target portfolio weights.
pub trait PortfolioBuilder: Send + Sync {
    fn name(&self) -> &'static str;

    fn build(&self, ctx: &Context, signals: &[Signal]) -> Result<Vec<Allocation>>;
}

/// Filters or overrides allocations before they are executed.
pub trait RiskManagement: Send + Sync {
    fn name(&self) -> &'static str;

    fn filter(&self, ctx: &Context, allocations: Vec<Allocation>) -> Result<Vec<Allocation>>;
}

/// Turns allocations into concrete orders. Orders are sent by the driver.
pub trait OrderExecution: Send + Sync {
    fn name(&self) -> &'static str;

    fn plan(&self, ctx: &Context, allocations: &[Allocation]) -> Result<Vec<Order>>;
}

/// The fixed stage sequence run on every cycle bar.
pub struct Pipeline {
    pub selection: Box<dyn AssetSelection>,
    pub signal: Box<dyn SignalGeneration>,
    pub portfolio: Box<dyn PortfolioBuilder>,
    pub risk: Box<dyn RiskManagement>,
    pub execution: Box<dyn OrderExecution>,
}

impl Pipeline {
    /// Stage names in execution order, for logging.
    pub fn describe(&self) -> String {
        [
            self.selection.name(),
            self.signal.name(),
            self.portfolio.name(),
            self.risk.name(),
            self.execution.name(),
        ]
        .join(" → ")
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Pipeline").field(&self.describe()).finish()
    }
}
