use std::collections::{BTreeSet, HashMap};

use chrono::Utc;
use tracing::debug;

use common::{Allocation, Bar, Position, Signal, Snapshot, Symbol, Universe};

use crate::registry::{IndicatorRegistry, WarmupReport};

/// Broker-side state refreshed by the driver before the stages run.
#[derive(Debug, Clone, Default)]
pub struct AccountSnapshot {
    pub equity: f64,
    pub positions: Vec<Position>,
}

/// Output of one stage, applied to the [`Context`] by the driver. Applying a
/// delta replaces the slice it names.
#[derive(Debug, Clone, PartialEq)]
pub enum ContextDelta {
    Universe(BTreeSet<Symbol>),
    Signals(Vec<Signal>),
    Allocations(Vec<Allocation>),
}

/// Everything the pipeline stages may read.
///
/// The driver owns the context exclusively; stages only ever see `&Context`
/// and hand back a [`ContextDelta`].
#[derive(Debug)]
pub struct Context {
    universe: Universe,
    registry: IndicatorRegistry,
    signals: Vec<Signal>,
    allocations: Vec<Allocation>,
    latest_prices: HashMap<Symbol, f64>,
    account: AccountSnapshot,
    pending: BTreeSet<Symbol>,
    version: u64,
}

impl Context {
    pub fn new(registry: IndicatorRegistry) -> Self {
        Self {
            universe: Universe::new(),
            registry,
            signals: Vec::new(),
            allocations: Vec::new(),
            latest_prices: HashMap::new(),
            account: AccountSnapshot::default(),
            pending: BTreeSet::new(),
            version: 0,
        }
    }

    pub fn universe(&self) -> &Universe {
        &self.universe
    }

    pub fn registry(&self) -> &IndicatorRegistry {
        &self.registry
    }

    pub fn signals(&self) -> &[Signal] {
        &self.signals
    }

    pub fn allocations(&self) -> &[Allocation] {
        &self.allocations
    }

    pub fn latest_price(&self, symbol: &str) -> Option<f64> {
        self.latest_prices.get(symbol).copied()
    }

    pub fn account(&self) -> &AccountSnapshot {
        &self.account
    }

    pub fn equity(&self) -> f64 {
        self.account.equity
    }

    pub fn positions(&self) -> &[Position] {
        &self.account.positions
    }

    /// Net signed quantity held in `symbol` (negative when short).
    pub fn position_quantity(&self, symbol: &str) -> f64 {
        self.account
            .positions
            .iter()
            .filter(|p| p.symbol.as_str() == symbol)
            .map(|p| match p.side {
                common::OrderSide::Buy => p.quantity,
                common::OrderSide::Sell => -p.quantity,
            })
            .sum()
    }

    pub fn is_pending(&self, symbol: &str) -> bool {
        self.pending.contains(symbol)
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    // ── Driver-side mutation ────────────────────────────────────────────────

    /// Replace the slice named by `delta` and bump the version.
    pub fn apply(&mut self, delta: ContextDelta) {
        match delta {
            ContextDelta::Universe(targets) => self.universe.update(targets),
            ContextDelta::Signals(signals) => {
                self.signals.clear();
                self.signals.extend(signals);
            }
            ContextDelta::Allocations(allocations) => {
                self.allocations.clear();
                self.allocations.extend(allocations);
            }
        }
        self.version += 1;
    }

    pub fn reconcile_indicators(&mut self) {
        self.registry.reconcile(&self.universe);
    }

    pub fn warmup(&mut self, history: &HashMap<Symbol, Vec<Bar>>) -> WarmupReport {
        self.registry.warmup(history)
    }

    /// Route a bar to the registry when it matches the registry resolution.
    /// Returns whether any indicator saw it.
    pub fn ingest_bar(&mut self, bar: &Bar) -> bool {
        if bar.resolution != self.registry.resolution() {
            return false;
        }
        self.registry.update(bar)
    }

    pub fn record_price(&mut self, symbol: &Symbol, price: f64) {
        self.latest_prices.insert(symbol.clone(), price);
    }

    pub fn set_account(&mut self, account: AccountSnapshot) {
        self.account = account;
    }

    pub fn mark_pending<'a>(&mut self, symbols: impl IntoIterator<Item = &'a Symbol>) {
        self.pending.extend(symbols.into_iter().cloned());
    }

    pub fn clear_pending(&mut self, symbol: &Symbol) -> bool {
        self.pending.remove(symbol)
    }

    /// Drop per-cycle state before the next event.
    pub fn clear_transient(&mut self) {
        self.signals.clear();
        self.allocations.clear();
        debug!(version = self.version, "Cleared transient context");
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            taken_at: Utc::now(),
            positions: self.account.positions.clone(),
            indicators: self.registry.values(),
        }
    }
}
