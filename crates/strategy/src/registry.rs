use std::collections::{BTreeMap, HashMap};

use tracing::{debug, info, warn};

use common::{Bar, Resolution, Symbol, Universe};

use crate::indicators::{Indicator, IndicatorGraph, IndicatorInput, IndicatorKey, Point};

/// Outcome of one [`IndicatorRegistry::warmup`] call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WarmupReport {
    /// Indicator instances whose chain received historical points.
    pub warmed: usize,
    /// Symbols skipped because every instance was already ready.
    pub skipped_ready: usize,
    /// Unready symbols for which no history was supplied.
    pub missing: Vec<Symbol>,
}

/// Per-symbol copies of a prototype indicator graph, kept in step with the
/// symbol universe.
#[derive(Debug, Clone)]
pub struct IndicatorRegistry {
    prototype: IndicatorGraph,
    instances: BTreeMap<Symbol, IndicatorGraph>,
    resolution: Resolution,
    warmup_length: Option<usize>,
}

impl IndicatorRegistry {
    pub fn new(prototype: IndicatorGraph, resolution: Resolution) -> Self {
        Self {
            prototype,
            instances: BTreeMap::new(),
            resolution,
            warmup_length: None,
        }
    }

    /// Override the history length requested during warmup.
    pub fn with_warmup_length(mut self, length: usize) -> Self {
        self.warmup_length = Some(length);
        self
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn prototype(&self) -> &IndicatorGraph {
        &self.prototype
    }

    /// Number of bars needed to warm every indicator.
    pub fn required_warmup_length(&self) -> usize {
        self.warmup_length
            .unwrap_or_else(|| self.prototype.max_cache_size())
    }

    /// Attach fresh indicator copies for added symbols and drop the
    /// instances of removed ones. Calling it again with an unchanged
    /// universe changes nothing.
    pub fn reconcile(&mut self, universe: &Universe) {
        for symbol in universe.added() {
            if self.instances.contains_key(symbol) {
                continue;
            }
            self.instances.insert(symbol.clone(), self.prototype.clone());
            info!(symbol = %symbol, indicators = self.prototype.len(), "Attached indicators");
        }

        for symbol in universe.removed() {
            if self.instances.remove(symbol).is_some() {
                info!(symbol = %symbol, "Detached indicators");
            }
        }
    }

    /// True when every attached instance is ready. Vacuously true when
    /// nothing is attached.
    pub fn is_ready(&self) -> bool {
        self.instances.values().all(IndicatorGraph::is_ready)
    }

    pub fn unready_symbols(&self) -> Vec<Symbol> {
        self.instances
            .iter()
            .filter(|(_, graph)| !graph.is_ready())
            .map(|(symbol, _)| symbol.clone())
            .collect()
    }

    /// Bulk-ingest history into instances that are not ready yet. Ready
    /// instances are left alone, so this is safe to call every cycle.
    pub fn warmup(&mut self, history: &HashMap<Symbol, Vec<Bar>>) -> WarmupReport {
        let mut report = WarmupReport::default();

        for (symbol, graph) in self.instances.iter_mut() {
            if graph.is_ready() {
                report.skipped_ready += 1;
                continue;
            }

            let Some(bars) = history.get(symbol) else {
                warn!(symbol = %symbol, "No warmup history for tracked symbol");
                report.missing.push(symbol.clone());
                continue;
            };

            let points: Vec<Point> = bars.iter().map(Point::from).collect();
            let warmed = graph.warmup(&points);
            debug!(symbol = %symbol, bars = bars.len(), warmed, ready = graph.is_ready(), "Warmed indicators");
            report.warmed += warmed;
        }

        report
    }

    /// Route a live bar to every indicator of its symbol. Returns `false`
    /// when the symbol is not tracked.
    pub fn update(&mut self, bar: &Bar) -> bool {
        let Some(graph) = self.instances.get_mut(&bar.symbol) else {
            warn!(symbol = %bar.symbol, "Bar for untracked symbol dropped");
            return false;
        };
        graph.ingest_bars(&IndicatorInput::from(bar));
        true
    }

    pub fn symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.instances.keys()
    }

    pub fn instances(&self, symbol: &str) -> Option<&IndicatorGraph> {
        self.instances.get(symbol)
    }

    pub fn key(&self, name: &str) -> Option<IndicatorKey> {
        self.prototype.key(name)
    }

    pub fn indicator(&self, symbol: &str, key: IndicatorKey) -> Option<&Indicator> {
        self.instances.get(symbol)?.get(key)
    }

    pub fn value(&self, symbol: &str, key: IndicatorKey) -> Option<f64> {
        self.indicator(symbol, key)?.value()
    }

    /// Latest value of every indicator, by symbol and display name.
    pub fn values(&self) -> BTreeMap<Symbol, BTreeMap<String, Option<f64>>> {
        self.instances
            .iter()
            .map(|(symbol, graph)| {
                let values = graph
                    .iter()
                    .map(|(_, ind)| (ind.name().to_string(), ind.value()))
                    .collect();
                (symbol.clone(), values)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::tests::day;
    use crate::indicators::{IndicatorSpec, Rsi, Sampling, Sma};

    fn prototype() -> IndicatorGraph {
        let mut b = IndicatorGraph::builder();
        b.add(IndicatorSpec::new(Sma::new(3).unwrap()).sampling(Sampling::Day))
            .unwrap();
        b.add(
            IndicatorSpec::new(Rsi::new(2).unwrap())
                .cache_size(5)
                .sampling(Sampling::Day),
        )
        .unwrap();
        b.build()
    }

    fn bar(symbol: &str, close: f64, n: i64) -> Bar {
        Bar {
            symbol: symbol.into(),
            resolution: Resolution::Day,
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
            timestamp: day(n),
        }
    }

    fn history(symbols: &[&str], len: i64) -> HashMap<Symbol, Vec<Bar>> {
        symbols
            .iter()
            .map(|&s| {
                let bars = (0..len).map(|i| bar(s, 100.0 + i as f64, i)).collect();
                (Symbol::from(s), bars)
            })
            .collect()
    }

    fn syms(symbols: &[&str]) -> Vec<Symbol> {
        symbols.iter().map(|&s| Symbol::from(s)).collect()
    }

    fn instance_count(reg: &IndicatorRegistry) -> usize {
        reg.symbols()
            .filter_map(|s| reg.instances(s.as_str()))
            .map(IndicatorGraph::len)
            .sum()
    }

    #[test]
    fn reconcile_follows_universe_diffs() {
        let mut universe = Universe::new();
        let mut reg = IndicatorRegistry::new(prototype(), Resolution::Day);

        universe.update(syms(&["AAA", "BBB"]));
        reg.reconcile(&universe);
        assert_eq!(instance_count(&reg), 4);

        universe.update(syms(&["BBB", "CCC"]));
        reg.reconcile(&universe);
        let symbols: Vec<&str> = reg.symbols().map(Symbol::as_str).collect();
        assert_eq!(symbols, vec!["BBB", "CCC"]);
        assert_eq!(instance_count(&reg), 4);
    }

    #[test]
    fn reconcile_twice_is_a_no_op() {
        let mut universe = Universe::new();
        let mut reg = IndicatorRegistry::new(prototype(), Resolution::Day);
        universe.update(syms(&["AAA"]));
        reg.reconcile(&universe);
        reg.warmup(&history(&["AAA"], 10));
        let before = reg.values();

        reg.reconcile(&universe);
        assert_eq!(reg.values(), before);
        assert!(reg.is_ready());
    }

    #[test]
    fn empty_registry_is_ready() {
        let reg = IndicatorRegistry::new(prototype(), Resolution::Day);
        assert!(reg.is_ready());
        assert!(reg.unready_symbols().is_empty());
    }

    #[test]
    fn warmup_length_is_max_cache_or_override() {
        let reg = IndicatorRegistry::new(prototype(), Resolution::Day);
        assert_eq!(reg.required_warmup_length(), 5);
        assert_eq!(reg.with_warmup_length(50).required_warmup_length(), 50);
    }

    #[test]
    fn second_warmup_with_same_data_ingests_nothing() {
        let mut universe = Universe::new();
        let mut reg = IndicatorRegistry::new(prototype(), Resolution::Day);
        universe.update(syms(&["AAA"]));
        reg.reconcile(&universe);

        let data = history(&["AAA"], 10);
        let first = reg.warmup(&data);
        assert_eq!(first.warmed, 2);
        assert!(reg.is_ready());

        let input_lens = |reg: &IndicatorRegistry| -> Vec<usize> {
            let graph = reg.instances("AAA").unwrap();
            graph.iter().map(|(_, ind)| ind.inputs().len()).collect()
        };
        let before = input_lens(&reg);
        let second = reg.warmup(&data);
        assert_eq!(second.warmed, 0);
        assert_eq!(second.skipped_ready, 1);
        assert_eq!(input_lens(&reg), before);
    }

    #[test]
    fn missing_history_is_reported_and_batch_continues() {
        let mut universe = Universe::new();
        let mut reg = IndicatorRegistry::new(prototype(), Resolution::Day);
        universe.update(syms(&["AAA", "BBB"]));
        reg.reconcile(&universe);

        let report = reg.warmup(&history(&["BBB"], 10));
        assert_eq!(report.missing, vec![Symbol::from("AAA")]);
        assert_eq!(report.warmed, 2);
        assert_eq!(reg.unready_symbols(), vec![Symbol::from("AAA")]);
    }

    #[test]
    fn update_routes_by_symbol_and_drops_untracked() {
        let mut universe = Universe::new();
        let mut reg = IndicatorRegistry::new(prototype(), Resolution::Day);
        universe.update(syms(&["AAA"]));
        reg.reconcile(&universe);
        let sma = reg.key("SMA_3").unwrap();

        for i in 0..3 {
            assert!(reg.update(&bar("AAA", 10.0 * (i + 1) as f64, i)));
        }
        assert_eq!(reg.value("AAA", sma), Some(20.0));
        assert!(!reg.update(&bar("ZZZ", 1.0, 0)));
        assert!(reg.instances("ZZZ").is_none());
    }

    #[test]
    fn values_cover_every_indicator() {
        let mut universe = Universe::new();
        let mut reg = IndicatorRegistry::new(prototype(), Resolution::Day);
        universe.update(syms(&["AAA"]));
        reg.reconcile(&universe);

        let values = reg.values();
        let names: Vec<&String> = values[&Symbol::from("AAA")].keys().collect();
        assert_eq!(names, vec!["RSI_2", "SMA_3"]);
        assert!(values[&Symbol::from("AAA")].values().all(Option::is_none));
    }
}
