//! Feeder chains of indicators stored in an arena.
//!
//! A dependent indicator consumes the outputs of its feeder instead of raw
//! bars. Nodes reference each other by index only; the graph owns every
//! indicator. History requirements are calibrated once, when a dependent is
//! added: the whole feeder chain is widened to hold at least as many points
//! as the dependent.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::debug;

use super::{Calculation, Indicator, IndicatorError, IndicatorInput, Point, Sampling};

/// Typed handle to a node of an [`IndicatorGraph`]. Handles issued by a
/// builder stay valid for every clone of the graph it builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IndicatorKey(usize);

impl IndicatorKey {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Description of one node before it is added to a graph.
#[derive(Debug, Clone)]
pub struct IndicatorSpec {
    calculation: Arc<dyn Calculation>,
    name: Option<String>,
    cache_size: Option<usize>,
    sampling: Option<Sampling>,
    feeder: Option<IndicatorKey>,
}

impl IndicatorSpec {
    pub fn new(calculation: impl Calculation + 'static) -> Self {
        Self::from_arc(Arc::new(calculation))
    }

    pub fn from_arc(calculation: Arc<dyn Calculation>) -> Self {
        Self {
            calculation,
            name: None,
            cache_size: None,
            sampling: None,
            feeder: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn cache_size(mut self, cache_size: usize) -> Self {
        self.cache_size = Some(cache_size);
        self
    }

    pub fn sampling(mut self, sampling: Sampling) -> Self {
        self.sampling = Some(sampling);
        self
    }

    /// Consume the outputs of `feeder` instead of raw bars.
    pub fn fed_by(mut self, feeder: IndicatorKey) -> Self {
        self.feeder = Some(feeder);
        self
    }
}

#[derive(Debug, Clone)]
struct Node {
    indicator: Indicator,
    feeder: Option<usize>,
    dependents: Vec<usize>,
}

#[derive(Debug, Default)]
pub struct IndicatorGraphBuilder {
    nodes: Vec<Node>,
    names: BTreeMap<String, IndicatorKey>,
}

impl IndicatorGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node. A dependent inherits its feeder's sampling rule so that
    /// replaced feeder outputs replace dependent inputs; an explicit rule
    /// that disagrees with the feeder's is rejected.
    pub fn add(&mut self, spec: IndicatorSpec) -> Result<IndicatorKey, IndicatorError> {
        let feeder = match spec.feeder {
            Some(key) if key.0 < self.nodes.len() => Some(key.0),
            Some(key) => return Err(IndicatorError::UnknownFeeder(format!("#{}", key.0))),
            None => None,
        };

        let sampling = match feeder {
            Some(f) => {
                let inherited = self.nodes[f].indicator.sampling();
                match spec.sampling {
                    Some(own) if Some(own) != inherited => {
                        return Err(IndicatorError::SamplingMismatch {
                            name: spec.name.unwrap_or_else(|| spec.calculation.label()),
                            own,
                            feeder: inherited,
                        });
                    }
                    _ => inherited,
                }
            }
            None => spec.sampling,
        };
        let indicator = Indicator::new(spec.name, spec.calculation, spec.cache_size, sampling)?;

        if self.names.contains_key(indicator.name()) {
            return Err(IndicatorError::DuplicateName(indicator.name().to_string()));
        }

        let key = IndicatorKey(self.nodes.len());
        self.calibrate(feeder, indicator.cache_size());

        if let Some(f) = feeder {
            self.nodes[f].dependents.push(key.0);
        }
        self.names.insert(indicator.name().to_string(), key);
        self.nodes.push(Node {
            indicator,
            feeder,
            dependents: Vec::new(),
        });
        Ok(key)
    }

    /// Key of a previously added node, by display name.
    pub fn key(&self, name: &str) -> Option<IndicatorKey> {
        self.names.get(name).copied()
    }

    pub fn build(self) -> IndicatorGraph {
        IndicatorGraph {
            nodes: self.nodes,
            names: self.names,
        }
    }

    fn calibrate(&mut self, mut feeder: Option<usize>, mut required: usize) {
        while let Some(idx) = feeder {
            let node = &mut self.nodes[idx];
            let before = node.indicator.cache_size();
            node.indicator.widen_cache(required);
            if node.indicator.cache_size() != before {
                debug!(
                    indicator = %node.indicator.name(),
                    from = before,
                    to = node.indicator.cache_size(),
                    "Widened feeder cache"
                );
            }
            required = node.indicator.cache_size();
            feeder = node.feeder;
        }
    }
}

/// A calibrated set of indicators for one symbol. Cloning deep-copies all
/// rolling state.
#[derive(Debug, Clone, Default)]
pub struct IndicatorGraph {
    nodes: Vec<Node>,
    names: BTreeMap<String, IndicatorKey>,
}

impl IndicatorGraph {
    pub fn builder() -> IndicatorGraphBuilder {
        IndicatorGraphBuilder::new()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = IndicatorKey> + '_ {
        (0..self.nodes.len()).map(IndicatorKey)
    }

    pub fn key(&self, name: &str) -> Option<IndicatorKey> {
        self.names.get(name).copied()
    }

    pub fn get(&self, key: IndicatorKey) -> Option<&Indicator> {
        self.nodes.get(key.0).map(|n| &n.indicator)
    }

    pub fn value(&self, key: IndicatorKey) -> Option<f64> {
        self.get(key).and_then(Indicator::value)
    }

    /// True when every node has a value. An empty graph is ready.
    pub fn is_ready(&self) -> bool {
        self.nodes.iter().all(|n| n.indicator.is_ready())
    }

    pub fn iter(&self) -> impl Iterator<Item = (IndicatorKey, &Indicator)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (IndicatorKey(i), &n.indicator))
    }

    pub fn feeder(&self, key: IndicatorKey) -> Option<IndicatorKey> {
        self.nodes.get(key.0)?.feeder.map(IndicatorKey)
    }

    /// The node at the top of `key`'s feeder chain (itself when unfed).
    pub fn root_of(&self, key: IndicatorKey) -> Option<IndicatorKey> {
        let mut idx = key.0;
        loop {
            match self.nodes.get(idx)?.feeder {
                Some(feeder) => idx = feeder,
                None => return Some(IndicatorKey(idx)),
            }
        }
    }

    /// Largest cache size across all nodes.
    pub fn max_cache_size(&self) -> usize {
        self.nodes
            .iter()
            .map(|n| n.indicator.cache_size())
            .max()
            .unwrap_or(0)
    }

    /// Ingest into the chain containing `key`. Input always enters at the
    /// chain root; outputs flow down to dependents. Returns the number of
    /// points applied to the root, or `None` for an unknown key.
    pub fn ingest(&mut self, key: IndicatorKey, input: IndicatorInput) -> Option<usize> {
        let root = self.root_of(key)?.0;
        let applied = match input {
            IndicatorInput::SinglePoint(point) => {
                self.ingest_at(root, point);
                1
            }
            IndicatorInput::BatchPoints(points) => {
                let n = points.len();
                for point in points {
                    self.ingest_at(root, point);
                }
                n
            }
        };
        Some(applied)
    }

    /// Feed `input` once to every root. Returns the number of roots fed.
    pub fn ingest_bars(&mut self, input: &IndicatorInput) -> usize {
        let roots = self.roots();
        for &root in &roots {
            match input {
                IndicatorInput::SinglePoint(point) => self.ingest_at(root, *point),
                IndicatorInput::BatchPoints(points) => {
                    for point in points {
                        self.ingest_at(root, *point);
                    }
                }
            }
        }
        roots.len()
    }

    /// Bulk-ingest history into the chains of nodes that are not ready.
    /// Points not newer than a root's last timestamp are skipped, so
    /// repeating a warmup never duplicates history. Returns how many
    /// unready nodes had their chain fed.
    pub fn warmup(&mut self, points: &[Point]) -> usize {
        let unready: Vec<usize> = (0..self.nodes.len())
            .filter(|&i| !self.nodes[i].indicator.is_ready())
            .collect();
        if unready.is_empty() {
            return 0;
        }

        let roots: BTreeSet<usize> = unready
            .iter()
            .filter_map(|&i| self.root_of(IndicatorKey(i)))
            .map(|k| k.0)
            .collect();

        let mut fed = BTreeSet::new();
        for root in roots {
            let last = self.nodes[root].indicator.previous_timestamp();
            let mut applied = 0;
            for point in points {
                let stale = matches!((point.timestamp, last), (Some(ts), Some(prev)) if ts <= prev);
                if stale {
                    continue;
                }
                self.ingest_at(root, *point);
                applied += 1;
            }
            if applied > 0 {
                fed.insert(root);
            }
        }

        unready
            .into_iter()
            .filter(|&i| {
                self.root_of(IndicatorKey(i))
                    .is_some_and(|root| fed.contains(&root.0))
            })
            .count()
    }

    fn roots(&self) -> Vec<usize> {
        (0..self.nodes.len())
            .filter(|&i| self.nodes[i].feeder.is_none())
            .collect()
    }

    fn ingest_at(&mut self, idx: usize, point: Point) {
        let indicator = &mut self.nodes[idx].indicator;
        indicator.ingest_point(point);
        let Some(value) = indicator.value() else {
            return;
        };

        let derived = Point::from_value(value, point.timestamp);
        for i in 0..self.nodes[idx].dependents.len() {
            let dependent = self.nodes[idx].dependents[i];
            self.ingest_at(dependent, derived);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::tests::{close_at, day};
    use crate::indicators::Sma;
    use chrono::Duration;

    fn sma(period: usize) -> IndicatorSpec {
        IndicatorSpec::new(Sma::new(period).unwrap())
    }

    fn single(close: f64, n: i64) -> IndicatorInput {
        IndicatorInput::SinglePoint(close_at(close, day(n)))
    }

    #[test]
    fn calibration_widens_whole_chain() {
        let mut b = IndicatorGraph::builder();
        let a = b.add(sma(2).named("a")).unwrap();
        let m = b.add(sma(3).named("b").cache_size(5).fed_by(a)).unwrap();
        let c = b.add(sma(2).named("c").cache_size(10).fed_by(m)).unwrap();
        let graph = b.build();

        assert_eq!(graph.get(a).unwrap().cache_size(), 10);
        assert_eq!(graph.get(m).unwrap().cache_size(), 10);
        assert_eq!(graph.get(c).unwrap().cache_size(), 10);
        assert_eq!(graph.max_cache_size(), 10);
    }

    #[test]
    fn calibration_never_shrinks_feeder() {
        let mut b = IndicatorGraph::builder();
        let a = b.add(sma(2).cache_size(20)).unwrap();
        b.add(sma(2).named("dep").cache_size(4).fed_by(a)).unwrap();
        assert_eq!(b.build().get(a).unwrap().cache_size(), 20);
    }

    #[test]
    fn unknown_feeder_and_duplicate_name_rejected() {
        let mut b = IndicatorGraph::builder();
        let err = b.add(sma(2).fed_by(IndicatorKey(3))).unwrap_err();
        assert!(matches!(err, IndicatorError::UnknownFeeder(_)));

        b.add(sma(2)).unwrap();
        let err = b.add(sma(2)).unwrap_err();
        assert_eq!(err, IndicatorError::DuplicateName("SMA_2".into()));
    }

    #[test]
    fn ingest_via_dependent_goes_to_root_once() {
        let mut b = IndicatorGraph::builder();
        let root = b.add(sma(1).named("root").sampling(Sampling::Day)).unwrap();
        let dep = b.add(sma(2).named("dep").fed_by(root)).unwrap();
        let mut graph = b.build();

        assert_eq!(graph.root_of(dep), Some(root));
        assert_eq!(graph.ingest(dep, single(5.0, 0)), Some(1));
        assert_eq!(graph.get(root).unwrap().inputs().len(), 1);
        assert_eq!(graph.get(dep).unwrap().inputs().len(), 1);
    }

    #[test]
    fn outputs_propagate_to_dependents() {
        let mut b = IndicatorGraph::builder();
        let root = b.add(sma(1).named("root")).unwrap();
        let dep = b.add(sma(2).named("dep").fed_by(root)).unwrap();
        let mut graph = b.build();

        for (i, close) in [1.0, 2.0, 3.0].into_iter().enumerate() {
            graph.ingest(root, single(close, i as i64));
        }
        assert_eq!(graph.value(root), Some(3.0));
        assert_eq!(graph.value(dep), Some(2.5));
        assert!(graph.is_ready());
    }

    #[test]
    fn dependent_inherits_sampling_and_replaces() {
        let mut b = IndicatorGraph::builder();
        let root = b.add(sma(1).named("root").sampling(Sampling::Day)).unwrap();
        let dep = b.add(sma(2).named("dep").fed_by(root)).unwrap();
        let mut graph = b.build();
        assert_eq!(graph.get(dep).unwrap().sampling(), Some(Sampling::Day));

        graph.ingest(root, single(1.0, 0));
        graph.ingest(root, single(2.0, 1));
        let later = IndicatorInput::SinglePoint(close_at(4.0, day(1) + Duration::hours(3)));
        graph.ingest(root, later);

        assert_eq!(graph.get(dep).unwrap().inputs().len(), 2);
        assert_eq!(graph.value(dep), Some(2.5));
    }

    #[test]
    fn ingest_bars_feeds_every_root() {
        let mut b = IndicatorGraph::builder();
        let r1 = b.add(sma(1).named("r1")).unwrap();
        let r2 = b.add(sma(1).named("r2")).unwrap();
        b.add(sma(1).named("d").fed_by(r1)).unwrap();
        let mut graph = b.build();

        assert_eq!(graph.ingest_bars(&single(7.0, 0)), 2);
        assert_eq!(graph.value(r1), Some(7.0));
        assert_eq!(graph.value(r2), Some(7.0));
        assert_eq!(graph.value(graph.key("d").unwrap()), Some(7.0));
    }

    #[test]
    fn warmup_skips_history_already_seen() {
        let mut graph = {
            let mut b = IndicatorGraph::builder();
            b.add(sma(3).sampling(Sampling::Day)).unwrap();
            b.build()
        };
        let key = graph.key("SMA_3").unwrap();

        let first = vec![close_at(1.0, day(0)), close_at(2.0, day(1))];
        assert_eq!(graph.warmup(&first), 1);
        assert!(!graph.is_ready());

        let second = vec![close_at(1.0, day(0)), close_at(2.0, day(1)), close_at(3.0, day(2))];
        assert_eq!(graph.warmup(&second), 1);
        assert_eq!(graph.get(key).unwrap().inputs().len(), 3);
        assert_eq!(graph.value(key), Some(2.0));

        assert_eq!(graph.warmup(&second), 0);
        assert_eq!(graph.get(key).unwrap().inputs().len(), 3);
    }

    #[test]
    fn dependent_sampling_must_match_feeder() {
        let mut b = IndicatorGraph::builder();
        let daily = b.add(sma(2).named("daily").sampling(Sampling::Day)).unwrap();
        let raw = b.add(sma(2).named("raw")).unwrap();

        let err = b
            .add(sma(2).named("hourly").sampling(Sampling::Hours(1)).fed_by(daily))
            .unwrap_err();
        assert!(matches!(
            err,
            IndicatorError::SamplingMismatch { own: Sampling::Hours(1), feeder: Some(Sampling::Day), .. }
        ));

        let err = b
            .add(sma(2).named("sampled").sampling(Sampling::Day).fed_by(raw))
            .unwrap_err();
        assert!(matches!(err, IndicatorError::SamplingMismatch { feeder: None, .. }));

        let same = b.add(sma(2).named("same").sampling(Sampling::Day).fed_by(daily)).unwrap();
        let inherited = b.add(sma(2).named("inherited").fed_by(daily)).unwrap();
        let graph = b.build();
        assert_eq!(graph.get(same).unwrap().sampling(), Some(Sampling::Day));
        assert_eq!(graph.get(inherited).unwrap().sampling(), Some(Sampling::Day));
        assert!(graph.key("hourly").is_none());
    }

    #[test]
    fn clones_do_not_share_state() {
        let mut b = IndicatorGraph::builder();
        let k = b.add(sma(1)).unwrap();
        let prototype = b.build();

        let mut a = prototype.clone();
        a.ingest(k, single(1.0, 0));
        assert!(a.is_ready());
        assert!(!prototype.is_ready());
        assert_eq!(prototype.get(k).unwrap().inputs().len(), 0);
    }
}
