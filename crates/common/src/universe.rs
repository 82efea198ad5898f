use std::collections::BTreeSet;

use tracing::debug;

use crate::Symbol;

/// The set of symbols currently tracked, plus the diff produced by the most
/// recent [`Universe::update`].
///
/// `added` and `removed` are recomputed on every update and never accumulate
/// across cycles.
#[derive(Debug, Clone, Default)]
pub struct Universe {
    members: BTreeSet<Symbol>,
    added: BTreeSet<Symbol>,
    removed: BTreeSet<Symbol>,
}

impl Universe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn members(&self) -> &BTreeSet<Symbol> {
        &self.members
    }

    pub fn added(&self) -> &BTreeSet<Symbol> {
        &self.added
    }

    pub fn removed(&self) -> &BTreeSet<Symbol> {
        &self.removed
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.members.contains(symbol)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.members.iter()
    }

    /// Replace membership with `targets` and record what changed.
    pub fn update<I>(&mut self, targets: I)
    where
        I: IntoIterator<Item = Symbol>,
    {
        let targets: BTreeSet<Symbol> = targets.into_iter().collect();
        let to_add: Vec<Symbol> = targets.difference(&self.members).cloned().collect();
        let to_remove: Vec<Symbol> = self.members.difference(&targets).cloned().collect();

        self.added.clear();
        self.removed.clear();
        for symbol in to_add {
            self.add(symbol);
        }
        for symbol in to_remove {
            self.remove(&symbol);
        }
    }

    /// Add one symbol. No-op if it is already a member.
    pub fn add(&mut self, symbol: Symbol) {
        if self.members.contains(&symbol) {
            return;
        }
        debug!(symbol = %symbol, "Universe add");
        self.removed.remove(&symbol);
        self.added.insert(symbol.clone());
        self.members.insert(symbol);
    }

    /// Remove one symbol. No-op if it is not a member.
    pub fn remove(&mut self, symbol: &Symbol) {
        if !self.members.remove(symbol) {
            return;
        }
        debug!(symbol = %symbol, "Universe remove");
        self.added.remove(symbol);
        self.removed.insert(symbol.clone());
    }
}

impl<'a> IntoIterator for &'a Universe {
    type Item = &'a Symbol;
    type IntoIter = std::collections::btree_set::Iter<'a, Symbol>;

    fn into_iter(self) -> Self::IntoIter {
        self.members.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(symbols: &[&str]) -> BTreeSet<Symbol> {
        symbols.iter().map(|s| Symbol::from(*s)).collect()
    }

    #[test]
    fn update_from_empty_adds_everything() {
        let mut universe = Universe::new();
        universe.update(set(&["AAA", "BBB"]));

        assert_eq!(universe.added(), &set(&["AAA", "BBB"]));
        assert!(universe.removed().is_empty());
        assert_eq!(universe.members(), &set(&["AAA", "BBB"]));
    }

    #[test]
    fn update_computes_diff_against_previous_members() {
        let mut universe = Universe::new();
        universe.update(set(&["AAA", "BBB"]));
        universe.update(set(&["BBB", "CCC"]));

        assert_eq!(universe.added(), &set(&["CCC"]));
        assert_eq!(universe.removed(), &set(&["AAA"]));
        assert_eq!(universe.members(), &set(&["BBB", "CCC"]));
    }

    #[test]
    fn unchanged_update_clears_previous_diff() {
        let mut universe = Universe::new();
        universe.update(set(&["AAA"]));
        universe.update(set(&["AAA"]));

        assert!(universe.added().is_empty());
        assert!(universe.removed().is_empty());
    }

    #[test]
    fn add_and_remove_are_idempotent() {
        let mut universe = Universe::new();
        universe.add("AAA".into());
        universe.add("AAA".into());
        assert_eq!(universe.len(), 1);

        universe.remove(&"ZZZ".into());
        assert!(universe.removed().is_empty());

        universe.remove(&"AAA".into());
        universe.remove(&"AAA".into());
        assert!(universe.is_empty());
        assert_eq!(universe.removed(), &set(&["AAA"]));
        assert!(universe.added().is_empty(), "added and removed must stay disjoint");
    }

    #[test]
    fn iteration_yields_members() {
        let mut universe = Universe::new();
        universe.update(set(&["BBB", "AAA"]));
        let seen: Vec<&str> = universe.iter().map(Symbol::as_str).collect();
        assert_eq!(seen, vec!["AAA", "BBB"]);
    }
}
