use std::collections::BTreeSet;

use common::{Result, Symbol};

use super::AssetSelection;
use crate::context::Context;

/// A fixed symbol list.
#[derive(Debug, Clone)]
pub struct ManualSelection {
    symbols: BTreeSet<Symbol>,
}

impl ManualSelection {
    pub fn new<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Symbol>,
    {
        Self {
            symbols: symbols.into_iter().map(Into::into).collect(),
        }
    }

    pub fn symbols(&self) -> &BTreeSet<Symbol> {
        &self.symbols
    }
}

impl AssetSelection for ManualSelection {
    fn name(&self) -> &'static str {
        "manual"
    }

    fn select(&self, _ctx: &Context) -> Result<BTreeSet<Symbol>> {
        Ok(self.symbols.clone())
    }
}
