//! # engine::partition
//!
//! **StreamPartitioner**: split the symbol universe into groups that each fit
//! on one multiplexed connection.
//!
//! Input is normalized through a `BTreeSet` first, so the same set always
//! yields the same groups regardless of the caller's iteration order.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

/// Immutable batch of symbols sharing one subscription for one cycle.
#[derive(Debug, Clone)]
pub struct SymbolGroup {
    pub id:  usize,
    symbols: Arc<[String]>,
    members: Arc<HashSet<String>>,
}

impl SymbolGroup {
    pub fn new(id: usize, symbols: Vec<String>) -> Self {
        let members = symbols.iter().cloned().collect();
        Self {
            id,
            symbols: symbols.into(),
            members: Arc::new(members),
        }
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    /// O(1) membership test used to drop ticks that do not belong here.
    pub fn contains(&self, symbol: &str) -> bool {
        self.members.contains(symbol)
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

/// Contiguous chunks of at most `max_group_size` symbols, in sorted order.
/// A `max_group_size` of zero is treated as one.
pub fn partition<I, S>(symbols: I, max_group_size: usize) -> Vec<SymbolGroup>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let ordered: Vec<String> = symbols
        .into_iter()
        .map(Into::into)
        .collect::<BTreeSet<String>>()
        .into_iter()
        .collect();

    ordered
        .chunks(max_group_size.max(1))
        .enumerate()
        .map(|(id, chunk)| SymbolGroup::new(id, chunk.to_vec()))
        .collect()
}
