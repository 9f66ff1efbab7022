//! Canonical global body remap

use calclabels_common::{LabelError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Global body id to canonical representative
///
/// Every key maps straight to a representative that has no entry of its own,
/// so lookups never chain. Serialized as a list of `[from, to]` pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<[u64; 2]>", into = "Vec<[u64; 2]>")]
pub struct GlobalRemap {
    table: BTreeMap<u64, u64>,
}

impl GlobalRemap {
    /// Build from arbitrary `[from, to]` pairs, following chains to their end
    ///
    /// Contradictory targets, cycles and background entries are rejected.
    pub fn from_pairs<I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = [u64; 2]>,
    {
        let mut forward: BTreeMap<u64, u64> = BTreeMap::new();
        for [from, to] in pairs {
            if from == 0 || to == 0 {
                return Err(LabelError::MergeResolution(format!(
                    "background appears in remap entry {from} -> {to}"
                )));
            }
            if from == to {
                continue;
            }
            match forward.insert(from, to) {
                Some(previous) if previous != to => {
                    return Err(LabelError::MergeResolution(format!(
                        "body {from} maps to both {previous} and {to}"
                    )));
                }
                _ => {}
            }
        }

        let mut table = BTreeMap::new();
        for &from in forward.keys() {
            let mut target = from;
            let mut hops = 0;
            while let Some(&next) = forward.get(&target) {
                target = next;
                hops += 1;
                if target == from || hops > forward.len() {
                    return Err(LabelError::MergeResolution(format!(
                        "cycle through body {from}"
                    )));
                }
            }
            table.insert(from, target);
        }
        Ok(Self { table })
    }

    /// Canonical representative; unmapped ids are their own representative
    #[must_use]
    pub fn resolve(&self, label: u64) -> u64 {
        self.table.get(&label).copied().unwrap_or(label)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.table.iter().map(|(&from, &to)| (from, to))
    }

    /// Load and validate a remap file
    pub fn load(path: &Path) -> Result<Self> {
        calclabels_common::read_json(path)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        calclabels_common::write_json(path, self)
    }
}

impl TryFrom<Vec<[u64; 2]>> for GlobalRemap {
    type Error = LabelError;

    fn try_from(pairs: Vec<[u64; 2]>) -> Result<Self> {
        Self::from_pairs(pairs)
    }
}

impl From<GlobalRemap> for Vec<[u64; 2]> {
    fn from(remap: GlobalRemap) -> Self {
        remap.iter().map(|(from, to)| [from, to]).collect()
    }
}
