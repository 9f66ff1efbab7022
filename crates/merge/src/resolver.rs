//! Global id offsets and union-find over local merge proposals

use crate::GlobalRemap;
use calclabels_common::{LabelError, LocalMergeProposal, Result};
use std::collections::HashMap;
use tracing::{debug, info};

/// Per-substack offsets: `offset[0] = 0`, `offset[i + 1] = offset[i] + max_ids[i]`
#[must_use]
pub fn assign_offsets(max_ids: &[u64]) -> Vec<u64> {
    let mut offsets = Vec::with_capacity(max_ids.len());
    let mut next = 0u64;
    for &max_id in max_ids {
        offsets.push(next);
        next += max_id;
    }
    offsets
}

/// Collapses local merge proposals into one canonical remap
///
/// Bodies live in an arena addressed by index. The root of every group is
/// its smallest global id, so the resulting partition and representatives
/// do not depend on the order proposals arrive in.
#[derive(Debug, Clone)]
pub struct MergeResolver {
    max_ids: Vec<u64>,
    offsets: Vec<u64>,
    index: HashMap<u64, usize>,
    parent: Vec<usize>,
    labels: Vec<u64>,
    merges: usize,
}

impl MergeResolver {
    /// Start from each substack's largest local body id, in substack id order
    #[must_use]
    pub fn new(max_ids: Vec<u64>) -> Self {
        let offsets = assign_offsets(&max_ids);
        Self {
            max_ids,
            offsets,
            index: HashMap::new(),
            parent: Vec::new(),
            labels: Vec::new(),
            merges: 0,
        }
    }

    #[must_use]
    pub fn offsets(&self) -> &[u64] {
        &self.offsets
    }

    /// Total number of global body ids
    #[must_use]
    pub fn total_bodies(&self) -> u64 {
        self.max_ids.iter().sum()
    }

    /// Global id of a local body in substack `substack`
    pub fn global_id(&self, substack: usize, local: u64) -> Result<u64> {
        let max_id = *self.max_ids.get(substack).ok_or_else(|| {
            LabelError::MergeResolution(format!("unknown substack {substack}"))
        })?;
        if local == 0 || local > max_id {
            return Err(LabelError::MergeResolution(format!(
                "body {local} outside substack {substack} label range 1..={max_id}"
            )));
        }
        Ok(self.offsets[substack] + local)
    }

    /// Translate a proposal into global ids and union every pair
    pub fn add_proposal(&mut self, proposal: &LocalMergeProposal) -> Result<()> {
        for &[owner_body, neighbor_body] in &proposal.merges {
            let a = self.global_id(proposal.owner, owner_body)?;
            let b = self.global_id(proposal.neighbor, neighbor_body)?;
            self.union(a, b);
        }
        debug!(
            "Substacks {} and {}: {} merges",
            proposal.owner,
            proposal.neighbor,
            proposal.merges.len()
        );
        Ok(())
    }

    /// Merge the groups containing two global ids
    pub fn union(&mut self, a: u64, b: u64) {
        let ra = self.find_slot(a);
        let rb = self.find_slot(b);
        if ra == rb {
            return;
        }
        if self.labels[ra] < self.labels[rb] {
            self.parent[rb] = ra;
        } else {
            self.parent[ra] = rb;
        }
        self.merges += 1;
    }

    /// Canonical representative of a global id
    pub fn find(&mut self, label: u64) -> u64 {
        match self.index.get(&label) {
            Some(&slot) => {
                let root = self.root(slot);
                self.labels[root]
            }
            None => label,
        }
    }

    /// Every non-canonical id mapped to its representative
    pub fn remap(&mut self) -> Result<GlobalRemap> {
        let mut pairs = Vec::new();
        for slot in 0..self.labels.len() {
            let root = self.root(slot);
            if root != slot {
                pairs.push([self.labels[slot], self.labels[root]]);
            }
        }
        let remap = GlobalRemap::from_pairs(pairs)?;
        info!(
            "Resolved {} merges over {} global bodies: {} remapped",
            self.merges,
            self.total_bodies(),
            remap.len()
        );
        Ok(remap)
    }

    fn find_slot(&mut self, label: u64) -> usize {
        let slot = match self.index.get(&label) {
            Some(&slot) => slot,
            None => {
                let slot = self.labels.len();
                self.index.insert(label, slot);
                self.labels.push(label);
                self.parent.push(slot);
                slot
            }
        };
        self.root(slot)
    }

    fn root(&mut self, mut slot: usize) -> usize {
        while self.parent[slot] != slot {
            // path halving
            self.parent[slot] = self.parent[self.parent[slot]];
            slot = self.parent[slot];
        }
        slot
    }
}
