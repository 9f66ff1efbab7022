//! Face adjacency between substacks

use calclabels_common::{AdjacencyPair, Axis, AxisSet, Substack};
use tracing::info;

/// Touching axis of two substacks if they need a stitch job
///
/// Requires the core regions to touch exactly on one axis and the
/// halo-expanded regions to properly overlap on all three, so only face
/// neighbors qualify; edge and corner contacts touch on two or three axes.
/// Substacks without a halo share no voxel and are never paired.
#[must_use]
pub fn stitch_axes(a: &Substack, b: &Substack) -> Option<AxisSet> {
    let touching = a.touching_axes(b);
    if touching.len() != 1 {
        return None;
    }
    let (ha, hb) = (a.halo_region(), b.halo_region());
    let overlaps = Axis::ALL.into_iter().all(|axis| {
        let (a1, a2) = ha.interval(axis);
        let (b1, b2) = hb.interval(axis);
        a1.max(b1) < a2.min(b2)
    });
    overlaps.then_some(touching)
}

/// All substack pairs that share a face
#[derive(Debug, Clone, Default)]
pub struct AdjacencyGraph {
    pairs: Vec<AdjacencyPair>,
}

impl AdjacencyGraph {
    /// Test every unordered pair; the lower id owns the stitch
    #[must_use]
    pub fn build(substacks: &[Substack]) -> Self {
        let mut pairs = Vec::new();
        for (i, a) in substacks.iter().enumerate() {
            for b in &substacks[i + 1..] {
                if let Some(axes) = stitch_axes(a, b) {
                    pairs.push(AdjacencyPair {
                        owner: a.id,
                        neighbor: b.id,
                        axes,
                    });
                }
            }
        }
        info!(
            "Found {} adjacent pairs among {} substacks",
            pairs.len(),
            substacks.len()
        );
        Self { pairs }
    }

    #[must_use]
    pub fn pairs(&self) -> &[AdjacencyPair] {
        &self.pairs
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    #[must_use]
    pub fn are_adjacent(&self, a: usize, b: usize) -> bool {
        self.pairs.iter().any(|p| {
            (p.owner == a && p.neighbor == b) || (p.owner == b && p.neighbor == a)
        })
    }

    /// Set each substack's stitch count to the number of pairs it owns
    pub fn record_stitch_counts(&self, substacks: &mut [Substack]) {
        for substack in substacks.iter_mut() {
            substack.stitch_count = self.pairs.iter().filter(|p| p.owner == substack.id).count();
        }
    }
}
