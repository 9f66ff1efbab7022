//! Boundary stitching between face-adjacent substacks
//!
//! Two substacks segmented independently see the same voxels inside their
//! shared halo. Each body on one side votes for the body on the other side
//! that covers most of its footprint in that overlap; a merge is proposed when
//! the votes agree in both directions (or, in liberal mode, when one side's
//! vote is overwhelming).
//!
//! Label `0` is background: it never votes, and a vote won by background
//! is treated as no partner at all.

use calclabels_common::{AxisSet, BoundingBox, LabelArray, LabelError, Result};
use ndarray::{s, ArrayView3};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

/// Merge decision policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StitchMode {
    /// No merges; every body is pruned
    Disabled,
    /// Overlap lower bound plus a purity requirement
    Conservative,
    /// Overlap lower bound only
    Standard,
    /// Standard, plus a one-sided fast path for large pure overlaps
    Liberal,
}

impl TryFrom<u8> for StitchMode {
    type Error = LabelError;

    fn try_from(mode: u8) -> Result<Self> {
        match mode {
            0 => Ok(Self::Disabled),
            1 => Ok(Self::Conservative),
            2 => Ok(Self::Standard),
            3 => Ok(Self::Liberal),
            other => Err(LabelError::Config(format!(
                "stitching mode must be 0-3, got {other}"
            ))),
        }
    }
}

/// Vote thresholds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StitchParams {
    /// Minimum winning overlap in voxels
    pub min_overlap: u64,
    /// Minimum winning share of a body's footprint
    pub purity: f64,
    /// Liberal fast path requires a winning overlap above this
    pub liberal_min_overlap: u64,
}

impl Default for StitchParams {
    fn default() -> Self {
        Self {
            min_overlap: 50,
            purity: 0.90,
            liberal_min_overlap: 1000,
        }
    }
}

/// Counts of each decision taken while stitching
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StitchStats {
    pub small_overlap_prune: usize,
    pub conservative_prune: usize,
    pub liberal_add: usize,
    pub not_mutual: usize,
}

/// Result of stitching one substack pair
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StitchOutcome {
    /// `(first body, second body)` pairs in emission order
    pub merges: Vec<[u64; 2]>,
    pub stats: StitchStats,
}

/// Overlap counts against the other side, in first-seen order
#[derive(Debug, Default)]
struct Histogram {
    counts: Vec<(u64, u64)>,
    index: HashMap<u64, usize>,
}

impl Histogram {
    fn add(&mut self, label: u64) {
        match self.index.get(&label) {
            Some(&slot) => self.counts[slot].1 += 1,
            None => {
                self.index.insert(label, self.counts.len());
                self.counts.push((label, 1));
            }
        }
    }

    /// Winning label, its count, and the total count; ties go to the first seen
    fn best(&self) -> Option<(u64, u64, u64)> {
        let mut winner: Option<(u64, u64)> = None;
        let mut total = 0;
        for &(label, count) in &self.counts {
            total += count;
            if winner.map_or(true, |(_, best)| count > best) {
                winner = Some((label, count));
            }
        }
        winner.map(|(label, count)| (label, count, total))
    }
}

enum Vote {
    Pruned,
    FastPath(u64),
    Candidate(u64),
}

/// Proposes body merges across a shared substack face
#[derive(Debug, Clone)]
pub struct StitchEngine {
    mode: StitchMode,
    params: StitchParams,
}

impl StitchEngine {
    #[must_use]
    pub fn new(mode: StitchMode, params: StitchParams) -> Self {
        Self { mode, params }
    }

    #[must_use]
    pub fn mode(&self) -> StitchMode {
        self.mode
    }

    /// Stitch two halo-expanded label stacks covering `bbox_a` and `bbox_b`
    ///
    /// `axes` names the axis on which the core regions touch; a single-voxel
    /// plane at its midpoint selects the bodies eligible to merge.
    pub fn stitch(
        &self,
        labels_a: &LabelArray,
        bbox_a: &BoundingBox,
        labels_b: &LabelArray,
        bbox_b: &BoundingBox,
        axes: AxisSet,
    ) -> Result<StitchOutcome> {
        check_shape(labels_a, bbox_a)?;
        check_shape(labels_b, bbox_b)?;
        let Some(overlap) = bbox_a.intersection(bbox_b) else {
            debug!("Regions {} and {} share no voxel, nothing to stitch", bbox_a, bbox_b);
            return Ok(StitchOutcome::default());
        };

        let a = crop(labels_a, bbox_a, &overlap);
        let b = crop(labels_b, bbox_b, &overlap);
        let eligible_a = plane_bodies(a, axes);
        let eligible_b = plane_bodies(b, axes);

        let mut outcome = StitchOutcome::default();
        if self.mode == StitchMode::Disabled {
            outcome.stats.small_overlap_prune = eligible_a.len() + eligible_b.len();
            return Ok(outcome);
        }

        // votes_b[body in b] counts bodies of a under its footprint, and vice versa
        let mut votes_b: BTreeMap<u64, Histogram> = BTreeMap::new();
        let mut votes_a: BTreeMap<u64, Histogram> = BTreeMap::new();
        for (&la, &lb) in a.iter().zip(b.iter()) {
            if lb != 0 {
                votes_b.entry(lb).or_default().add(la);
            }
            if la != 0 {
                votes_a.entry(la).or_default().add(lb);
            }
        }

        let mut mutual: HashMap<u64, HashSet<u64>> = HashMap::new();
        let mut retired: HashSet<(u64, u64)> = HashSet::new();

        for (&body_b, histogram) in votes_b.iter().filter(|(body, _)| eligible_b.contains(*body)) {
            match self.vote(histogram, &mut outcome.stats) {
                Vote::Pruned => {}
                Vote::FastPath(body_a) => {
                    outcome.merges.push([body_a, body_b]);
                    retired.insert((body_a, body_b));
                }
                Vote::Candidate(body_a) => {
                    mutual.entry(body_a).or_default().insert(body_b);
                }
            }
        }

        for (&body_a, histogram) in votes_a.iter().filter(|(body, _)| eligible_a.contains(*body)) {
            if let Some((body_b, _, _)) = histogram.best() {
                if retired.contains(&(body_a, body_b)) {
                    continue;
                }
            }
            match self.vote(histogram, &mut outcome.stats) {
                Vote::Pruned => {}
                Vote::FastPath(body_b) => outcome.merges.push([body_a, body_b]),
                Vote::Candidate(body_b) => {
                    if mutual
                        .get(&body_a)
                        .is_some_and(|partners| partners.contains(&body_b))
                    {
                        outcome.merges.push([body_a, body_b]);
                    } else {
                        outcome.stats.not_mutual += 1;
                    }
                }
            }
        }

        debug!(
            "Stitched overlap {}: {} merges, {:?}",
            overlap,
            outcome.merges.len(),
            outcome.stats
        );
        Ok(outcome)
    }

    fn vote(&self, histogram: &Histogram, stats: &mut StitchStats) -> Vote {
        let Some((winner, count, total)) = histogram.best() else {
            stats.small_overlap_prune += 1;
            return Vote::Pruned;
        };
        if winner == 0 || count < self.params.min_overlap {
            stats.small_overlap_prune += 1;
            return Vote::Pruned;
        }
        let purity = count as f64 / total as f64;
        match self.mode {
            StitchMode::Conservative if purity < self.params.purity => {
                stats.conservative_prune += 1;
                Vote::Pruned
            }
            StitchMode::Liberal
                if purity >= self.params.purity && count > self.params.liberal_min_overlap =>
            {
                stats.liberal_add += 1;
                Vote::FastPath(winner)
            }
            _ => Vote::Candidate(winner),
        }
    }
}

fn check_shape(labels: &LabelArray, bbox: &BoundingBox) -> Result<()> {
    if labels.dim() != bbox.shape() {
        return Err(LabelError::Other(format!(
            "label stack shape {:?} does not match region {} (expected {:?})",
            labels.dim(),
            bbox,
            bbox.shape()
        )));
    }
    Ok(())
}

fn crop<'a>(labels: &'a LabelArray, bbox: &BoundingBox, overlap: &BoundingBox) -> ArrayView3<'a, u64> {
    use calclabels_common::Axis;
    let z = bbox.local_range(overlap, Axis::Z);
    let y = bbox.local_range(overlap, Axis::Y);
    let x = bbox.local_range(overlap, Axis::X);
    labels.slice(s![z, y, x])
}

/// Nonzero bodies in the midpoint plane of the touching axes
fn plane_bodies(labels: ArrayView3<'_, u64>, axes: AxisSet) -> HashSet<u64> {
    let mut ranges = [0..labels.dim().0, 0..labels.dim().1, 0..labels.dim().2];
    for axis in axes.iter() {
        let dim = axis.array_dim();
        let mid = ranges[dim].end / 2;
        ranges[dim] = mid..mid + 1;
    }
    let [z, y, x] = ranges;
    labels
        .slice(s![z, y, x])
        .iter()
        .copied()
        .filter(|&label| label != 0)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use calclabels_common::Axis;
    use ndarray::Array3;

    fn engine(mode: StitchMode) -> StitchEngine {
        StitchEngine::new(mode, StitchParams::default())
    }

    fn region(shape: (usize, usize, usize)) -> BoundingBox {
        BoundingBox::new(0, 0, 0, shape.2 as i64, shape.1 as i64, shape.0 as i64)
    }

    fn run(engine: &StitchEngine, a: &LabelArray, b: &LabelArray, axis: Axis) -> StitchOutcome {
        let bbox = region(a.dim());
        engine
            .stitch(a, &bbox, b, &bbox, AxisSet::single(axis))
            .unwrap()
    }

    #[test]
    fn test_full_overlap_slice_merges() {
        // 4x4x1 boundary slice, every voxel is body 7 in A and body 9 in B
        let a = Array3::from_elem((1, 4, 4), 7u64);
        let b = Array3::from_elem((1, 4, 4), 9u64);
        let params = StitchParams {
            min_overlap: 16,
            ..StitchParams::default()
        };

        for mode in [StitchMode::Standard, StitchMode::Liberal] {
            let outcome = run(&StitchEngine::new(mode, params), &a, &b, Axis::Z);
            assert_eq!(outcome.merges, vec![[7, 9]]);
        }

        let disabled = run(&StitchEngine::new(StitchMode::Disabled, params), &a, &b, Axis::Z);
        assert!(disabled.merges.is_empty());
        assert_eq!(disabled.stats.small_overlap_prune, 2);
    }

    #[test]
    fn test_default_lower_bound() {
        let thin_a = Array3::from_elem((1, 4, 4), 7u64);
        let thin_b = Array3::from_elem((1, 4, 4), 9u64);
        let outcome = run(&engine(StitchMode::Standard), &thin_a, &thin_b, Axis::Z);
        assert!(outcome.merges.is_empty());
        assert_eq!(outcome.stats.small_overlap_prune, 2);

        let slab_a = Array3::from_elem((8, 4, 4), 7u64);
        let slab_b = Array3::from_elem((8, 4, 4), 9u64);
        let outcome = run(&engine(StitchMode::Standard), &slab_a, &slab_b, Axis::X);
        assert_eq!(outcome.merges, vec![[7, 9]]);
    }

    #[test]
    fn test_conservative_prunes_impure_overlap() {
        // B body 9 is split evenly between A bodies 7 and 8
        let a = Array3::from_shape_fn((1, 10, 20), |(_, _, x)| if x < 10 { 7 } else { 8 });
        let b = Array3::from_elem((1, 10, 20), 9u64);

        let conservative = run(&engine(StitchMode::Conservative), &a, &b, Axis::Z);
        assert!(conservative.merges.is_empty());
        assert_eq!(conservative.stats.conservative_prune, 1);

        let standard = run(&engine(StitchMode::Standard), &a, &b, Axis::Z);
        assert_eq!(standard.merges, vec![[7, 9]]);
    }

    fn liberal_fixture() -> (LabelArray, LabelArray) {
        // B: body 9 for x < 25 (1575 voxels), body 10 beyond (3150 voxels)
        // A: body 8 covers 75 voxels of 9's footprint, body 7 the rest
        let a = Array3::from_shape_fn((1, 63, 75), |(_, y, x)| if y < 3 && x < 25 { 8 } else { 7 });
        let b = Array3::from_shape_fn((1, 63, 75), |(_, _, x)| if x < 25 { 9 } else { 10 });
        (a, b)
    }

    #[test]
    fn test_liberal_fast_path_ignores_reciprocal_vote() {
        let (a, b) = liberal_fixture();
        // 9 -> 7 has 1500 voxels at purity ~0.95, while 7 itself votes for 10
        let outcome = run(&engine(StitchMode::Liberal), &a, &b, Axis::Z);
        assert_eq!(outcome.merges, vec![[7, 9], [7, 10]]);
        assert_eq!(outcome.stats.liberal_add, 2);
        assert_eq!(outcome.stats.not_mutual, 1);
    }

    #[test]
    fn test_standard_requires_mutual_choice() {
        let (a, b) = liberal_fixture();
        let outcome = run(&engine(StitchMode::Standard), &a, &b, Axis::Z);
        assert_eq!(outcome.merges, vec![[7, 10]]);
    }

    #[test]
    fn test_background_never_merges() {
        let a = Array3::from_shape_fn((8, 4, 4), |(z, _, _)| if z < 4 { 0 } else { 5 });
        let b = Array3::from_shape_fn((8, 4, 4), |(z, _, _)| if z < 4 { 0 } else { 6 });
        let outcome = run(&engine(StitchMode::Standard), &a, &b, Axis::Y);
        assert!(outcome.merges.iter().all(|pair| !pair.contains(&0)));
        assert!(outcome.merges.is_empty());
    }

    #[test]
    fn test_crops_to_shared_overlap() {
        // A covers x in [0, 12), B covers x in [8, 20); they share x in [8, 12)
        let bbox_a = BoundingBox::new(0, 0, 0, 12, 4, 1);
        let bbox_b = BoundingBox::new(8, 0, 0, 20, 4, 1);
        let a = Array3::from_shape_fn((1, 4, 12), |(_, _, x)| if x >= 8 { 7 } else { 1 });
        let b = Array3::from_shape_fn((1, 4, 12), |(_, _, x)| if x < 4 { 9 } else { 2 });
        let engine = StitchEngine::new(
            StitchMode::Standard,
            StitchParams {
                min_overlap: 16,
                ..StitchParams::default()
            },
        );
        let outcome = engine
            .stitch(&a, &bbox_a, &b, &bbox_b, AxisSet::single(Axis::X))
            .unwrap();
        assert_eq!(outcome.merges, vec![[7, 9]]);
    }

    #[test]
    fn test_disjoint_regions_propose_nothing() {
        // touching cores without a halo share no voxel
        let bbox_a = BoundingBox::new(0, 0, 0, 10, 10, 10);
        let bbox_b = BoundingBox::new(10, 0, 0, 20, 10, 10);
        let a = Array3::from_elem((10, 10, 10), 7u64);
        let b = Array3::from_elem((10, 10, 10), 9u64);
        for mode in [StitchMode::Disabled, StitchMode::Standard, StitchMode::Liberal] {
            let outcome = engine(mode)
                .stitch(&a, &bbox_a, &b, &bbox_b, AxisSet::single(Axis::X))
                .unwrap();
            assert_eq!(outcome, StitchOutcome::default());
        }
    }

    #[test]
    fn test_shape_mismatch_is_rejected() {
        let a = Array3::from_elem((1, 4, 4), 7u64);
        let bbox = BoundingBox::new(0, 0, 0, 5, 4, 1);
        assert!(engine(StitchMode::Standard)
            .stitch(&a, &bbox, &a, &bbox, AxisSet::single(Axis::X))
            .is_err());
    }

    #[test]
    fn test_mode_from_int() {
        assert_eq!(StitchMode::try_from(3).unwrap(), StitchMode::Liberal);
        assert!(StitchMode::try_from(4).is_err());
    }
}
