//! Grid partitioning of a bounding box into substacks

use calclabels_common::{Axis, BoundingBox, LabelError, Result, Substack};
use tracing::{debug, info};

/// Smallest trailing partition allowed along an axis (raised to the halo width if larger)
pub const MIN_LEFTOVER: u64 = 50;

/// Number of partitions along an axis of length `total_span`
///
/// The trailing partition is never narrower than `min_allowed` unless it is the
/// only partition; a smaller remainder is absorbed by the last full partition.
#[must_use]
pub fn num_divs(total_span: u64, substack_span: u64, min_allowed: u64) -> u64 {
    let mut num = total_span / substack_span;
    let rem = total_span % substack_span;
    if num == 0 || rem >= min_allowed {
        num += 1;
    }
    num
}

/// Where the substack regions come from
#[derive(Debug, Clone)]
pub enum SubstackSource {
    /// Regular grid over a bounding box
    Grid(BoundingBox),
    /// Pre-computed core regions, taken in the given order
    Explicit(Vec<BoundingBox>),
}

/// Splits a volume into substacks with a uniform halo
#[derive(Debug, Clone)]
pub struct Partitioner {
    job_size: u64,
    overlap_size: u64,
}

impl Partitioner {
    /// Create a partitioner with the target substack span and total overlap between neighbors
    pub fn new(job_size: u64, overlap_size: u64) -> Result<Self> {
        if job_size == 0 {
            return Err(LabelError::Partition("job size must be positive".to_string()));
        }
        Ok(Self {
            job_size,
            overlap_size,
        })
    }

    #[must_use]
    pub fn job_size(&self) -> u64 {
        self.job_size
    }

    /// Halo applied on each side of a substack
    #[must_use]
    pub fn border(&self) -> i64 {
        (self.overlap_size / 2) as i64
    }

    /// Minimum trailing partition width
    #[must_use]
    pub fn min_allowed(&self) -> u64 {
        MIN_LEFTOVER.max(self.overlap_size)
    }

    /// Build substacks from either source
    pub fn partition(&self, source: &SubstackSource) -> Result<Vec<Substack>> {
        match source {
            SubstackSource::Grid(bbox) => self.grid(bbox),
            SubstackSource::Explicit(regions) => self.from_regions(regions),
        }
    }

    /// Partition `bbox` on a regular grid, ids assigned in x, y, z nested order
    pub fn grid(&self, bbox: &BoundingBox) -> Result<Vec<Substack>> {
        if bbox.is_degenerate() {
            return Err(LabelError::Partition(format!(
                "bounding box {bbox} has zero extent"
            )));
        }

        let cuts: Vec<Vec<(i64, i64)>> = Axis::ALL
            .into_iter()
            .map(|axis| self.axis_cuts(bbox, axis))
            .collect();

        let mut substacks = Vec::with_capacity(cuts[0].len() * cuts[1].len() * cuts[2].len());
        for &(x1, x2) in &cuts[0] {
            for &(y1, y2) in &cuts[1] {
                for &(z1, z2) in &cuts[2] {
                    let region = BoundingBox::new(x1, y1, z1, x2, y2, z2);
                    substacks.push(Substack::new(substacks.len(), region, self.border()));
                }
            }
        }

        info!(
            "Partitioned {} into {} substacks ({}x{}x{}), border {}",
            bbox,
            substacks.len(),
            cuts[0].len(),
            cuts[1].len(),
            cuts[2].len(),
            self.border()
        );
        Ok(substacks)
    }

    /// Accept pre-computed core regions, which must be non-empty and pairwise disjoint
    pub fn from_regions(&self, regions: &[BoundingBox]) -> Result<Vec<Substack>> {
        if regions.is_empty() {
            return Err(LabelError::Partition("no substack regions given".to_string()));
        }
        for (i, region) in regions.iter().enumerate() {
            if region.is_degenerate() {
                return Err(LabelError::Partition(format!(
                    "substack region {i} {region} has zero extent"
                )));
            }
            if let Some(j) = regions[..i]
                .iter()
                .position(|other| other.intersection(region).is_some())
            {
                return Err(LabelError::Partition(format!(
                    "substack regions {j} and {i} overlap"
                )));
            }
        }

        debug!("Using {} explicit substack regions", regions.len());
        Ok(regions
            .iter()
            .enumerate()
            .map(|(id, region)| Substack::new(id, *region, self.border()))
            .collect())
    }

    fn axis_cuts(&self, bbox: &BoundingBox, axis: Axis) -> Vec<(i64, i64)> {
        let (lo, hi) = bbox.interval(axis);
        let span = self.job_size as i64;
        let num = num_divs(bbox.span(axis), self.job_size, self.min_allowed()) as i64;
        (0..num)
            .map(|i| {
                let start = lo + i * span;
                let end = if i == num - 1 { hi } else { start + span };
                (start, end)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_exact_cover(bbox: &BoundingBox, substacks: &[Substack]) {
        let total: u64 = substacks.iter().map(|s| s.region.voxel_count()).sum();
        assert_eq!(total, bbox.voxel_count());
        for (i, a) in substacks.iter().enumerate() {
            assert_eq!(
                bbox.intersection(&a.region),
                Some(a.region),
                "{} escapes {}",
                a.region,
                bbox
            );
            for b in &substacks[i + 1..] {
                assert!(a.region.intersection(&b.region).is_none());
            }
        }
    }

    #[test]
    fn test_num_divs_single_span() {
        for min_allowed in [1, 50, 100, 500] {
            assert_eq!(num_divs(500, 500, min_allowed), 1);
        }
    }

    #[test]
    fn test_num_divs_remainder() {
        // remainder large enough for its own partition
        assert_eq!(num_divs(1060, 500, 50), 3);
        // small remainder is absorbed
        assert_eq!(num_divs(1020, 500, 50), 2);
        // span smaller than a job is one partition
        assert_eq!(num_divs(30, 500, 50), 1);
    }

    #[test]
    fn test_grid_covers_bbox_exactly() {
        let partitioner = Partitioner::new(100, 40).unwrap();
        for bbox in [
            BoundingBox::new(0, 0, 0, 100, 100, 100),
            BoundingBox::new(10, 20, 30, 333, 251, 130),
            BoundingBox::new(-50, 0, 0, 260, 80, 420),
        ] {
            let substacks = partitioner.grid(&bbox).unwrap();
            assert_exact_cover(&bbox, &substacks);
        }
    }

    #[test]
    fn test_grid_trailing_partition_absorbs_small_remainder() {
        let partitioner = Partitioner::new(100, 40).unwrap();
        let bbox = BoundingBox::new(0, 0, 0, 230, 100, 100);
        let substacks = partitioner.grid(&bbox).unwrap();
        assert_eq!(substacks.len(), 2);
        assert_eq!(substacks[0].region.interval(Axis::X), (0, 100));
        assert_eq!(substacks[1].region.interval(Axis::X), (100, 230));
    }

    #[test]
    fn test_grid_ids_follow_xyz_order() {
        let partitioner = Partitioner::new(100, 40).unwrap();
        let bbox = BoundingBox::new(0, 0, 0, 200, 200, 200);
        let substacks = partitioner.grid(&bbox).unwrap();
        assert_eq!(substacks.len(), 8);
        assert_eq!(substacks[1].region.start(), [0, 0, 100]);
        assert_eq!(substacks[2].region.start(), [0, 100, 0]);
        assert_eq!(substacks[4].region.start(), [100, 0, 0]);
        assert!(substacks.iter().enumerate().all(|(i, s)| s.id == i));
        assert!(substacks.iter().all(|s| s.border == 20));
    }

    #[test]
    fn test_min_allowed_raised_to_overlap() {
        assert_eq!(Partitioner::new(500, 40).unwrap().min_allowed(), 50);
        assert_eq!(Partitioner::new(500, 80).unwrap().min_allowed(), 80);
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(Partitioner::new(0, 40).is_err());
        let partitioner = Partitioner::new(100, 40).unwrap();
        assert!(partitioner
            .grid(&BoundingBox::new(0, 0, 0, 100, 0, 100))
            .is_err());
        assert!(partitioner.from_regions(&[]).is_err());
    }

    #[test]
    fn test_explicit_regions() {
        let partitioner = Partitioner::new(100, 40).unwrap();
        let regions = vec![
            BoundingBox::new(0, 0, 0, 64, 64, 64),
            BoundingBox::new(64, 0, 0, 128, 64, 64),
        ];
        let substacks = partitioner
            .partition(&SubstackSource::Explicit(regions.clone()))
            .unwrap();
        assert_eq!(substacks.len(), 2);
        assert_eq!(substacks[1].id, 1);
        assert_eq!(substacks[1].region, regions[1]);

        let overlapping = vec![regions[0], BoundingBox::new(32, 0, 0, 96, 64, 64)];
        assert!(partitioner.from_regions(&overlapping).is_err());
    }
}
