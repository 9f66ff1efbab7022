//! Substacks and the records exchanged between pipeline stages

use crate::geometry::{Axis, AxisSet, BoundingBox};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One partition of the volume: a core region plus a symmetric halo
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Substack {
    /// Dense id, stable for the lifetime of a run
    pub id: usize,
    /// Core region, halo excluded
    pub region: BoundingBox,
    /// Halo radius applied on every side when reading or writing
    pub border: i64,
    /// Working directory owned by the job runner
    pub work_dir: PathBuf,
    /// Global id offset, assigned once after segmentation
    pub id_offset: Option<u64>,
    /// Number of stitch partners this substack owns
    pub stitch_count: usize,
}

impl Substack {
    #[must_use]
    pub fn new(id: usize, region: BoundingBox, border: i64) -> Self {
        Self {
            id,
            region,
            border,
            work_dir: PathBuf::new(),
            id_offset: None,
            stitch_count: 0,
        }
    }

    /// Place this substack's working directory under `base`
    pub fn assign_work_dir(&mut self, base: &Path) {
        self.work_dir = base.join(self.id.to_string());
    }

    /// Core region grown by the halo
    #[must_use]
    pub fn halo_region(&self) -> BoundingBox {
        self.region.expand(self.border)
    }

    /// Axes on which the two core regions touch exactly (end of one == start of other)
    #[must_use]
    pub fn touching_axes(&self, other: &Substack) -> AxisSet {
        let mut axes = AxisSet::empty();
        for axis in Axis::ALL {
            let (a1, a2) = self.region.interval(axis);
            let (b1, b2) = other.region.interval(axis);
            if a2 == b1 || b2 == a1 {
                axes.insert(axis);
            }
        }
        axes
    }

    /// Path of a file inside the working directory
    #[must_use]
    pub fn work_file(&self, name: &str) -> PathBuf {
        self.work_dir.join(name)
    }
}

/// Unordered pair of face-adjacent substacks that need stitching
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjacencyPair {
    /// Lower substack id; owns the stitch job and its output
    pub owner: usize,
    pub neighbor: usize,
    /// Axes on which the core regions touch
    pub axes: AxisSet,
}

/// Merges proposed by one stitch job, in each substack's local label space
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalMergeProposal {
    pub owner: usize,
    pub neighbor: usize,
    /// `(owner body, neighbor body)` pairs
    pub merges: Vec<[u64; 2]>,
}
