//! Voxel-space geometry: half-open bounding boxes and coordinate axes

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;

/// A coordinate axis of the volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    /// Dimension index of this axis in a `(z, y, x)` label array
    #[must_use]
    pub fn array_dim(self) -> usize {
        match self {
            Self::X => 2,
            Self::Y => 1,
            Self::Z => 0,
        }
    }

    #[must_use]
    pub fn letter(self) -> char {
        match self {
            Self::X => 'x',
            Self::Y => 'y',
            Self::Z => 'z',
        }
    }

    fn bit(self) -> u8 {
        match self {
            Self::X => 0b001,
            Self::Y => 0b010,
            Self::Z => 0b100,
        }
    }
}

/// Set of axes, serialized as a letter string such as `"x"` or `"xz"`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct AxisSet(u8);

impl AxisSet {
    #[must_use]
    pub fn empty() -> Self {
        Self(0)
    }

    #[must_use]
    pub fn single(axis: Axis) -> Self {
        Self(axis.bit())
    }

    pub fn insert(&mut self, axis: Axis) {
        self.0 |= axis.bit();
    }

    #[must_use]
    pub fn contains(&self, axis: Axis) -> bool {
        self.0 & axis.bit() != 0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Axis> + '_ {
        Axis::ALL.into_iter().filter(|axis| self.contains(*axis))
    }
}

impl fmt::Display for AxisSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for axis in self.iter() {
            write!(f, "{}", axis.letter())?;
        }
        Ok(())
    }
}

impl From<AxisSet> for String {
    fn from(set: AxisSet) -> Self {
        set.to_string()
    }
}

impl TryFrom<String> for AxisSet {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let mut set = AxisSet::empty();
        for c in value.chars() {
            match c.to_ascii_lowercase() {
                'x' => set.insert(Axis::X),
                'y' => set.insert(Axis::Y),
                'z' => set.insert(Axis::Z),
                other => return Err(format!("unknown axis '{other}'")),
            }
        }
        Ok(set)
    }
}

/// Half-open 3D box `[x1, x2) x [y1, y2) x [z1, z2)`
///
/// Serialized with the corner keys used throughout the job configs:
/// `{"bbox1": [x1, y1, z1], "bbox2": [x2, y2, z2]}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Corners", into = "Corners")]
pub struct BoundingBox {
    pub x1: i64,
    pub y1: i64,
    pub z1: i64,
    pub x2: i64,
    pub y2: i64,
    pub z2: i64,
}

#[derive(Serialize, Deserialize)]
struct Corners {
    bbox1: [i64; 3],
    bbox2: [i64; 3],
}

impl From<Corners> for BoundingBox {
    fn from(c: Corners) -> Self {
        BoundingBox::from_corners(c.bbox1, c.bbox2)
    }
}

impl From<BoundingBox> for Corners {
    fn from(b: BoundingBox) -> Self {
        Corners {
            bbox1: b.start(),
            bbox2: b.end(),
        }
    }
}

impl BoundingBox {
    /// Create a box, swapping any axis given in reverse order
    #[must_use]
    pub fn new(x1: i64, y1: i64, z1: i64, x2: i64, y2: i64, z2: i64) -> Self {
        let (x1, x2) = (x1.min(x2), x1.max(x2));
        let (y1, y2) = (y1.min(y2), y1.max(y2));
        let (z1, z2) = (z1.min(z2), z1.max(z2));
        Self {
            x1,
            y1,
            z1,
            x2,
            y2,
            z2,
        }
    }

    #[must_use]
    pub fn from_corners(a: [i64; 3], b: [i64; 3]) -> Self {
        Self::new(a[0], a[1], a[2], b[0], b[1], b[2])
    }

    /// Box at `offset` with extent `size` along x, y, z
    #[must_use]
    pub fn from_offset_size(offset: [i64; 3], size: [u64; 3]) -> Self {
        Self::new(
            offset[0],
            offset[1],
            offset[2],
            offset[0] + size[0] as i64,
            offset[1] + size[1] as i64,
            offset[2] + size[2] as i64,
        )
    }

    #[must_use]
    pub fn start(&self) -> [i64; 3] {
        [self.x1, self.y1, self.z1]
    }

    #[must_use]
    pub fn end(&self) -> [i64; 3] {
        [self.x2, self.y2, self.z2]
    }

    #[must_use]
    pub fn interval(&self, axis: Axis) -> (i64, i64) {
        match axis {
            Axis::X => (self.x1, self.x2),
            Axis::Y => (self.y1, self.y2),
            Axis::Z => (self.z1, self.z2),
        }
    }

    #[must_use]
    pub fn span(&self, axis: Axis) -> u64 {
        let (lo, hi) = self.interval(axis);
        (hi - lo) as u64
    }

    /// Extent along x, y, z
    #[must_use]
    pub fn size(&self) -> [u64; 3] {
        [self.span(Axis::X), self.span(Axis::Y), self.span(Axis::Z)]
    }

    /// Array shape `(z, y, x)` of a label stack covering this box
    #[must_use]
    pub fn shape(&self) -> (usize, usize, usize) {
        (
            self.span(Axis::Z) as usize,
            self.span(Axis::Y) as usize,
            self.span(Axis::X) as usize,
        )
    }

    #[must_use]
    pub fn voxel_count(&self) -> u64 {
        self.size().iter().product()
    }

    /// True when any axis has zero extent
    #[must_use]
    pub fn is_degenerate(&self) -> bool {
        self.size().contains(&0)
    }

    /// Grow the box by `border` voxels on every side
    #[must_use]
    pub fn expand(&self, border: i64) -> Self {
        Self::new(
            self.x1 - border,
            self.y1 - border,
            self.z1 - border,
            self.x2 + border,
            self.y2 + border,
            self.z2 + border,
        )
    }

    /// Intersection of two boxes, `None` if they share no voxel
    #[must_use]
    pub fn intersection(&self, other: &BoundingBox) -> Option<BoundingBox> {
        let mut lo = [0i64; 3];
        let mut hi = [0i64; 3];
        for (i, axis) in Axis::ALL.into_iter().enumerate() {
            let (a1, a2) = self.interval(axis);
            let (b1, b2) = other.interval(axis);
            lo[i] = a1.max(b1);
            hi[i] = a2.min(b2);
            if hi[i] <= lo[i] {
                return None;
            }
        }
        Some(Self::from_corners(lo, hi))
    }

    /// Index range of `inner` along `axis`, relative to this box's origin
    #[must_use]
    pub fn local_range(&self, inner: &BoundingBox, axis: Axis) -> Range<usize> {
        let (origin, _) = self.interval(axis);
        let (lo, hi) = inner.interval(axis);
        (lo - origin) as usize..(hi - origin) as usize
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}, {}) - [{}, {}, {})",
            self.x1, self.y1, self.z1, self.x2, self.y2, self.z2
        )
    }
}
