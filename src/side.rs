//! Enumeration of the `2*D` faces of a D-cube, and the `2^k` orthants of a
//! k-dimensional subdivision (used both for a patch's `2^D` children and for
//! the `2^(D-1)` positions a finer neighbor can occupy on one face).
//!
//! `D` is carried as a runtime rank rather than a const generic parameter;
//! see the dimension-genericity note in `DESIGN.md`.

use std::fmt;

/// One of the `2*rank` faces of a `rank`-dimensional patch.
///
/// Sides are indexed `0..2*rank`, with `axis = index / 2` and
/// `is_lower = index % 2 == 0`. This matches the source library's
/// `Side<D>::toInt()` / axis-pair convention (e.g. in 2D: west=0, east=1,
/// south=2, north=3).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct Side {
    rank: usize,
    index: usize,
}

impl Side {
    /// Construct the side with the given index on a patch of the given rank.
    pub fn new(rank: usize, index: usize) -> Self {
        assert!(index < 2 * rank, "side index {} out of range for rank {}", index, rank);
        Self { rank, index }
    }

    /// The lower side on the given axis (`axis * 2`).
    pub fn lower(rank: usize, axis: usize) -> Self {
        Self::new(rank, axis * 2)
    }

    /// The upper side on the given axis (`axis * 2 + 1`).
    pub fn upper(rank: usize, axis: usize) -> Self {
        Self::new(rank, axis * 2 + 1)
    }

    /// All `2*rank` sides of a patch of the given rank, in index order.
    pub fn values(rank: usize) -> impl Iterator<Item = Side> {
        (0..2 * rank).map(move |index| Side { rank, index })
    }

    pub fn rank(self) -> usize {
        self.rank
    }

    pub fn index(self) -> usize {
        self.index
    }

    pub fn axis(self) -> usize {
        self.index / 2
    }

    pub fn is_lower(self) -> bool {
        self.index % 2 == 0
    }

    pub fn is_upper(self) -> bool {
        !self.is_lower()
    }

    /// The side directly across the patch on the same axis.
    pub fn opposite(self) -> Self {
        Self { rank: self.rank, index: self.index ^ 1 }
    }

    /// `+1` on the lower side, `-1` on the upper side: the direction, along
    /// this side's axis, that points from the boundary into the patch interior.
    pub fn inward_sign(self) -> i64 {
        if self.is_lower() {
            1
        } else {
            -1
        }
    }
}

impl fmt::Debug for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Side(axis={}, {})", self.axis(), if self.is_lower() { "lower" } else { "upper" })
    }
}

/// One of the `2^rank` orthants of a `rank`-dimensional subdivision.
///
/// Used at `rank = D` to identify a patch's child among its `2^D` children
/// (`oct_on_parent`), and at `rank = D - 1` to identify which quadrant of a
/// coarse face a finer neighbor occupies.
#[derive(Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Orthant {
    rank: usize,
    index: usize,
}

impl Orthant {
    pub fn new(rank: usize, index: usize) -> Self {
        assert!(index < 1 << rank, "orthant index {} out of range for rank {}", index, rank);
        Self { rank, index }
    }

    /// All `2^rank` orthants, in index order.
    pub fn values(rank: usize) -> impl Iterator<Item = Orthant> {
        (0..1usize << rank).map(move |index| Orthant { rank, index })
    }

    pub fn rank(self) -> usize {
        self.rank
    }

    pub fn index(self) -> usize {
        self.index
    }

    /// Whether this orthant is on the upper half along the given axis
    /// (`0..rank`) of the subdivision.
    pub fn is_upper_on_axis(self, axis: usize) -> bool {
        assert!(axis < self.rank);
        (self.index >> axis) & 1 == 1
    }
}

impl fmt::Debug for Orthant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Orthant(rank={}, index={})", self.rank, self.index)
    }
}
