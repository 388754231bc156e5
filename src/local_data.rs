//! Strided, D-dimensional (runtime-ranked) views over patch-local storage.
//!
//! `LocalData` never owns the values it exposes; several views can alias the
//! same backing store, which is why the store is kept behind `Arc<RwLock<..>>`
//! rather than borrowed with a lifetime — a view legitimately outlives the
//! `Vector` that produced it, as noted in `SPEC_FULL.md` §3.

use std::sync::{Arc, RwLock};

use crate::side::Side;

/// The shared, contiguous backing buffer for one patch's component data.
/// Several `LocalData` views (full patch, face slices, ghost slices) may
/// point into the same `Backing` concurrently.
pub type Backing = Arc<RwLock<Vec<f64>>>;

/// A view over a `rank`-dimensional strided array. Coordinates are `rank`
/// long; index `0` along an axis is the first owned (non-ghost) cell and
/// `lengths[axis] - 1` is the last. Ghost cells are addressed by negative
/// indices or indices `>= lengths[axis]`.
#[derive(Clone)]
pub struct LocalData {
    store: Backing,
    base_offset: i64,
    strides: Vec<i64>,
    lengths: Vec<usize>,
}

impl LocalData {
    /// Construct a view directly. `base_offset` is the flat index, within
    /// `store`, of coordinate `[0; rank]`.
    pub fn new(store: Backing, base_offset: i64, strides: Vec<i64>, lengths: Vec<usize>) -> Self {
        assert_eq!(strides.len(), lengths.len());
        Self { store, base_offset, strides, lengths }
    }

    pub fn rank(&self) -> usize {
        self.lengths.len()
    }

    pub fn lengths(&self) -> &[usize] {
        &self.lengths
    }

    pub fn strides(&self) -> &[i64] {
        &self.strides
    }

    /// The coordinate of the first owned cell (always the origin).
    pub fn start(&self) -> Vec<i64> {
        vec![0; self.rank()]
    }

    /// The coordinate of the last owned cell.
    pub fn end(&self) -> Vec<i64> {
        self.lengths.iter().map(|&n| n as i64 - 1).collect()
    }

    fn flat_index(&self, coord: &[i64]) -> usize {
        assert_eq!(coord.len(), self.rank(), "coordinate rank mismatch");
        let offset: i64 = self.base_offset
            + coord.iter().zip(&self.strides).map(|(c, s)| c * s).sum::<i64>();
        assert!(offset >= 0, "computed a negative flat index, out-of-bounds access");
        offset as usize
    }

    pub fn get(&self, coord: &[i64]) -> f64 {
        let idx = self.flat_index(coord);
        self.store.read().unwrap()[idx]
    }

    pub fn set(&self, coord: &[i64], value: f64) {
        let idx = self.flat_index(coord);
        self.store.write().unwrap()[idx] = value;
    }

    pub fn add_assign(&self, coord: &[i64], delta: f64) {
        let idx = self.flat_index(coord);
        self.store.write().unwrap()[idx] += delta;
    }

    /// Read the value one step along `axis` away from `coord` (`delta` may
    /// be negative); used by star-stencil code that reads a cell's axis
    /// neighbors without materializing a new coordinate vector by hand.
    pub fn get_offset(&self, coord: &[i64], axis: usize, delta: i64) -> f64 {
        let mut shifted = coord.to_vec();
        shifted[axis] += delta;
        self.get(&shifted)
    }

    /// Return a `(rank - 1)`-dimensional view one cell inside the given
    /// side (`offset = 0`), or `offset` cells further inward.
    pub fn slice_on_side(&self, side: Side, offset: i64) -> LocalData {
        assert_eq!(side.rank(), self.rank());
        let axis = side.axis();
        let new_strides: Vec<i64> = self
            .strides
            .iter()
            .enumerate()
            .filter(|&(i, _)| i != axis)
            .map(|(_, &s)| s)
            .collect();
        let new_lengths: Vec<usize> = self
            .lengths
            .iter()
            .enumerate()
            .filter(|&(i, _)| i != axis)
            .map(|(_, &l)| l)
            .collect();
        let new_base = if side.is_lower() {
            self.base_offset + offset * self.strides[axis]
        } else {
            self.base_offset + (self.lengths[axis] as i64 - 1 - offset) * self.strides[axis]
        };
        LocalData::new(self.store.clone(), new_base, new_strides, new_lengths)
    }

    /// Return a `(rank - 1)`-dimensional view `depth` cells (`depth >= 1`)
    /// outside the given side — a ghost layer plane.
    pub fn ghost_slice_on_side(&self, side: Side, depth: i64) -> LocalData {
        assert!(depth >= 1, "ghost slice depth must be >= 1");
        assert_eq!(side.rank(), self.rank());
        let axis = side.axis();
        let new_strides: Vec<i64> = self
            .strides
            .iter()
            .enumerate()
            .filter(|&(i, _)| i != axis)
            .map(|(_, &s)| s)
            .collect();
        let new_lengths: Vec<usize> = self
            .lengths
            .iter()
            .enumerate()
            .filter(|&(i, _)| i != axis)
            .map(|(_, &l)| l)
            .collect();
        let new_base = if side.is_lower() {
            self.base_offset - depth * self.strides[axis]
        } else {
            self.base_offset + (self.lengths[axis] as i64 - 1 + depth) * self.strides[axis]
        };
        LocalData::new(self.store.clone(), new_base, new_strides, new_lengths)
    }

    /// Iterate over every interior coordinate, in row-major (last axis
    /// fastest) order.
    pub fn iter_coords(&self) -> impl Iterator<Item = Vec<i64>> + '_ {
        nested_indices(&self.lengths)
    }
}

/// Iterate every coordinate in `[0, lengths[0]) x ... x [0, lengths[n-1])`,
/// last axis varying fastest. Mirrors the teacher's and the source's
/// `nested_loop` helper.
pub fn nested_indices(lengths: &[usize]) -> impl Iterator<Item = Vec<i64>> + '_ {
    let total: usize = lengths.iter().product();
    (0..total).map(move |mut flat| {
        let mut coord = vec![0i64; lengths.len()];
        for axis in (0..lengths.len()).rev() {
            let n = lengths[axis].max(1);
            coord[axis] = (flat % n) as i64;
            flat /= n;
        }
        coord
    })
}

/// Allocate a fresh, zeroed backing store sized for `lengths` interior
/// cells plus `num_ghost` ghost layers on every side, returning the store
/// together with the base offset and strides a full-patch `LocalData`
/// should use.
pub fn allocate_patch_storage(lengths: &[usize], num_ghost: usize) -> (Backing, i64, Vec<i64>) {
    let rank = lengths.len();
    let padded: Vec<usize> = lengths.iter().map(|&n| n + 2 * num_ghost).collect();
    let mut strides = vec![1i64; rank];
    for axis in (0..rank - 1).rev() {
        strides[axis] = strides[axis + 1] * padded[axis + 1] as i64;
    }
    let total: usize = padded.iter().product();
    let base_offset: i64 = (0..rank).map(|axis| num_ghost as i64 * strides[axis]).sum();
    (Arc::new(RwLock::new(vec![0.0; total])), base_offset, strides)
}

#[cfg(test)]
mod test {
    use super::*;

    fn make_2d(lengths: &[usize], num_ghost: usize) -> LocalData {
        let (store, base, strides) = allocate_patch_storage(lengths, num_ghost);
        LocalData::new(store, base, strides, lengths.to_vec())
    }

    #[test]
    fn coordinates_round_trip() {
        let ld = make_2d(&[4, 3], 1);
        for coord in ld.iter_coords() {
            ld.set(&coord, coord[0] as f64 * 10.0 + coord[1] as f64);
        }
        for coord in ld.iter_coords() {
            assert_eq!(ld.get(&coord), coord[0] as f64 * 10.0 + coord[1] as f64);
        }
    }

    #[test]
    fn slice_on_side_picks_interior_edge() {
        let ld = make_2d(&[4, 4], 1);
        for coord in ld.iter_coords() {
            ld.set(&coord, coord[0] as f64);
        }
        let west = Side::lower(2, 0);
        let slice = ld.slice_on_side(west, 0);
        assert_eq!(slice.rank(), 1);
        for coord in slice.iter_coords() {
            assert_eq!(slice.get(&coord), 0.0);
        }
        let one_in = ld.slice_on_side(west, 1);
        for coord in one_in.iter_coords() {
            assert_eq!(one_in.get(&coord), 1.0);
        }
    }

    #[test]
    fn ghost_slice_is_outside_interior() {
        let ld = make_2d(&[4, 4], 2);
        let west = Side::lower(2, 0);
        let ghost = ld.ghost_slice_on_side(west, 1);
        ghost.set(&[0], 42.0);
        assert_eq!(ld.get_offset(&[0, 0], 0, -1), 42.0);
    }

    #[test]
    fn start_end_invariant_holds() {
        let ld = make_2d(&[5, 7], 1);
        let start = ld.start();
        let end = ld.end();
        for i in 0..ld.rank() {
            assert_eq!(end[i] - start[i] + 1, ld.lengths()[i] as i64);
        }
    }
}
