//! A Hilbert-space-like vector over a rank's local patches: the thing
//! Krylov solvers and the multigrid smoothers actually operate on.
//!
//! Grounded directly on the source library's `Vector<D>` (axpy family,
//! norms and dot products reduced with `MPI_Allreduce`), reimplemented
//! against this crate's [`Communicator`] instead of a real MPI binding.

use std::sync::Arc;

use rayon::prelude::*;

use crate::comm::{all_reduce_max, all_reduce_sum, Communicator};
use crate::local_data::{allocate_patch_storage, nested_indices, LocalData};
use crate::patch_info::PatchInfo;

/// A vector of patch-local, possibly multi-component, cell data, with
/// ghost layers for the operators and ghost fillers that need them.
#[derive(Clone)]
pub struct Vector {
    comm: Arc<dyn Communicator>,
    num_components: usize,
    num_ghost: usize,
    patch_ids: Vec<u64>,
    locals: Vec<Vec<LocalData>>,
}

impl Vector {
    /// Allocate a zeroed vector with one entry per patch in `patch_infos`,
    /// `num_components` fields per cell, and `num_ghost` ghost layers.
    pub fn zeros(
        comm: Arc<dyn Communicator>,
        patch_infos: &[PatchInfo],
        num_components: usize,
        num_ghost: usize,
    ) -> Self {
        let mut patch_ids = Vec::with_capacity(patch_infos.len());
        let mut locals = Vec::with_capacity(patch_infos.len());
        for pinfo in patch_infos {
            patch_ids.push(pinfo.id);
            let mut per_component = Vec::with_capacity(num_components);
            for _ in 0..num_components {
                let (store, base, strides) = allocate_patch_storage(&pinfo.ns, num_ghost);
                per_component.push(LocalData::new(store, base, strides, pinfo.ns.clone()));
            }
            locals.push(per_component);
        }
        Vector { comm, num_components, num_ghost, patch_ids, locals }
    }

    /// Allocate a new zeroed vector with the same layout as `self`.
    pub fn like_zeros(&self) -> Self {
        let mut locals = Vec::with_capacity(self.locals.len());
        for per_component in &self.locals {
            let mut fresh = Vec::with_capacity(per_component.len());
            for ld in per_component {
                let (store, base, strides) = allocate_patch_storage(ld.lengths(), self.num_ghost);
                fresh.push(LocalData::new(store, base, strides, ld.lengths().to_vec()));
            }
            locals.push(fresh);
        }
        Vector {
            comm: self.comm.clone(),
            num_components: self.num_components,
            num_ghost: self.num_ghost,
            patch_ids: self.patch_ids.clone(),
            locals,
        }
    }

    pub fn communicator(&self) -> &Arc<dyn Communicator> {
        &self.comm
    }

    pub fn num_components(&self) -> usize {
        self.num_components
    }

    pub fn num_ghost(&self) -> usize {
        self.num_ghost
    }

    pub fn num_local_patches(&self) -> usize {
        self.patch_ids.len()
    }

    pub fn patch_ids(&self) -> &[u64] {
        &self.patch_ids
    }

    pub fn local_index_of(&self, patch_id: u64) -> Option<usize> {
        self.patch_ids.iter().position(|&id| id == patch_id)
    }

    pub fn local_data(&self, local_patch_index: usize, component: usize) -> &LocalData {
        &self.locals[local_patch_index][component]
    }

    /// Apply `f` to every scalar in every component of every local patch.
    fn for_each_mut<F: Fn(f64) -> f64>(&self, f: F) {
        for per_component in &self.locals {
            for ld in per_component {
                for coord in ld.iter_coords() {
                    ld.set(&coord, f(ld.get(&coord)));
                }
            }
        }
    }

    /// Apply `f(self_value, other_value)` elementwise, writing the result
    /// back into `self`. Panics if `other` does not share this vector's
    /// patch layout.
    fn zip_mut<F: Fn(f64, f64) -> f64>(&self, other: &Vector, f: F) {
        assert_eq!(self.locals.len(), other.locals.len(), "vector patch count mismatch");
        for (mine, theirs) in self.locals.iter().zip(&other.locals) {
            for (a, b) in mine.iter().zip(theirs) {
                for coord in a.iter_coords() {
                    a.set(&coord, f(a.get(&coord), b.get(&coord)));
                }
            }
        }
    }

    /// Folded per patch in parallel (patches are independent, and this is
    /// the one place a whole-vector op is actually reduction-shaped rather
    /// than elementwise), then combined sequentially.
    fn local_fold<F: Fn(f64, f64) -> f64 + Sync>(&self, init: f64, f: &F) -> f64 {
        self.locals
            .par_iter()
            .map(|per_component| {
                per_component.iter().fold(init, |acc, ld| {
                    ld.iter_coords().fold(acc, |acc, coord| f(acc, ld.get(&coord)))
                })
            })
            .reduce(|| init, |a, b| f(a, b))
    }

    /// Set every entry to `value`.
    pub fn set(&self, value: f64) {
        self.for_each_mut(|_| value);
    }

    /// Multiply every entry by `alpha`.
    pub fn scale(&self, alpha: f64) {
        self.for_each_mut(|x| x * alpha);
    }

    /// Add `alpha` to every entry.
    pub fn shift(&self, alpha: f64) {
        self.for_each_mut(|x| x + alpha);
    }

    /// `self <- other`.
    pub fn copy_from(&self, other: &Vector) {
        self.zip_mut(other, |_, b| b);
    }

    /// `self <- self + other`.
    pub fn add(&self, other: &Vector) {
        self.zip_mut(other, |a, b| a + b);
    }

    /// `self <- self + alpha * other`.
    pub fn add_scaled(&self, alpha: f64, other: &Vector) {
        self.zip_mut(other, move |a, b| a + alpha * b);
    }

    /// `self <- alpha * self + other`.
    pub fn scale_then_add(&self, alpha: f64, other: &Vector) {
        self.zip_mut(other, move |a, b| alpha * a + b);
    }

    /// `self <- alpha * self + beta * other`.
    pub fn scale_then_add_scaled(&self, alpha: f64, beta: f64, other: &Vector) {
        self.zip_mut(other, move |a, b| alpha * a + beta * b);
    }

    /// Global (all-rank) dot product `<self, other>`. The per-patch partial
    /// sums are independent, so they're folded across rank-local patches in
    /// parallel before the single cross-rank reduction.
    pub fn dot(&self, other: &Vector) -> f64 {
        assert_eq!(self.locals.len(), other.locals.len(), "vector patch count mismatch");
        let local: f64 = self
            .locals
            .par_iter()
            .zip(other.locals.par_iter())
            .map(|(mine, theirs)| {
                mine.iter()
                    .zip(theirs)
                    .map(|(a, b)| a.iter_coords().map(|coord| a.get(&coord) * b.get(&coord)).sum::<f64>())
                    .sum::<f64>()
            })
            .sum();
        all_reduce_sum(self.comm.as_ref(), local)
    }

    /// Global Euclidean (L2) norm.
    pub fn two_norm(&self) -> f64 {
        self.dot(self).sqrt()
    }

    /// Global infinity (max-abs) norm.
    pub fn inf_norm(&self) -> f64 {
        let local_max = self.local_fold(0.0, &|acc, x| acc.max(x.abs()));
        all_reduce_max(self.comm.as_ref(), local_max)
    }

    /// Fill every local entry of `component` from a function of physical
    /// position, given each patch's lower corner and spacing. Used by
    /// reference mesh builders and tests, not by the solvers themselves.
    pub fn fill_from_fn(
        &self,
        component: usize,
        patch_infos: &[PatchInfo],
        f: impl Fn(&[f64]) -> f64,
    ) {
        for (local_idx, pinfo) in patch_infos.iter().enumerate() {
            let ld = &self.locals[local_idx][component];
            for coord in nested_indices(&pinfo.ns) {
                let mut pos = vec![0.0; pinfo.spatial_rank];
                for axis in 0..pinfo.spatial_rank {
                    pos[axis] =
                        pinfo.starts[axis] + (coord[axis] as f64 + 0.5) * pinfo.spacings[axis];
                }
                ld.set(&coord, f(&pos));
            }
        }
    }
}

/// Produces fresh, zeroed vectors sharing a patch layout — the allocator
/// Krylov solvers and multigrid levels use for their scratch vectors.
pub trait VectorGenerator {
    fn new_vector(&self) -> Vector;
}

/// The common case: a generator tied to one fixed set of local patches.
pub struct PatchVectorGenerator {
    comm: Arc<dyn Communicator>,
    patch_infos: Vec<PatchInfo>,
    num_components: usize,
    num_ghost: usize,
}

impl PatchVectorGenerator {
    pub fn new(
        comm: Arc<dyn Communicator>,
        patch_infos: Vec<PatchInfo>,
        num_components: usize,
        num_ghost: usize,
    ) -> Self {
        PatchVectorGenerator { comm, patch_infos, num_components, num_ghost }
    }

    pub fn patch_infos(&self) -> &[PatchInfo] {
        &self.patch_infos
    }
}

impl VectorGenerator for PatchVectorGenerator {
    fn new_vector(&self) -> Vector {
        Vector::zeros(self.comm.clone(), &self.patch_infos, self.num_components, self.num_ghost)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::comm::ThreadCommunicator;

    fn single_patch_infos() -> Vec<PatchInfo> {
        vec![PatchInfo::new(0, 0, 0, vec![4, 4], vec![0.0, 0.0], vec![0.25, 0.25], 1)]
    }

    #[test]
    fn scale_then_add_matches_hand_computation() {
        let comm = ThreadCommunicator::world(1).remove(0);
        let infos = single_patch_infos();
        let a = Vector::zeros(comm.clone(), &infos, 1, 1);
        let b = Vector::zeros(comm.clone(), &infos, 1, 1);
        a.set(2.0);
        b.set(3.0);
        a.scale_then_add_scaled(2.0, 5.0, &b);
        // 2*2 + 5*3 = 19 everywhere
        for coord in a.local_data(0, 0).iter_coords() {
            assert_eq!(a.local_data(0, 0).get(&coord), 19.0);
        }
    }

    #[test]
    fn two_norm_of_constant_vector() {
        let comm = ThreadCommunicator::world(1).remove(0);
        let infos = single_patch_infos();
        let v = Vector::zeros(comm, &infos, 1, 0);
        v.set(2.0);
        // 16 cells at value 2.0 -> norm = sqrt(16*4) = 8
        assert_eq!(v.two_norm(), 8.0);
    }

    #[test]
    fn inf_norm_picks_largest_magnitude() {
        let comm = ThreadCommunicator::world(1).remove(0);
        let infos = single_patch_infos();
        let v = Vector::zeros(comm, &infos, 1, 0);
        v.set(-3.0);
        assert_eq!(v.inf_norm(), 3.0);
    }

    #[test]
    fn like_zeros_preserves_layout_but_not_values() {
        let comm = ThreadCommunicator::world(1).remove(0);
        let infos = single_patch_infos();
        let v = Vector::zeros(comm, &infos, 1, 1);
        v.set(7.0);
        let w = v.like_zeros();
        assert_eq!(w.two_norm(), 0.0);
        assert_eq!(w.num_local_patches(), v.num_local_patches());
    }
}
