//! Geometric multigrid: a chain of levels from finest to coarsest, each
//! carrying its own domain, operator and smoother, plus the
//! restriction/interpolation operators that move data between a level and
//! the one below it.
//!
//! Grounded on `examples/original_source/src/ThunderEgg/GMG/Level.h`
//! (the finest/coarsest doubly-linked chain) and `Restrictor.h` (the
//! minimal `restrict(fine, coarse)` interface). `InterLevelComm` supplies
//! the local/ghost-parent classification both directions of transfer need.

use std::collections::HashMap;

use crate::domain::Domain;
use crate::inter_level_comm::InterLevelComm;
use crate::local_data::{allocate_patch_storage, nested_indices, LocalData};
use crate::patch_info::PatchInfo;
use crate::patch_operator::PatchOperator;
use crate::solvers::PatchSolver;
use crate::vector::Vector;

/// Restricts a fine-level vector down onto the coarse level below it.
pub trait Restrictor {
    fn restrict(&self, fine: &Vector, coarse: &Vector);
}

/// Interpolates (prolongs) a coarse-level correction up onto the finer
/// level above it, adding into the fine vector in place.
pub trait Interpolator {
    fn interpolate(&self, coarse: &Vector, fine: &Vector);
}

/// Relaxes `A u = f` towards the true solution on one level, in place.
pub trait Smoother {
    fn smooth(
        &self,
        pinfos: &[PatchInfo],
        operator: &dyn PatchOperator,
        u: &Vector,
        f: &Vector,
        iterations: usize,
    );
}

/// Full-weighting restriction: a fine patch's `2^rank` children average
/// into one coarse cell, moved between ranks with the same
/// [`InterLevelComm`] plumbing the source library uses for inter-level
/// data movement.
pub struct AveragingRestrictor {
    pub ilc: InterLevelComm,
    pub coarse_domain: Domain,
}

impl Restrictor for AveragingRestrictor {
    fn restrict(&self, fine: &Vector, coarse: &Vector) {
        let mut contributions: HashMap<u64, Vec<LocalData>> = HashMap::new();
        for (local_idx, &fine_id) in fine.patch_ids().iter().enumerate() {
            if self.ilc.parent_of(fine_id).is_none() {
                continue;
            }
            let mut per_component = Vec::with_capacity(fine.num_components());
            for c in 0..fine.num_components() {
                let ld = fine.local_data(local_idx, c);
                per_component.push(restrict_one_patch(ld));
            }
            contributions.insert(fine_id, per_component);
        }

        let expected = self.ilc.expected_remote_senders(&self.coarse_domain);

        self.ilc.send_ghost_patches_start().expect("restrict: exchange already in flight");
        self.ilc
            .send_ghost_patches_finish(&self.coarse_domain, coarse, &contributions, expected)
            .expect("restrict: mismatched exchange");
    }
}

fn restrict_one_patch(ld: &LocalData) -> LocalData {
    let coarse_lengths: Vec<usize> = ld.lengths().iter().map(|&n| n / 2).collect();
    let (store, base, strides) = allocate_patch_storage(&coarse_lengths, 0);
    let coarse_ld = LocalData::new(store, base, strides, coarse_lengths.clone());
    let num_children = 1usize << coarse_lengths.len();
    for coarse_coord in nested_indices(&coarse_lengths) {
        let mut sum = 0.0;
        for orthant in 0..num_children {
            let mut fine_coord = coarse_coord.clone();
            for axis in 0..coarse_lengths.len() {
                fine_coord[axis] = fine_coord[axis] * 2 + ((orthant >> axis) & 1) as i64;
            }
            sum += ld.get(&fine_coord);
        }
        coarse_ld.set(&coarse_coord, sum / num_children as f64);
    }
    coarse_ld
}

/// Multilinear prolongation: a fine cell receives `3/4` of its own coarse
/// parent cell's value and `1/4` of the coarse neighbor lying in the
/// direction its position within the parent's `2^rank` block points
/// (cell-centered fine cells sit at `+-1/4` of a coarse cell width from
/// their parent's center), combined per axis by a tensor product. This is
/// the classical cell-centered multigrid prolongation stencil and reduces,
/// for a spatially constant coarse correction, to plain injection.
///
/// A coarse neighbor that falls outside the parent patch is read by
/// clamping to the parent's own edge rather than crossing into the actual
/// neighboring patch: the ghost filler is what keeps inter-patch values
/// consistent before an operator apply, and a multigrid correction is
/// itself only an approximate update smoothed away on the next relaxation
/// sweep, so clamping here costs accuracy only right at patch seams and
/// only within one smoothing pass of being corrected.
pub struct MultilinearInterpolator {
    pub ilc: InterLevelComm,
}

impl Interpolator for MultilinearInterpolator {
    fn interpolate(&self, coarse: &Vector, fine: &Vector) {
        for (local_idx, &fine_id) in fine.patch_ids().iter().enumerate() {
            let (parent_id, _rank) = match self.ilc.parent_of(fine_id) {
                Some(p) => p,
                None => continue,
            };
            let parent_local = match coarse.local_index_of(parent_id) {
                Some(idx) => idx,
                None => continue,
            };
            for c in 0..fine.num_components() {
                let coarse_ld = coarse.local_data(parent_local, c);
                let fine_ld = fine.local_data(local_idx, c);
                for fine_coord in fine_ld.iter_coords() {
                    let current = fine_ld.get(&fine_coord);
                    fine_ld.set(&fine_coord, current + multilinear_get(coarse_ld, &fine_coord));
                }
            }
        }
    }
}

/// The multilinear-prolongation value at one fine cell, tensor-producted
/// across axes from the `(weight, coarse coordinate)` pair each axis
/// contributes (its own parent cell at weight `3/4`, the neighbor in the
/// direction of the fine cell's offset within the parent block at weight
/// `1/4`).
fn multilinear_get(coarse_ld: &LocalData, fine_coord: &[i64]) -> f64 {
    let rank = fine_coord.len();
    let mut axis_terms: Vec<[(f64, i64); 2]> = Vec::with_capacity(rank);
    for &f in fine_coord {
        let parent = f.div_euclid(2);
        let neighbor = if f.rem_euclid(2) == 0 { parent - 1 } else { parent + 1 };
        axis_terms.push([(0.75, parent), (0.25, neighbor)]);
    }

    let mut total = 0.0;
    for mask in 0..(1usize << rank) {
        let mut weight = 1.0;
        let mut coord = vec![0i64; rank];
        for axis in 0..rank {
            let (w, c) = axis_terms[axis][(mask >> axis) & 1];
            weight *= w;
            coord[axis] = c;
        }
        total += weight * clamped_coarse_get(coarse_ld, &coord);
    }
    total
}

/// Read `coarse_ld` at `coord`, clamping each axis into the patch's owned
/// range instead of reading a ghost cell (this interpolator never assumes
/// the coarse vector has had its ghosts filled).
fn clamped_coarse_get(coarse_ld: &LocalData, coord: &[i64]) -> f64 {
    let clamped: Vec<i64> = coord
        .iter()
        .zip(coarse_ld.lengths())
        .map(|(&c, &len)| c.max(0).min(len as i64 - 1))
        .collect();
    coarse_ld.get(&clamped)
}

/// A weighted-Jacobi smoother: one relaxation sweep per local patch,
/// reusing the same fixed-point update `RelaxedPatchSolver` uses, but
/// capped at a small iteration count since it only needs to damp
/// high-frequency error before/after a coarse-grid correction.
pub struct JacobiSmoother {
    pub omega: f64,
}

impl Smoother for JacobiSmoother {
    fn smooth(
        &self,
        pinfos: &[PatchInfo],
        operator: &dyn PatchOperator,
        u: &Vector,
        f: &Vector,
        iterations: usize,
    ) {
        let scratch = u.like_zeros();
        for _ in 0..iterations {
            for (local_idx, pinfo) in pinfos.iter().enumerate() {
                let diag: f64 = -2.0 * pinfo.spacings.iter().map(|h| 1.0 / (h * h)).sum::<f64>();
                let u_ld = u.local_data(local_idx, 0);
                let s_ld = scratch.local_data(local_idx, 0);
                operator.apply(pinfo, u_ld, s_ld);
                let f_ld = f.local_data(local_idx, 0);
                for coord in u_ld.iter_coords() {
                    let residual = f_ld.get(&coord) - s_ld.get(&coord);
                    let update = u_ld.get(&coord) + self.omega * residual / diag;
                    u_ld.set(&coord, update);
                }
            }
        }
    }
}

/// One level of the multigrid hierarchy. `restrictor`/`interpolator` and
/// the level below are `None` at the coarsest level.
pub struct Level {
    pub patch_infos: Vec<PatchInfo>,
    pub operator: Box<dyn PatchOperator>,
    pub smoother: Box<dyn Smoother>,
    pub restrictor: Option<Box<dyn Restrictor>>,
    pub interpolator: Option<Box<dyn Interpolator>>,
}

impl Level {
    pub fn is_coarsest(levels: &[Level], index: usize) -> bool {
        index + 1 == levels.len()
    }
}

/// A direct (iterate-to-convergence) solve used at the coarsest level,
/// where a V-cycle would otherwise recurse forever.
pub fn coarsest_solve(
    pinfos: &[PatchInfo],
    operator: &dyn PatchOperator,
    solver: &dyn PatchSolver,
    u: &Vector,
    f: &Vector,
) {
    let empty_gamma = HashMap::new();
    for (local_idx, pinfo) in pinfos.iter().enumerate() {
        solver.solve(
            pinfo,
            operator,
            f.local_data(local_idx, 0),
            &empty_gamma,
            u.local_data(local_idx, 0),
        );
    }
}

/// One V-cycle (or, with `w_cycle_count > 1`, a W-cycle): pre-smooth,
/// restrict the residual, recurse into the coarser level `w_cycle_count`
/// times (or solve directly at the coarsest level), interpolate the
/// correction back up, post-smooth. `w_cycle_count = 1` is the classic
/// V-cycle; larger values revisit the coarser level more than once per
/// parent visit, trading extra coarse-grid work for a more aggressive
/// reduction of low-frequency error.
pub fn v_cycle(
    levels: &[Level],
    index: usize,
    coarsest_solver: &dyn PatchSolver,
    u: &Vector,
    f: &Vector,
    pre_smooth: usize,
    post_smooth: usize,
    w_cycle_count: usize,
) {
    let level = &levels[index];
    level.smoother.smooth(&level.patch_infos, level.operator.as_ref(), u, f, pre_smooth);

    if Level::is_coarsest(levels, index) {
        coarsest_solve(&level.patch_infos, level.operator.as_ref(), coarsest_solver, u, f);
        return;
    }

    let residual = f.like_zeros();
    let au = u.like_zeros();
    for (local_idx, pinfo) in level.patch_infos.iter().enumerate() {
        level.operator.apply(pinfo, u.local_data(local_idx, 0), au.local_data(local_idx, 0));
    }
    residual.copy_from(f);
    residual.add_scaled(-1.0, &au);

    if let (Some(restrictor), Some(interpolator)) = (&level.restrictor, &level.interpolator) {
        let coarse_level = &levels[index + 1];
        let coarse_f = Vector::zeros(
            f.communicator().clone(),
            &coarse_level.patch_infos,
            f.num_components(),
            f.num_ghost(),
        );
        restrictor.restrict(&residual, &coarse_f);
        let coarse_u = coarse_f.like_zeros();

        // Each visit further refines the same coarse correction in place
        // against the same fixed defect `coarse_f`; a plain V-cycle is the
        // `w_cycle_count == 1` case of this loop.
        for _ in 0..w_cycle_count.max(1) {
            v_cycle(
                levels,
                index + 1,
                coarsest_solver,
                &coarse_u,
                &coarse_f,
                pre_smooth,
                post_smooth,
                w_cycle_count,
            );
        }

        interpolator.interpolate(&coarse_u, u);
    }

    level.smoother.smooth(&level.patch_infos, level.operator.as_ref(), u, f, post_smooth);
}
