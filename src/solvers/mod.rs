//! Patch-local solves: given the Schur interface values on a patch's
//! boundary, solve the elliptic operator for the patch's interior.
//!
//! Production ThunderEgg patch solves use an FFT-based direct method which
//! is explicitly out of scope here (see `SPEC_FULL.md` Non-goals); this
//! module instead provides [`RelaxedPatchSolver`], an iterative (weighted
//! Jacobi) reference implementation used by `SchurHelper` and by the
//! multigrid smoother.

use crate::local_data::LocalData;
use crate::patch_info::PatchInfo;
use crate::patch_operator::{GammaBySide, PatchOperator};

/// Solves `A u = rhs` on one patch's interior, given fixed values for the
/// Schur interface unknowns on each refinement-interface side.
pub trait PatchSolver {
    fn solve(
        &self,
        pinfo: &PatchInfo,
        operator: &dyn PatchOperator,
        rhs: &LocalData,
        gamma: &GammaBySide,
        u: &LocalData,
    );
}

/// A weighted-Jacobi relaxation: not exact, but convergent for the
/// diagonally dominant star stencil this crate builds, and good enough as
/// the reference patch solver a Schur `apply`/multigrid smoother needs.
pub struct RelaxedPatchSolver {
    pub iterations: usize,
    pub omega: f64,
}

impl RelaxedPatchSolver {
    pub fn new(iterations: usize, omega: f64) -> Self {
        RelaxedPatchSolver { iterations, omega }
    }
}

impl Default for RelaxedPatchSolver {
    fn default() -> Self {
        RelaxedPatchSolver { iterations: 40, omega: 0.8 }
    }
}

impl PatchSolver for RelaxedPatchSolver {
    fn solve(
        &self,
        pinfo: &PatchInfo,
        operator: &dyn PatchOperator,
        rhs: &LocalData,
        gamma: &GammaBySide,
        u: &LocalData,
    ) {
        let diag: f64 = -2.0 * pinfo.spacings.iter().map(|h| 1.0 / (h * h)).sum::<f64>();
        let (store, base, strides) =
            crate::local_data::allocate_patch_storage(u.lengths(), pinfo_ghost(u));
        let scratch = LocalData::new(store, base, strides, u.lengths().to_vec());

        for _ in 0..self.iterations {
            operator.apply_with_interface(pinfo, u, gamma, &scratch);
            for coord in u.iter_coords() {
                let residual = rhs.get(&coord) - scratch.get(&coord);
                let update = u.get(&coord) + self.omega * residual / diag;
                u.set(&coord, update);
            }
        }
    }
}

/// Ghost depth to allocate for the solver's internal scratch vector: one
/// layer is always enough since `apply_with_interface` only ever reads one
/// cell inward/outward of a face.
fn pinfo_ghost(_u: &LocalData) -> usize {
    1
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::local_data::allocate_patch_storage;
    use crate::patch_operator::StarPatchOperator;
    use std::collections::HashMap;

    #[test]
    fn relaxed_solver_converges_on_homogeneous_problem() {
        let lengths = vec![6, 6];
        let pinfo = PatchInfo::new(0, 0, 0, lengths.clone(), vec![0.0, 0.0], vec![0.2, 0.2], 1);
        let (store, base, strides) = allocate_patch_storage(&lengths, 1);
        let u = LocalData::new(store, base, strides, lengths.clone());
        let (rstore, rbase, rstrides) = allocate_patch_storage(&lengths, 1);
        let rhs = LocalData::new(rstore, rbase, rstrides, lengths);

        for coord in u.iter_coords() {
            u.set(&coord, (coord[0] + coord[1] * 3) as f64 - 4.0);
        }

        let op = StarPatchOperator::default();
        let solver = RelaxedPatchSolver::new(200, 1.0);
        solver.solve(&pinfo, &op, &rhs, &HashMap::new(), &u);

        for coord in u.iter_coords() {
            assert!(u.get(&coord).abs() < 1e-8, "expected near-zero, got {}", u.get(&coord));
        }
    }
}
