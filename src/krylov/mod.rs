//! Matrix-free Krylov solvers, shared across both systems this crate needs
//! to iterate on: the full patch-local `Vector` (a direct, undecomposed
//! solve) and the Schur-complement `InterfaceVector` (the production path,
//! one unknown per patch interface). Both implement [`KrylovVector`], so
//! [`cg`], [`bicgstab`] and [`gmres`] are written once against the trait.
//!
//! Grounded on `examples/original_source/src/ThunderEgg/Iterative/BiCGStab.h`:
//! the `max_iterations`/`tolerance`/`timer` fields and defaults
//! (1000, 1e-12), and the "deflate the initial guess, solve for the
//! correction, add it back" structure every solver here reuses.

pub mod bicgstab;
pub mod cg;
pub mod gmres;

use crate::domain::Domain;
use crate::patch_operator::PatchOperator;
use crate::schur::{InterfaceVector, SchurHelper};
use crate::vector::Vector;

/// The Hilbert-space operations a Krylov method needs from its unknown:
/// axpy-family updates, dot product and two-norm (both already collective
/// across ranks for both implementors), and a same-layout zero vector for
/// scratch space.
pub trait KrylovVector: Sized {
    fn set(&self, value: f64);
    fn scale(&self, alpha: f64);
    fn copy_from(&self, other: &Self);
    fn add_scaled(&self, alpha: f64, other: &Self);
    fn scale_then_add(&self, alpha: f64, other: &Self);
    fn scale_then_add_scaled(&self, alpha: f64, beta: f64, other: &Self);
    fn dot(&self, other: &Self) -> f64;
    fn two_norm(&self) -> f64;
    fn like_zeros(&self) -> Self;
}

impl KrylovVector for Vector {
    fn set(&self, value: f64) {
        Vector::set(self, value)
    }
    fn scale(&self, alpha: f64) {
        Vector::scale(self, alpha)
    }
    fn copy_from(&self, other: &Self) {
        Vector::copy_from(self, other)
    }
    fn add_scaled(&self, alpha: f64, other: &Self) {
        Vector::add_scaled(self, alpha, other)
    }
    fn scale_then_add(&self, alpha: f64, other: &Self) {
        Vector::scale_then_add(self, alpha, other)
    }
    fn scale_then_add_scaled(&self, alpha: f64, beta: f64, other: &Self) {
        Vector::scale_then_add_scaled(self, alpha, beta, other)
    }
    fn dot(&self, other: &Self) -> f64 {
        Vector::dot(self, other)
    }
    fn two_norm(&self) -> f64 {
        Vector::two_norm(self)
    }
    fn like_zeros(&self) -> Self {
        Vector::like_zeros(self)
    }
}

impl KrylovVector for InterfaceVector {
    fn set(&self, value: f64) {
        InterfaceVector::set(self, value)
    }
    fn scale(&self, alpha: f64) {
        InterfaceVector::scale(self, alpha)
    }
    fn copy_from(&self, other: &Self) {
        InterfaceVector::copy_from(self, other)
    }
    fn add_scaled(&self, alpha: f64, other: &Self) {
        InterfaceVector::add_scaled(self, alpha, other)
    }
    fn scale_then_add(&self, alpha: f64, other: &Self) {
        InterfaceVector::scale_then_add(self, alpha, other)
    }
    fn scale_then_add_scaled(&self, alpha: f64, beta: f64, other: &Self) {
        InterfaceVector::scale_then_add_scaled(self, alpha, beta, other)
    }
    fn dot(&self, other: &Self) -> f64 {
        InterfaceVector::dot(self, other)
    }
    fn two_norm(&self) -> f64 {
        InterfaceVector::two_norm(self)
    }
    fn like_zeros(&self) -> Self {
        InterfaceVector::like_zeros(self)
    }
}

/// `b <- A x`, the one operation a matrix-free Krylov method needs from
/// its system matrix. A right preconditioner is just another operator of
/// this same shape, applied to the search direction before `A`.
pub trait KrylovOperator<V> {
    fn apply(&self, x: &V, b: &V);
}

/// Allocates a fresh scratch vector without the solver needing to know the
/// concrete vector layout, mirroring the source's `VectorGenerator<D>`.
pub trait VectorGenerator<V> {
    fn get_new_vector(&self) -> V;
}

/// The generator every solver call site actually has on hand: a template
/// vector whose layout (patch set, components, ghost width) every scratch
/// vector should copy. Delegates to [`KrylovVector::like_zeros`], so it
/// costs nothing beyond the reference itself.
pub struct TemplateVectorGenerator<'a, V>(pub &'a V);

impl<'a, V: KrylovVector> VectorGenerator<V> for TemplateVectorGenerator<'a, V> {
    fn get_new_vector(&self) -> V {
        self.0.like_zeros()
    }
}

/// Drives a [`PatchOperator`] over every local patch of a domain, turning
/// it into a whole-vector `Operator`. Assumes ghost cells at actual
/// patch-patch neighbors are already current; a direct (non-Schur) solve
/// over more than one patch needs a ghost filler run between iterations to
/// stay correct, which this adapter does not itself perform.
pub struct PatchOperatorAdapter<'a> {
    pub domain: &'a Domain,
    pub operator: &'a dyn PatchOperator,
}

impl<'a> KrylovOperator<Vector> for PatchOperatorAdapter<'a> {
    fn apply(&self, x: &Vector, b: &Vector) {
        for (local_idx, pinfo) in self.domain.local_patches().iter().enumerate() {
            self.operator.apply(pinfo, x.local_data(local_idx, 0), b.local_data(local_idx, 0));
        }
    }
}

impl<'a> KrylovOperator<InterfaceVector> for SchurHelper<'a> {
    fn apply(&self, x: &InterfaceVector, b: &InterfaceVector) {
        let result = SchurHelper::apply(self, x);
        b.copy_from(&result);
    }
}

/// One verbose-mode progress line: iteration index, then relative
/// residual, in the source's `"%5d %16.8e\n"` layout (rendered with Rust's
/// own formatting machinery rather than a literal C format string).
pub fn write_progress_line(
    out: &mut dyn std::io::Write,
    iteration: usize,
    residual: f64,
) -> std::io::Result<()> {
    writeln!(out, "{:5} {:16.8e}", iteration, residual)
}

/// Shared stopping-criteria configuration for every solver in this module,
/// with the source library's defaults.
#[derive(Clone, Copy, Debug)]
pub struct IterativeParams {
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl Default for IterativeParams {
    fn default() -> Self {
        IterativeParams { max_iterations: 1000, tolerance: 1e-12 }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::comm::ThreadCommunicator;
    use crate::domain_reader::{DomainReader, GridMeshReader};
    use crate::ghost_filler::{GhostFiller, MPIGhostFiller};
    use crate::krylov::cg::Cg;
    use crate::patch_operator::{add_dirichlet_boundary_to_rhs, StarPatchOperator};
    use std::f64::consts::PI;

    /// A direct (non-Schur) whole-domain operator that fills ghost cells
    /// from same-rank neighbors before every apply, unlike
    /// [`PatchOperatorAdapter`], which assumes a ghost fill already ran.
    struct GhostFillingOperator<'a> {
        domain: &'a Domain,
        filler: &'a dyn GhostFiller,
        operator: &'a dyn PatchOperator,
    }

    impl<'a> KrylovOperator<Vector> for GhostFillingOperator<'a> {
        fn apply(&self, x: &Vector, b: &Vector) {
            self.filler.fill_ghost(self.domain, x).expect("ghost exchange failed");
            for (local_idx, pinfo) in self.domain.local_patches().iter().enumerate() {
                self.operator.apply(pinfo, x.local_data(local_idx, 0), b.local_data(local_idx, 0));
            }
        }
    }

    #[test]
    fn poisson_2d_convergence_on_uniform_2x2_mesh() {
        let comm = ThreadCommunicator::world(1).remove(0);
        let domain = GridMeshReader::uniform_2x2(32).read(comm.clone()).expect("mesh should build");
        let patches = domain.local_patches().to_vec();

        let b = Vector::zeros(comm.clone(), &patches, 1, domain.num_ghost());
        b.fill_from_fn(0, &patches, |pos| {
            -5.0 * PI.powi(2) * (PI * pos[1]).sin() * (2.0 * PI * pos[0]).cos()
        });

        let g = |pos: &[f64]| (PI * pos[1]).sin() * (2.0 * PI * pos[0]).cos();
        for (local_idx, pinfo) in patches.iter().enumerate() {
            add_dirichlet_boundary_to_rhs(pinfo, g, b.local_data(local_idx, 0));
        }

        let operator = StarPatchOperator::default();
        let filler = MPIGhostFiller::new(domain.num_ghost()).expect("ghost filler should build");
        let op = GhostFillingOperator { domain: &domain, filler: &filler, operator: &operator };

        let x = Vector::zeros(comm, &patches, 1, domain.num_ghost());
        let mut cg = Cg::default();
        cg.set_tolerance(1e-7);
        let vg = TemplateVectorGenerator(&x);
        let mut sink = Vec::new();
        let its = cg.solve(&vg, &op, &x, &b, None, false, &mut sink).expect("cg should converge");
        assert!(its <= 25, "expected convergence within 25 iterations, took {}", its);

        let resid = x.like_zeros();
        op.apply(&x, &resid);
        resid.scale_then_add(-1.0, &b);
        assert!(resid.two_norm() / b.two_norm() < 1e-6);
    }
}
