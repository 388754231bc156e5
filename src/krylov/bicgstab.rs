//! BiCGStab, ported from `examples/original_source/src/ThunderEgg/Iterative/BiCGStab.h`:
//! same recurrence, same initial-guess-deflation trick (solve for the
//! correction from a zeroed `x`, add the original `x` back at the end),
//! same breakdown (`rho == 0`) and divergence (`residual > 1e6`) checks,
//! same optional right-preconditioner `Mr` (applied to a search direction
//! before every operator apply, then undone on the final solution), and
//! the same verbose per-iteration line to an output stream.

use std::io::Write;

use crate::error::{BreakdownError, DivergenceError, SolveError};
use crate::krylov::{write_progress_line, IterativeParams, KrylovOperator, KrylovVector, VectorGenerator};
use crate::timer::Timer;

pub struct BiCgStab {
    pub params: IterativeParams,
    timer: Option<Timer>,
}

impl Default for BiCgStab {
    fn default() -> Self {
        BiCgStab { params: IterativeParams::default(), timer: None }
    }
}

impl BiCgStab {
    pub fn new(params: IterativeParams) -> Self {
        BiCgStab { params, timer: None }
    }

    pub fn set_max_iterations(&mut self, max_iterations: usize) {
        self.params.max_iterations = max_iterations;
    }

    pub fn set_tolerance(&mut self, tolerance: f64) {
        self.params.tolerance = tolerance;
    }

    pub fn set_timer(&mut self, timer: Option<Timer>) {
        self.timer = timer;
    }

    pub fn timer(&self) -> Option<&Timer> {
        self.timer.as_ref()
    }

    /// `b <- A(M_r(x))` when a right preconditioner is given, else plain
    /// `b <- A x` — the source's `applyWithPreconditioner` with `M_l`
    /// always absent (this crate never needed a left preconditioner).
    fn apply_with_preconditioner<V, A, VG>(
        vg: &VG,
        operator: &A,
        m_r: Option<&dyn KrylovOperator<V>>,
        x: &V,
        b: &V,
    ) where
        V: KrylovVector,
        A: KrylovOperator<V>,
        VG: VectorGenerator<V>,
    {
        match m_r {
            None => operator.apply(x, b),
            Some(m) => {
                let tmp = vg.get_new_vector();
                m.apply(x, &tmp);
                operator.apply(&tmp, b);
            }
        }
    }

    pub fn solve<V, A, VG>(
        &self,
        vg: &VG,
        operator: &A,
        x: &V,
        b: &V,
        m_r: Option<&dyn KrylovOperator<V>>,
        verbose: bool,
        out: &mut dyn Write,
    ) -> Result<usize, SolveError>
    where
        V: KrylovVector,
        A: KrylovOperator<V>,
        VG: VectorGenerator<V>,
    {
        let resid = vg.get_new_vector();
        operator.apply(x, &resid);
        resid.scale_then_add(-1.0, b);

        let initial_guess = vg.get_new_vector();
        initial_guess.copy_from(x);
        x.set(0.0);

        let r0_norm = b.two_norm();
        let mut num_its = 0;
        if r0_norm == 0.0 {
            return Ok(num_its);
        }

        let rhat = vg.get_new_vector();
        rhat.copy_from(&resid);
        let p = vg.get_new_vector();
        p.copy_from(&resid);
        let ap = vg.get_new_vector();
        let as_vec = vg.get_new_vector();
        let s = vg.get_new_vector();

        let mut rho = rhat.dot(&resid);
        let mut residual = resid.two_norm() / r0_norm;

        if verbose {
            write_progress_line(out, num_its, residual).ok();
        }

        while residual > self.params.tolerance && num_its < self.params.max_iterations {
            if let Some(t) = &self.timer {
                t.start("Iteration");
            }

            if rho == 0.0 {
                if let Some(t) = &self.timer {
                    t.stop("Iteration");
                }
                return Err(BreakdownError {
                    method: "BiCGStab",
                    iteration: num_its,
                    reason: "rho was 0".to_string(),
                }
                .into());
            }

            Self::apply_with_preconditioner(vg, operator, m_r, &p, &ap);
            let alpha = rho / rhat.dot(&ap);

            s.copy_from(&resid);
            s.add_scaled(-alpha, &ap);
            if s.two_norm() / r0_norm <= self.params.tolerance {
                x.add_scaled(alpha, &p);
                if let Some(t) = &self.timer {
                    t.stop("Iteration");
                }
                break;
            }

            Self::apply_with_preconditioner(vg, operator, m_r, &s, &as_vec);
            let omega = as_vec.dot(&s) / as_vec.dot(&as_vec);

            x.add_scaled(alpha, &p);
            x.add_scaled(omega, &s);
            resid.add_scaled(-alpha, &ap);
            resid.add_scaled(-omega, &as_vec);

            let rho_new = resid.dot(&rhat);
            let beta = (rho_new / rho) * (alpha / omega);
            p.add_scaled(-omega, &ap);
            p.scale_then_add(beta, &resid);

            num_its += 1;
            rho = rho_new;
            residual = resid.two_norm() / r0_norm;

            if residual > 1e6 {
                if let Some(t) = &self.timer {
                    t.stop("Iteration");
                }
                return Err(DivergenceError { method: "BiCGStab", iteration: num_its, residual }.into());
            }
            if let Some(t) = &self.timer {
                t.stop("Iteration");
            }
            if verbose {
                write_progress_line(out, num_its, residual).ok();
            }
        }

        if let Some(m) = m_r {
            let unpreconditioned = vg.get_new_vector();
            m.apply(x, &unpreconditioned);
            x.copy_from(&unpreconditioned);
        }
        x.add_scaled(1.0, &initial_guess);
        Ok(num_its)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::comm::ThreadCommunicator;
    use crate::domain::Domain;
    use crate::krylov::{PatchOperatorAdapter, TemplateVectorGenerator};
    use crate::patch_info::PatchInfo;
    use crate::patch_operator::StarPatchOperator;
    use crate::vector::Vector;

    #[test]
    fn bicgstab_solves_star_system() {
        let comm = ThreadCommunicator::world(1).remove(0);
        let pinfo = PatchInfo::new(0, 0, 0, vec![6, 6], vec![0.0, 0.0], vec![1.0 / 6.0, 1.0 / 6.0], 1);
        let domain = Domain::new(comm.clone(), vec![pinfo.clone()], vec![], 1).unwrap();
        let operator = StarPatchOperator::default();
        let adapter = PatchOperatorAdapter { domain: &domain, operator: &operator };

        let b = Vector::zeros(comm.clone(), &[pinfo.clone()], 1, 1);
        b.set(1.0);
        let x = Vector::zeros(comm, &[pinfo], 1, 1);

        let solver = BiCgStab::default();
        let vg = TemplateVectorGenerator(&x);
        let mut sink = Vec::new();
        solver.solve(&vg, &adapter, &x, &b, None, false, &mut sink).expect("bicgstab should converge");

        let resid = x.like_zeros();
        adapter.apply(&x, &resid);
        resid.scale_then_add(-1.0, &b);
        assert!(resid.two_norm() / b.two_norm() < 1e-7);
    }

    #[test]
    fn zero_rhs_converges_in_zero_iterations() {
        let comm = ThreadCommunicator::world(1).remove(0);
        let pinfo = PatchInfo::new(0, 0, 0, vec![4, 4], vec![0.0, 0.0], vec![0.25, 0.25], 1);
        let domain = Domain::new(comm.clone(), vec![pinfo.clone()], vec![], 1).unwrap();
        let operator = StarPatchOperator::default();
        let adapter = PatchOperatorAdapter { domain: &domain, operator: &operator };

        let b = Vector::zeros(comm.clone(), &[pinfo.clone()], 1, 1);
        let x = Vector::zeros(comm, &[pinfo], 1, 1);

        let solver = BiCgStab::default();
        let vg = TemplateVectorGenerator(&x);
        let mut sink = Vec::new();
        let its = solver.solve(&vg, &adapter, &x, &b, None, false, &mut sink).unwrap();
        assert_eq!(its, 0);
    }

    #[test]
    fn identity_preconditioner_matches_unpreconditioned_result() {
        struct Identity;
        impl KrylovOperator<Vector> for Identity {
            fn apply(&self, x: &Vector, b: &Vector) {
                b.copy_from(x);
            }
        }

        let comm = ThreadCommunicator::world(1).remove(0);
        let pinfo = PatchInfo::new(0, 0, 0, vec![6, 6], vec![0.0, 0.0], vec![1.0 / 6.0, 1.0 / 6.0], 1);
        let domain = Domain::new(comm.clone(), vec![pinfo.clone()], vec![], 1).unwrap();
        let operator = StarPatchOperator::default();
        let adapter = PatchOperatorAdapter { domain: &domain, operator: &operator };

        let b = Vector::zeros(comm.clone(), &[pinfo.clone()], 1, 1);
        b.set(1.0);
        let x = Vector::zeros(comm, &[pinfo], 1, 1);

        let solver = BiCgStab::default();
        let vg = TemplateVectorGenerator(&x);
        let identity = Identity;
        let mut sink = Vec::new();
        solver
            .solve(&vg, &adapter, &x, &b, Some(&identity), false, &mut sink)
            .expect("bicgstab with identity preconditioner should converge");

        let resid = x.like_zeros();
        adapter.apply(&x, &resid);
        resid.scale_then_add(-1.0, &b);
        assert!(resid.two_norm() / b.two_norm() < 1e-7);
    }
}
