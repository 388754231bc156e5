//! Conjugate gradient, for the symmetric positive-definite systems this
//! crate's star-stencil operator produces. Structured the same way as
//! [`super::bicgstab`]: the initial guess is deflated out before iterating
//! and added back at the end, matching the source library's solve loop.
//! Preconditioning follows the same right-preconditioner convention as
//! `BiCGStab.h`'s `Mr`: the search direction is passed through `M_r`
//! before every operator apply, recovering standard PCG.

use std::io::Write;

use crate::error::{BreakdownError, DivergenceError, SolveError};
use crate::krylov::{write_progress_line, IterativeParams, KrylovOperator, KrylovVector, VectorGenerator};
use crate::timer::Timer;

pub struct Cg {
    pub params: IterativeParams,
    timer: Option<Timer>,
}

impl Default for Cg {
    fn default() -> Self {
        Cg { params: IterativeParams::default(), timer: None }
    }
}

impl Cg {
    pub fn new(params: IterativeParams) -> Self {
        Cg { params, timer: None }
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

    /// Solves `A x = b` in place, returning the number of iterations run.
    /// `m_r`, if given, is a right preconditioner applied to the search
    /// direction before every operator apply. In verbose mode, one line
    /// per iteration (starting with iteration 0, the un-iterated residual)
    /// is written to `out`.
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
        let r0_norm = b.two_norm();
        if r0_norm == 0.0 {
            x.set(0.0);
            return Ok(0);
        }

        let initial_guess = vg.get_new_vector();
        initial_guess.copy_from(x);

        let resid = vg.get_new_vector();
        operator.apply(x, &resid);
        resid.scale_then_add(-1.0, b);
        x.set(0.0);

        let z = vg.get_new_vector();
        apply_preconditioner(m_r, &resid, &z);

        let p = vg.get_new_vector();
        p.copy_from(&z);
        let ap = vg.get_new_vector();

        let mut rs_old = resid.dot(&z);
        let mut residual = resid.two_norm() / r0_norm;
        let mut num_its = 0;

        if verbose {
            write_progress_line(out, num_its, residual).ok();
        }

        while residual > self.params.tolerance && num_its < self.params.max_iterations {
            if let Some(t) = &self.timer {
                t.start("Iteration");
            }

            operator.apply(&p, &ap);
            let p_ap = p.dot(&ap);
            if p_ap == 0.0 {
                if let Some(t) = &self.timer {
                    t.stop("Iteration");
                }
                return Err(BreakdownError {
                    method: "CG",
                    iteration: num_its,
                    reason: "p^T A p was 0".to_string(),
                }
                .into());
            }
            let alpha = rs_old / p_ap;

            x.add_scaled(alpha, &p);
            resid.add_scaled(-alpha, &ap);

            residual = resid.two_norm() / r0_norm;
            num_its += 1;

            if residual > 1e6 {
                if let Some(t) = &self.timer {
                    t.stop("Iteration");
                }
                return Err(DivergenceError { method: "CG", iteration: num_its, residual }.into());
            }

            apply_preconditioner(m_r, &resid, &z);
            let rs_new = resid.dot(&z);
            let beta = rs_new / rs_old;
            p.scale_then_add_scaled(beta, 1.0, &z);
            rs_old = rs_new;

            if let Some(t) = &self.timer {
                t.stop("Iteration");
            }

            if verbose {
                write_progress_line(out, num_its, residual).ok();
            }
        }

        x.add_scaled(1.0, &initial_guess);
        Ok(num_its)
    }
}

/// `z <- M_r x`, or `z <- x` when no preconditioner was given.
fn apply_preconditioner<V: KrylovVector>(m_r: Option<&dyn KrylovOperator<V>>, x: &V, z: &V) {
    match m_r {
        Some(m) => m.apply(x, z),
        None => z.copy_from(x),
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
    fn cg_solves_diagonally_dominant_star_system() {
        let comm = ThreadCommunicator::world(1).remove(0);
        let pinfo = PatchInfo::new(0, 0, 0, vec![6, 6], vec![0.0, 0.0], vec![1.0 / 6.0, 1.0 / 6.0], 1);
        let domain = Domain::new(comm.clone(), vec![pinfo.clone()], vec![], 1).unwrap();
        let operator = StarPatchOperator::default();
        let adapter = PatchOperatorAdapter { domain: &domain, operator: &operator };

        let b = Vector::zeros(comm.clone(), &[pinfo.clone()], 1, 1);
        b.set(1.0);
        let x = Vector::zeros(comm, &[pinfo], 1, 1);

        let cg = Cg::default();
        let vg = TemplateVectorGenerator(&x);
        let mut sink = Vec::new();
        let its = cg.solve(&vg, &adapter, &x, &b, None, false, &mut sink).expect("cg should converge");
        assert!(its > 0);

        let resid = x.like_zeros();
        adapter.apply(&x, &resid);
        resid.scale_then_add(-1.0, &b);
        assert!(resid.two_norm() / b.two_norm() < 1e-8);
    }

    #[test]
    fn fresh_cg_reports_default_limits_and_no_timer() {
        let cg = Cg::default();
        assert_eq!(cg.params.max_iterations, 1000);
        assert_eq!(cg.params.tolerance, 1e-12);
        assert!(cg.timer().is_none());
    }

    #[test]
    fn setters_override_constructed_defaults() {
        let mut cg = Cg::default();
        cg.set_max_iterations(50);
        cg.set_tolerance(1e-6);
        cg.set_timer(Some(Timer::new()));
        assert_eq!(cg.params.max_iterations, 50);
        assert_eq!(cg.params.tolerance, 1e-6);
        assert!(cg.timer().is_some());
    }

    #[test]
    fn verbose_mode_writes_one_line_per_iteration() {
        let comm = ThreadCommunicator::world(1).remove(0);
        let pinfo = PatchInfo::new(0, 0, 0, vec![6, 6], vec![0.0, 0.0], vec![1.0 / 6.0, 1.0 / 6.0], 1);
        let domain = Domain::new(comm.clone(), vec![pinfo.clone()], vec![], 1).unwrap();
        let operator = StarPatchOperator::default();
        let adapter = PatchOperatorAdapter { domain: &domain, operator: &operator };

        let b = Vector::zeros(comm.clone(), &[pinfo.clone()], 1, 1);
        b.set(1.0);
        let x = Vector::zeros(comm, &[pinfo], 1, 1);

        let cg = Cg::default();
        let vg = TemplateVectorGenerator(&x);
        let mut out = Vec::new();
        let its = cg.solve(&vg, &adapter, &x, &b, None, true, &mut out).unwrap();

        let text = String::from_utf8(out).unwrap();
        // one line for the un-iterated residual plus one per iteration
        assert_eq!(text.lines().count(), its + 1);
        assert!(text.lines().next().unwrap().trim_start().starts_with('0'));
    }
}
