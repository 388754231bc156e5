//! Restarted GMRES(m), the classical Arnoldi-plus-Givens-rotations
//! formulation (Saad & Schultz). No GMRES implementation is present in
//! `examples/original_source` (only BiCGStab and CG are), so this module
//! follows that pair's structure and conventions (`IterativeParams`,
//! optional `Timer`, the deflate-then-restore initial-guess trick, the
//! optional right-preconditioner `Mr` and verbose progress line from
//! `BiCGStab.h`) rather than a ported recurrence — the one solver in this
//! crate without a direct upstream counterpart, recorded as such in
//! `DESIGN.md`.

use std::io::Write;

use crate::error::{DivergenceError, SolveError};
use crate::krylov::{write_progress_line, IterativeParams, KrylovOperator, KrylovVector, VectorGenerator};
use crate::timer::Timer;

pub struct Gmres {
    pub params: IterativeParams,
    /// Restart length: the Krylov subspace is rebuilt from scratch every
    /// this many inner iterations.
    pub restart: usize,
    timer: Option<Timer>,
}

impl Default for Gmres {
    fn default() -> Self {
        Gmres { params: IterativeParams::default(), restart: 30, timer: None }
    }
}

impl Gmres {
    pub fn new(params: IterativeParams, restart: usize) -> Self {
        Gmres { params, restart, timer: None }
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
    /// `b <- A x`.
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
        let beta0 = b.two_norm();
        if beta0 == 0.0 {
            x.set(0.0);
            return Ok(0);
        }

        let initial_guess = vg.get_new_vector();
        initial_guess.copy_from(x);
        x.set(0.0);

        let m = self.restart.max(1);
        let mut total_its = 0;

        if verbose {
            write_progress_line(out, total_its, 1.0).ok();
        }

        loop {
            if let Some(t) = &self.timer {
                t.start("Iteration");
            }

            let r = vg.get_new_vector();
            operator.apply(x, &r);
            r.scale_then_add(-1.0, b);
            let beta = r.two_norm();
            let mut residual = beta / beta0;
            if residual <= self.params.tolerance {
                if let Some(t) = &self.timer {
                    t.stop("Iteration");
                }
                break;
            }

            let mut basis: Vec<V> = Vec::with_capacity(m + 1);
            let v0 = vg.get_new_vector();
            v0.copy_from(&r);
            v0.scale(1.0 / beta);
            basis.push(v0);

            // Hessenberg matrix, stored dense and row-major; only the
            // upper-left (k+1) x k block is ever populated.
            let mut h = vec![vec![0.0; m]; m + 1];
            let mut g = vec![0.0; m + 1];
            g[0] = beta;
            let mut cs = vec![0.0; m];
            let mut sn = vec![0.0; m];

            let mut k = 0;
            for j in 0..m {
                total_its += 1;

                let w = vg.get_new_vector();
                Self::apply_with_preconditioner(vg, operator, m_r, &basis[j], &w);
                for i in 0..=j {
                    h[i][j] = basis[i].dot(&w);
                    w.add_scaled(-h[i][j], &basis[i]);
                }
                h[j + 1][j] = w.two_norm();

                if h[j + 1][j].abs() > 1e-300 {
                    let v_next = vg.get_new_vector();
                    v_next.copy_from(&w);
                    v_next.scale(1.0 / h[j + 1][j]);
                    basis.push(v_next);
                }

                for i in 0..j {
                    let (hij, hi1j) = (h[i][j], h[i + 1][j]);
                    h[i][j] = cs[i] * hij + sn[i] * hi1j;
                    h[i + 1][j] = -sn[i] * hij + cs[i] * hi1j;
                }

                let (c, s) = givens(h[j][j], h[j + 1][j]);
                cs[j] = c;
                sn[j] = s;
                h[j][j] = c * h[j][j] + s * h[j + 1][j];
                h[j + 1][j] = 0.0;

                g[j + 1] = -s * g[j];
                g[j] = c * g[j];

                k = j + 1;
                residual = g[j + 1].abs() / beta0;

                if residual > 1e6 {
                    if let Some(t) = &self.timer {
                        t.stop("Iteration");
                    }
                    return Err(DivergenceError { method: "GMRES", iteration: total_its, residual }.into());
                }
                if verbose {
                    write_progress_line(out, total_its, residual).ok();
                }
                if residual <= self.params.tolerance || total_its >= self.params.max_iterations {
                    break;
                }
            }

            let y = back_substitute(&h, &g, k);
            let z = vg.get_new_vector();
            for (i, &yi) in y.iter().enumerate() {
                z.add_scaled(yi, &basis[i]);
            }
            match m_r {
                None => x.add_scaled(1.0, &z),
                Some(m) => {
                    let preconditioned = vg.get_new_vector();
                    m.apply(&z, &preconditioned);
                    x.add_scaled(1.0, &preconditioned);
                }
            }

            if let Some(t) = &self.timer {
                t.stop("Iteration");
            }

            if residual <= self.params.tolerance || total_its >= self.params.max_iterations {
                break;
            }
        }

        x.add_scaled(1.0, &initial_guess);
        Ok(total_its)
    }
}

/// Givens rotation zeroing `b` against `a`: returns `(cos, sin)` such that
/// `[[c, s], [-s, c]] * [a, b]^T = [r, 0]^T`.
fn givens(a: f64, b: f64) -> (f64, f64) {
    if b == 0.0 {
        (1.0, 0.0)
    } else if b.abs() > a.abs() {
        let t = a / b;
        let s = 1.0 / (1.0 + t * t).sqrt();
        (t * s, s)
    } else {
        let t = b / a;
        let c = 1.0 / (1.0 + t * t).sqrt();
        (c, t * c)
    }
}

/// Solve the `k x k` upper-triangular system `H y = g` produced by the
/// Arnoldi/Givens elimination above.
fn back_substitute(h: &[Vec<f64>], g: &[f64], k: usize) -> Vec<f64> {
    let mut y = vec![0.0; k];
    for i in (0..k).rev() {
        let mut sum = g[i];
        for j in (i + 1)..k {
            sum -= h[i][j] * y[j];
        }
        y[i] = sum / h[i][i];
    }
    y
}
