//! Solver configuration: the knobs a caller tunes to run a solve, collected
//! into one (de)serializable struct rather than threaded through as loose
//! function arguments, the way the teacher's `Patch`/`Request`/`Response`
//! types carry their fields with `serde::{Serialize, Deserialize}` for
//! transport and config-file loading alike.

use serde::{Deserialize, Serialize};

use crate::krylov::IterativeParams;
use crate::patch_operator::RefinementBoundaryScheme;

/// Which matrix-free Krylov method drives the outer solve.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KrylovMethod {
    Cg,
    BiCgStab,
    Gmres,
}

impl Default for KrylovMethod {
    fn default() -> Self {
        KrylovMethod::BiCgStab
    }
}

/// Everything a solve needs that isn't the domain and the right-hand side
/// itself: stopping criteria, smoother sweep counts, the multigrid cycle
/// shape, and the refinement-boundary discretization choice.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    pub method: KrylovMethod,
    pub max_iterations: usize,
    pub tolerance: f64,

    /// Whether the outer Krylov solve runs over the Schur-complement
    /// interface system (the production path) or directly over the full
    /// patch-local vector (only correct for a single patch, or multiple
    /// patches re-ghosted between iterations).
    pub use_schur: bool,

    /// Use geometric multigrid to precondition the outer solve, rather
    /// than running the Krylov method unpreconditioned.
    pub use_multigrid_preconditioner: bool,
    pub pre_smooth_sweeps: usize,
    pub post_smooth_sweeps: usize,

    /// `1` for a classic V-cycle; higher values revisit the coarser level
    /// more than once per parent visit (see `multigrid::v_cycle`).
    pub w_cycle_count: usize,

    pub refinement_boundary_scheme: RefinementBoundaryScheme,
}

impl Default for SolverConfig {
    fn default() -> Self {
        SolverConfig {
            method: KrylovMethod::default(),
            max_iterations: 1000,
            tolerance: 1e-12,
            use_schur: true,
            use_multigrid_preconditioner: false,
            pre_smooth_sweeps: 2,
            post_smooth_sweeps: 2,
            w_cycle_count: 1,
            refinement_boundary_scheme: RefinementBoundaryScheme::default(),
        }
    }
}

impl SolverConfig {
    pub fn iterative_params(&self) -> IterativeParams {
        IterativeParams { max_iterations: self.max_iterations, tolerance: self.tolerance }
    }
}
