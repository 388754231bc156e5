//! The error taxonomy used throughout the crate.
//!
//! Most API-misuse conditions (mismatched Start/Finish pairs, undersized
//! ghost layers, lookups against an unknown patch) surface as
//! [`RuntimeError`]. The Krylov solvers additionally report
//! [`BreakdownError`] and [`DivergenceError`] when they can no longer make
//! progress; both terminate the current `solve` call, never the process.

use thiserror::Error;

/// API misuse detected at runtime: mismatched communication brackets,
/// undersized ghost layers, or a lookup against a patch/interface that does
/// not exist on this rank.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("a communication exchange is already in flight: {0}")]
    ExchangeInFlight(String),

    #[error("finish called without a matching start: {0}")]
    NoExchangeInFlight(String),

    #[error("finish called with a different vector than the matching start: {0}")]
    MismatchedExchange(String),

    #[error("ghost filler requires at least one ghost cell layer, patch has {0}")]
    InsufficientGhostCells(usize),

    #[error("no local patch with global id {0}")]
    UnknownPatch(u64),

    #[error("no interface with id {0}")]
    UnknownInterface(u64),

    #[error("neighbor type mismatch: accessed {accessed} on a side tagged {actual}")]
    NbrTypeMismatch {
        accessed: &'static str,
        actual: &'static str,
    },

    #[error("dimension rank must be 2 or 3, got {0}")]
    UnsupportedRank(usize),

    #[error("patch is singular (pure-Neumann boundary without a pinned value)")]
    SingularPatch,

    #[error("communication failure: {0}")]
    Communication(String),
}

/// A Krylov solver could not make further progress (e.g. a BiCGStab
/// breakdown where `rho == 0`). The partial solution is not meaningful and
/// must be discarded by the caller.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{method} broke down on iteration {iteration}: {reason}")]
pub struct BreakdownError {
    pub method: &'static str,
    pub iteration: usize,
    pub reason: String,
}

/// A Krylov solver's relative residual exceeded the divergence threshold
/// (1e6 by convention in this crate).
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{method} diverged on iteration {iteration}: relative residual {residual:e}")]
pub struct DivergenceError {
    pub method: &'static str,
    pub iteration: usize,
    pub residual: f64,
}

/// Anything a Krylov solver's `solve` can fail with.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolveError {
    #[error(transparent)]
    Breakdown(#[from] BreakdownError),

    #[error(transparent)]
    Divergence(#[from] DivergenceError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}
