//! Matrix-free star-stencil discretizations of the (variable-coefficient)
//! Poisson operator, grounded on
//! `examples/original_source/src/ThunderEgg/Poisson/Schur/StarPatchOperator.h`
//! and its `VarPoisson` counterpart.
//!
//! A patch's physical-boundary sides (no neighbor at all) are handled
//! directly by formula (Dirichlet or Neumann, selected by
//! `PatchInfo::is_neumann`). A same-level neighbor side with no `gamma`
//! override reads the ghost filler's already-deposited ghost cell and
//! applies the same centered-difference formula `interior_strip` uses, so
//! `apply` is correct both for an isolated patch (no neighbors, falls to the
//! boundary formulas) and for a ghost-filled multi-patch domain (the
//! non-Schur Krylov and multigrid-smoothing path). At a refinement
//! interface, the Schur unknown `gamma` for that face stands in for the
//! (otherwise invalid, not-yet-interpolated) ghost value instead.

use std::collections::HashMap;

use crate::local_data::LocalData;
use crate::patch_info::PatchInfo;
use crate::side::Side;

/// The two documented ways to turn the Schur interface unknown `gamma` and
/// the interior values `mid`/`upper` into a second-derivative stencil value
/// at a refinement interface. `Classic` is what the fully specified source
/// uses (a linear ghost extrapolation through `mid` and `gamma`); `Quadratic`
/// additionally uses `upper` for a steeper extrapolation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum RefinementBoundaryScheme {
    Classic,
    Quadratic,
}

impl Default for RefinementBoundaryScheme {
    fn default() -> Self {
        RefinementBoundaryScheme::Classic
    }
}

impl RefinementBoundaryScheme {
    fn interface_term(self, gamma: f64, mid: f64, upper: f64) -> f64 {
        match self {
            RefinementBoundaryScheme::Classic => 2.0 * gamma - 3.0 * mid + upper,
            RefinementBoundaryScheme::Quadratic => {
                (8.0 / 3.0) * gamma - 4.0 * mid + (4.0 / 3.0) * upper
            }
        }
    }
}

/// A per-patch Schur interface value: one `(rank - 1)`-dimensional
/// `LocalData` for each side that borders a refinement interface.
pub type GammaBySide = HashMap<Side, LocalData>;

/// A discretization of an elliptic operator on one patch, used both to
/// compute the patch-interior part of a matrix-free `Ax` and to fold the
/// Schur interface unknowns into that computation.
pub trait PatchOperator {
    /// `f <- A u` on the interior, reading already-filled ghost cells at
    /// same-level neighbor sides and using formula-driven values at
    /// physical boundaries. Does not touch refinement-interface sides
    /// (those need `apply_with_interface` and a `gamma`).
    fn apply(&self, pinfo: &PatchInfo, u: &LocalData, f: &LocalData);

    /// As `apply`, but at each refinement-interface side uses `gamma`'s
    /// value for that side instead of `u`'s (invalid) ghost cells.
    fn apply_with_interface(
        &self,
        pinfo: &PatchInfo,
        u: &LocalData,
        gamma: &GammaBySide,
        f: &LocalData,
    );

    /// Add each interface side's `-2/h^2 * gamma` contribution to `f`,
    /// without touching the interior terms `apply` already computed. Used
    /// to assemble the right-hand side passed to a patch's own local solve.
    fn add_interface_to_rhs(&self, pinfo: &PatchInfo, gamma: &GammaBySide, f: &LocalData);
}

/// The constant-coefficient Poisson star stencil, `-div(grad u)` up to
/// sign (i.e. `apply` computes `+div(grad u)`, matching the source).
pub struct StarPatchOperator {
    pub scheme: RefinementBoundaryScheme,
}

impl StarPatchOperator {
    pub fn new(scheme: RefinementBoundaryScheme) -> Self {
        StarPatchOperator { scheme }
    }
}

impl Default for StarPatchOperator {
    fn default() -> Self {
        StarPatchOperator { scheme: RefinementBoundaryScheme::default() }
    }
}

impl PatchOperator for StarPatchOperator {
    fn apply(&self, pinfo: &PatchInfo, u: &LocalData, f: &LocalData) {
        apply_star(self.scheme, pinfo, u, None, f, Pass::Full);
    }

    fn apply_with_interface(
        &self,
        pinfo: &PatchInfo,
        u: &LocalData,
        gamma: &GammaBySide,
        f: &LocalData,
    ) {
        apply_star(self.scheme, pinfo, u, Some(gamma), f, Pass::Full);
    }

    fn add_interface_to_rhs(&self, pinfo: &PatchInfo, gamma: &GammaBySide, f: &LocalData) {
        for side in Side::values(pinfo.spatial_rank) {
            if pinfo.has_nbr(side) {
                if let Some(g) = gamma.get(&side) {
                    let h2 = pinfo.spacings[side.axis()].powi(2);
                    let slice = f.slice_on_side(side, 0);
                    for coord in g.iter_coords() {
                        let current = slice.get(&coord);
                        slice.set(&coord, current - 2.0 / h2 * g.get(&coord));
                    }
                }
            }
        }
    }
}

/// The physical-boundary counterpart of `add_interface_to_rhs`: `apply`'s
/// boundary formula (`(-3m + up)/h2`) is derived assuming a linear ghost
/// extrapolation through a zero boundary value, `ghost = -m`. A nonzero
/// Dirichlet value `g` at the face shifts that extrapolated ghost cell to
/// `2g - m`, which only changes the formula by `+2g/h2` — exactly the term
/// this adds to `f` at every non-Neumann side with no neighbor at all.
/// `g` is evaluated at each boundary cell's physical position.
pub fn add_dirichlet_boundary_to_rhs(pinfo: &PatchInfo, g: impl Fn(&[f64]) -> f64, f: &LocalData) {
    for side in Side::values(pinfo.spatial_rank) {
        if pinfo.has_nbr(side) || pinfo.is_neumann(side) {
            continue;
        }
        let h2 = pinfo.spacings[side.axis()].powi(2);
        let slice = f.slice_on_side(side, 0);
        for slice_coord in slice.iter_coords() {
            let full_coord = insert_side_coord(pinfo, side, &slice_coord);
            let mut pos = vec![0.0; pinfo.spatial_rank];
            for axis in 0..pinfo.spatial_rank {
                pos[axis] = pinfo.starts[axis] + (full_coord[axis] as f64 + 0.5) * pinfo.spacings[axis];
            }
            let current = slice.get(&slice_coord);
            slice.set(&slice_coord, current + 2.0 / h2 * g(&pos));
        }
    }
}

/// Reinstate the axis `side` dropped when slicing, recovering the full-rank
/// cell coordinate a face-slice coordinate corresponds to.
fn insert_side_coord(pinfo: &PatchInfo, side: Side, slice_coord: &[i64]) -> Vec<i64> {
    let axis = side.axis();
    let mut full = Vec::with_capacity(pinfo.spatial_rank);
    let mut rest = slice_coord.iter();
    for a in 0..pinfo.spatial_rank {
        if a == axis {
            let edge = if side.is_lower() { 0 } else { pinfo.ns[a] as i64 - 1 };
            full.push(edge);
        } else {
            full.push(*rest.next().expect("slice coordinate missing an in-plane axis"));
        }
    }
    full
}

/// A variable-coefficient Poisson star stencil, `div(c(x) grad u)`, using a
/// harmonic average of the per-cell coefficient across each face — the same
/// choice the `VarPoisson::StarPatchOperator` header makes.
pub struct VarPoissonStarPatchOperator {
    pub scheme: RefinementBoundaryScheme,
}

impl VarPoissonStarPatchOperator {
    pub fn new(scheme: RefinementBoundaryScheme) -> Self {
        VarPoissonStarPatchOperator { scheme }
    }

    /// Harmonic average of two per-cell coefficients across a shared face.
    fn harmonic_average(a: f64, b: f64) -> f64 {
        if a == 0.0 || b == 0.0 {
            0.0
        } else {
            2.0 * a * b / (a + b)
        }
    }
}

impl Default for VarPoissonStarPatchOperator {
    fn default() -> Self {
        VarPoissonStarPatchOperator { scheme: RefinementBoundaryScheme::default() }
    }
}

/// Coefficient-aware variant of `apply_star`. Shares the same interface
/// layout as the constant-coefficient operator, reading `coeff`'s ghost
/// cells the same way `u`'s are read.
impl VarPoissonStarPatchOperator {
    pub fn apply(&self, pinfo: &PatchInfo, coeff: &LocalData, u: &LocalData, f: &LocalData) {
        apply_var_star(self.scheme, pinfo, coeff, u, None, f);
    }

    pub fn apply_with_interface(
        &self,
        pinfo: &PatchInfo,
        coeff: &LocalData,
        u: &LocalData,
        gamma: &GammaBySide,
        f: &LocalData,
    ) {
        apply_var_star(self.scheme, pinfo, coeff, u, Some(gamma), f);
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Pass {
    Full,
}

/// Shared implementation for the constant-coefficient operator's `apply`
/// and `apply_with_interface`: axis 0 assigns into `f`, axes `1..rank`
/// accumulate, exactly mirroring the source's loop structure.
fn apply_star(
    scheme: RefinementBoundaryScheme,
    pinfo: &PatchInfo,
    u: &LocalData,
    gamma: Option<&GammaBySide>,
    f: &LocalData,
    _pass: Pass,
) {
    let rank = pinfo.spatial_rank;
    for axis in 0..rank {
        let h2 = pinfo.spacings[axis].powi(2);
        let accumulate = axis != 0;
        face_term(scheme, pinfo, u, gamma, f, axis, true, h2, accumulate);
        interior_strip(u, f, axis, h2, accumulate);
        face_term(scheme, pinfo, u, gamma, f, axis, false, h2, accumulate);
    }
}

fn face_term(
    scheme: RefinementBoundaryScheme,
    pinfo: &PatchInfo,
    u: &LocalData,
    gamma: Option<&GammaBySide>,
    f: &LocalData,
    axis: usize,
    lower: bool,
    h2: f64,
    accumulate: bool,
) {
    let side = if lower { Side::lower(pinfo.spatial_rank, axis) } else { Side::upper(pinfo.spatial_rank, axis) };
    let mid = u.slice_on_side(side, 0);
    let inward = u.slice_on_side(side, 1);
    let f_slice = f.slice_on_side(side, 0);

    let has_gamma = pinfo.has_nbr(side) && gamma.and_then(|g| g.get(&side)).is_some();
    let bnd = if has_gamma { gamma.unwrap().get(&side) } else { None };
    let nbr_ghost = if !has_gamma && pinfo.has_nbr(side) { Some(u.ghost_slice_on_side(side, 1)) } else { None };

    for coord in mid.iter_coords() {
        let m = mid.get(&coord);
        let up = inward.get(&coord);
        let value = if let Some(bnd) = bnd {
            scheme.interface_term(bnd.get(&coord), m, up) / h2
        } else if let Some(ghost) = &nbr_ghost {
            (ghost.get(&coord) - 2.0 * m + up) / h2
        } else if pinfo.is_neumann(side) {
            (-m + up) / h2
        } else {
            (-3.0 * m + up) / h2
        };
        if accumulate {
            f_slice.add_assign(&coord, value);
        } else {
            f_slice.set(&coord, value);
        }
    }
}

fn interior_strip(u: &LocalData, f: &LocalData, axis: usize, h2: f64, accumulate: bool) {
    let lengths = u.lengths();
    if lengths[axis] < 3 {
        return;
    }
    let mut strip_lengths = lengths.to_vec();
    strip_lengths[axis] -= 2;
    for mut coord in crate::local_data::nested_indices(&strip_lengths) {
        coord[axis] += 1;
        let lower = u.get_offset(&coord, axis, -1);
        let mid = u.get(&coord);
        let upper = u.get_offset(&coord, axis, 1);
        let value = (lower - 2.0 * mid + upper) / h2;
        if accumulate {
            f.add_assign(&coord, value);
        } else {
            f.set(&coord, value);
        }
    }
}

fn apply_var_star(
    scheme: RefinementBoundaryScheme,
    pinfo: &PatchInfo,
    coeff: &LocalData,
    u: &LocalData,
    gamma: Option<&GammaBySide>,
    f: &LocalData,
) {
    let rank = pinfo.spatial_rank;
    for axis in 0..rank {
        let h2 = pinfo.spacings[axis].powi(2);
        let accumulate = axis != 0;
        var_face_term(scheme, pinfo, coeff, u, gamma, f, axis, true, h2, accumulate);
        var_interior_strip(coeff, u, f, axis, h2, accumulate);
        var_face_term(scheme, pinfo, coeff, u, gamma, f, axis, false, h2, accumulate);
    }
}

fn var_face_term(
    scheme: RefinementBoundaryScheme,
    pinfo: &PatchInfo,
    coeff: &LocalData,
    u: &LocalData,
    gamma: Option<&GammaBySide>,
    f: &LocalData,
    axis: usize,
    lower: bool,
    h2: f64,
    accumulate: bool,
) {
    let side = if lower { Side::lower(pinfo.spatial_rank, axis) } else { Side::upper(pinfo.spatial_rank, axis) };
    let mid = u.slice_on_side(side, 0);
    let inward = u.slice_on_side(side, 1);
    let c_mid = coeff.slice_on_side(side, 0);
    let c_inward = coeff.slice_on_side(side, 1);
    let f_slice = f.slice_on_side(side, 0);

    let has_gamma = pinfo.has_nbr(side) && gamma.and_then(|g| g.get(&side)).is_some();
    let bnd = if has_gamma { gamma.unwrap().get(&side) } else { None };
    let nbr_ghost = if !has_gamma && pinfo.has_nbr(side) { Some(u.ghost_slice_on_side(side, 1)) } else { None };

    for coord in mid.iter_coords() {
        let m = mid.get(&coord);
        let up = inward.get(&coord);
        let c_face = VarPoissonStarPatchOperator::harmonic_average(c_mid.get(&coord), c_inward.get(&coord));
        let value = if let Some(bnd) = bnd {
            c_face * scheme.interface_term(bnd.get(&coord), m, up) / h2
        } else if let Some(ghost) = &nbr_ghost {
            c_face * (ghost.get(&coord) - 2.0 * m + up) / h2
        } else if pinfo.is_neumann(side) {
            c_face * (-m + up) / h2
        } else {
            c_face * (-3.0 * m + up) / h2
        };
        if accumulate {
            f_slice.add_assign(&coord, value);
        } else {
            f_slice.set(&coord, value);
        }
    }
}

fn var_interior_strip(coeff: &LocalData, u: &LocalData, f: &LocalData, axis: usize, h2: f64, accumulate: bool) {
    let lengths = u.lengths();
    if lengths[axis] < 3 {
        return;
    }
    let mut strip_lengths = lengths.to_vec();
    strip_lengths[axis] -= 2;
    for mut coord in crate::local_data::nested_indices(&strip_lengths) {
        coord[axis] += 1;
        let u_lower = u.get_offset(&coord, axis, -1);
        let u_mid = u.get(&coord);
        let u_upper = u.get_offset(&coord, axis, 1);
        let c_mid = coeff.get(&coord);
        let c_lower = VarPoissonStarPatchOperator::harmonic_average(c_mid, coeff.get_offset(&coord, axis, -1));
        let c_upper = VarPoissonStarPatchOperator::harmonic_average(c_mid, coeff.get_offset(&coord, axis, 1));
        let value = (c_lower * (u_lower - u_mid) + c_upper * (u_upper - u_mid)) / h2;
        if accumulate {
            f.add_assign(&coord, value);
        } else {
            f.set(&coord, value);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::local_data::allocate_patch_storage;

    fn make_patch(lengths: &[usize], spacing: f64, num_ghost: usize) -> (PatchInfo, LocalData) {
        let pinfo = PatchInfo::new(
            0,
            0,
            0,
            lengths.to_vec(),
            vec![0.0; lengths.len()],
            vec![spacing; lengths.len()],
            1,
        );
        let (store, base, strides) = allocate_patch_storage(lengths, num_ghost);
        let ld = LocalData::new(store, base, strides, lengths.to_vec());
        (pinfo, ld)
    }

    #[test]
    fn zero_field_has_zero_laplacian() {
        let (pinfo, u) = make_patch(&[4, 4], 0.5, 1);
        let (store, base, strides) = allocate_patch_storage(&[4, 4], 1);
        let f = LocalData::new(store, base, strides, vec![4, 4]);
        let op = StarPatchOperator::default();
        op.apply(&pinfo, &u, &f);
        for coord in f.iter_coords() {
            assert_eq!(f.get(&coord), 0.0);
        }
    }

    #[test]
    fn neumann_boundary_uses_two_point_formula() {
        let (mut pinfo, u) = make_patch(&[3, 3], 1.0, 1);
        for side in Side::values(2) {
            pinfo.set_neumann(side, true);
        }
        for coord in u.iter_coords() {
            u.set(&coord, 1.0);
        }
        let (store, base, strides) = allocate_patch_storage(&[3, 3], 1);
        let f = LocalData::new(store, base, strides, vec![3, 3]);
        let op = StarPatchOperator::default();
        op.apply(&pinfo, &u, &f);
        // Constant field, Neumann everywhere: every axis contributes
        // (-1+1)/h2 = 0 at boundaries and (1-2+1)/h2 = 0 in the interior.
        for coord in f.iter_coords() {
            assert_eq!(f.get(&coord), 0.0);
        }
    }

    #[test]
    fn normal_neighbor_side_uses_filled_ghost_not_dirichlet_fallback() {
        let (mut pinfo, u) = make_patch(&[3, 3], 1.0, 1);
        let lower_x = Side::lower(2, 0);
        pinfo.set_nbr(lower_x, crate::patch_info::NbrInfo::Normal { id: 99, rank: 0 });
        pinfo.set_neumann(Side::upper(2, 0), true);
        pinfo.set_neumann(Side::lower(2, 1), true);
        pinfo.set_neumann(Side::upper(2, 1), true);

        // u(i, j) = i: affine, constant in j, so the true Laplacian is 0
        // everywhere including at the neighbor face.
        for coord in u.iter_coords() {
            u.set(&coord, coord[0] as f64);
        }
        let ghost = u.ghost_slice_on_side(lower_x, 1);
        for coord in ghost.iter_coords() {
            ghost.set(&coord, -1.0);
        }

        let (store, base, strides) = allocate_patch_storage(&[3, 3], 1);
        let f = LocalData::new(store, base, strides, vec![3, 3]);
        let op = StarPatchOperator::default();
        op.apply(&pinfo, &u, &f);

        let f_lower = f.slice_on_side(lower_x, 0);
        for coord in f_lower.iter_coords() {
            assert_eq!(f_lower.get(&coord), 0.0);
        }
    }
}
