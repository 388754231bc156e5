//! The Schur-complement reformulation: instead of solving the full coupled
//! system across all patches at once, introduce one unknown per patch
//! interface (`gamma`), solve each patch independently given its
//! neighbors' interface values, and iterate on `gamma` with a Krylov
//! method driven by the Schur operator `S`.
//!
//! Interface id encoding (`patch_id * num_sides + side.index()`) is pinned
//! down by
//! `examples/original_source/test/Schur/FineIfaceInfo_MPI1.cpp`; the
//! canonical-owner rule for deduplicating an interface shared by two
//! patches (lower id wins for same-level neighbors, the coarser patch
//! always wins at a refinement boundary) is this crate's resolution of the
//! corresponding Open Question (see `DESIGN.md`).

use std::collections::HashMap;

use crate::domain::Domain;
use crate::local_data::{allocate_patch_storage, LocalData};
use crate::patch_info::{NbrInfo, PatchInfo};
use crate::patch_operator::{GammaBySide, PatchOperator};
use crate::side::Side;
use crate::solvers::PatchSolver;

/// Encode a patch/side pair into the globally unique interface id
/// convention confirmed by the source test: `id / num_sides == patch_id`,
/// `id % num_sides == side.index()`.
pub fn encode_iface_id(patch_id: u64, side: Side) -> u64 {
    patch_id * (2 * side.rank() as u64) + side.index() as u64
}

pub fn decode_iface_id(id: u64, rank: usize) -> (u64, usize) {
    let num_sides = 2 * rank as u64;
    ((id / num_sides), (id % num_sides) as usize)
}

/// What sits across a canonical interface from its owning patch/side.
#[derive(Clone, Debug)]
pub enum InterfaceNeighbor {
    Normal { patch_id: u64, side: Side },
    Fine { patch_ids: Vec<u64>, side: Side },
}

/// One entry in the canonical, deduplicated interface enumeration.
#[derive(Clone, Debug)]
pub struct Interface {
    pub id: u64,
    pub owner_patch: u64,
    pub owner_side: Side,
    pub neighbor: InterfaceNeighbor,
}

/// The full set of canonical interfaces a rank's local patches touch.
pub struct InterfaceDomain {
    interfaces: Vec<Interface>,
}

impl InterfaceDomain {
    /// Enumerate one interface per distinct physical face that borders a
    /// neighbor, skipping the duplicate entry a `Normal` pair would
    /// otherwise produce (each side sees the same face) and skipping
    /// `Coarse`-tagged sides entirely (their owning `Fine` entry is
    /// enumerated from the coarser patch instead).
    pub fn build(domain: &Domain) -> Self {
        let mut interfaces = Vec::new();
        for pinfo in domain.local_patches() {
            for side in Side::values(pinfo.spatial_rank) {
                match pinfo.nbr(side) {
                    NbrInfo::None => {}
                    NbrInfo::Coarse { .. } => {}
                    NbrInfo::Normal { id: nbr_id, .. } => {
                        if pinfo.id < *nbr_id {
                            interfaces.push(Interface {
                                id: encode_iface_id(pinfo.id, side),
                                owner_patch: pinfo.id,
                                owner_side: side,
                                neighbor: InterfaceNeighbor::Normal { patch_id: *nbr_id, side },
                            });
                        }
                    }
                    NbrInfo::Fine { ids, .. } => {
                        interfaces.push(Interface {
                            id: encode_iface_id(pinfo.id, side),
                            owner_patch: pinfo.id,
                            owner_side: side,
                            neighbor: InterfaceNeighbor::Fine { patch_ids: ids.clone(), side },
                        });
                    }
                }
            }
        }
        InterfaceDomain { interfaces }
    }

    pub fn interfaces(&self) -> &[Interface] {
        &self.interfaces
    }
}

/// One `(rank - 1)`-dimensional value per canonical interface: the unknown
/// a Krylov method iterates on, and the right-hand side `apply_with_interface`
/// and `add_interface_to_rhs` read from.
///
/// Carries its own communicator so `dot`/`two_norm` can reduce across
/// ranks exactly as `Vector` does, letting both types implement
/// `krylov::KrylovVector` against the same underlying collectives.
pub struct InterfaceVector {
    comm: std::sync::Arc<dyn crate::comm::Communicator>,
    values: HashMap<u64, LocalData>,
}

impl InterfaceVector {
    pub fn zeros(
        comm: std::sync::Arc<dyn crate::comm::Communicator>,
        interfaces: &InterfaceDomain,
        face_lengths: impl Fn(&Interface) -> Vec<usize>,
    ) -> Self {
        let mut values = HashMap::new();
        for iface in interfaces.interfaces() {
            let lengths = face_lengths(iface);
            let (store, base, strides) = allocate_patch_storage(&lengths, 0);
            values.insert(iface.id, LocalData::new(store, base, strides, lengths));
        }
        InterfaceVector { comm, values }
    }

    pub fn get(&self, id: u64) -> Option<&LocalData> {
        self.values.get(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.values.keys().copied()
    }

    /// A fresh zeroed vector with the same set of interfaces as `self`.
    pub fn like_zeros(&self) -> Self {
        let mut values = HashMap::with_capacity(self.values.len());
        for (&id, ld) in &self.values {
            let (store, base, strides) = allocate_patch_storage(ld.lengths(), 0);
            values.insert(id, LocalData::new(store, base, strides, ld.lengths().to_vec()));
        }
        InterfaceVector { comm: self.comm.clone(), values }
    }

    fn zip_mut(&self, other: &Self, f: impl Fn(f64, f64) -> f64) {
        for (id, ld) in &self.values {
            let rhs = other.values.get(id).expect("mismatched interface vector layout");
            for coord in ld.iter_coords() {
                ld.set(&coord, f(ld.get(&coord), rhs.get(&coord)));
            }
        }
    }

    pub fn set(&self, value: f64) {
        for ld in self.values.values() {
            for coord in ld.iter_coords() {
                ld.set(&coord, value);
            }
        }
    }

    pub fn copy_from(&self, other: &Self) {
        self.zip_mut(other, |_, b| b);
    }

    pub fn scale(&self, alpha: f64) {
        for ld in self.values.values() {
            for coord in ld.iter_coords() {
                ld.set(&coord, ld.get(&coord) * alpha);
            }
        }
    }

    pub fn add_scaled(&self, alpha: f64, other: &Self) {
        self.zip_mut(other, move |a, b| a + alpha * b);
    }

    pub fn scale_then_add(&self, alpha: f64, other: &Self) {
        self.zip_mut(other, move |a, b| alpha * a + b);
    }

    pub fn scale_then_add_scaled(&self, alpha: f64, beta: f64, other: &Self) {
        self.zip_mut(other, move |a, b| alpha * a + beta * b);
    }

    pub fn dot(&self, other: &Self) -> f64 {
        let mut local = 0.0;
        for (id, ld) in &self.values {
            let rhs = other.values.get(id).expect("mismatched interface vector layout");
            for coord in ld.iter_coords() {
                local += ld.get(&coord) * rhs.get(&coord);
            }
        }
        crate::comm::all_reduce_sum(self.comm.as_ref(), local)
    }

    pub fn two_norm(&self) -> f64 {
        self.dot(self).sqrt()
    }
}

/// Drives the patch-local solves and assembles the Schur operator.
pub struct SchurHelper<'a> {
    domain: &'a Domain,
    interfaces: &'a InterfaceDomain,
    operator: &'a dyn PatchOperator,
    solver: &'a dyn PatchSolver,
}

impl<'a> SchurHelper<'a> {
    pub fn new(
        domain: &'a Domain,
        interfaces: &'a InterfaceDomain,
        operator: &'a dyn PatchOperator,
        solver: &'a dyn PatchSolver,
    ) -> Self {
        SchurHelper { domain, interfaces, operator, solver }
    }

    /// `S(gamma) = gamma - jump(solve(0, gamma))`: solve each patch's
    /// homogeneous interior problem with `gamma` imposed on its one
    /// interface side, take the resulting one-sided normal-derivative
    /// estimate at that face, and subtract the (averaged, for a
    /// coarse/fine pair) sum of both sides' estimates from `gamma`.
    pub fn apply(&self, gamma: &InterfaceVector) -> InterfaceVector {
        let mut out = HashMap::with_capacity(self.interfaces.interfaces().len());
        for iface in self.interfaces.interfaces() {
            let gamma_face = match gamma.get(iface.id) {
                Some(g) => g,
                None => continue,
            };
            let owner = self.domain.patch_info(iface.owner_patch).expect("owner patch missing");
            let owner_flux = self.one_sided_flux(owner, iface.owner_side, gamma_face, None);

            let jump = match &iface.neighbor {
                InterfaceNeighbor::Normal { patch_id, side } => {
                    let nbr = self.domain.patch_info(*patch_id).expect("neighbor patch missing");
                    let nbr_flux = self.one_sided_flux(nbr, side.opposite(), gamma_face, None);
                    add_face(&owner_flux, &nbr_flux)
                }
                InterfaceNeighbor::Fine { patch_ids, side } => {
                    let mut acc = owner_flux.clone();
                    for fine_id in patch_ids {
                        let fine = self.domain.patch_info(*fine_id).expect("fine patch missing");
                        let fine_flux = self.one_sided_flux(fine, side.opposite(), gamma_face, None);
                        let scaled = scale_face(&fine_flux, 1.0 / patch_ids.len() as f64);
                        acc = add_face(&acc, &scaled);
                    }
                    acc
                }
            };

            let result = subtract_face(gamma_face, &jump);
            out.insert(iface.id, result);
        }
        InterfaceVector { comm: self.domain.communicator().clone(), values: out }
    }

    /// The first half of the double-solve pattern: `b = jump(solve(f, 0))`,
    /// the right-hand side the interface system `S gamma = -b` is driven
    /// against. `f` gives each patch's real interior source term, keyed by
    /// patch id; a patch with no entry solves with a zero source.
    pub fn initial_rhs(&self, f: &HashMap<u64, LocalData>) -> InterfaceVector {
        let mut out = HashMap::with_capacity(self.interfaces.interfaces().len());
        for iface in self.interfaces.interfaces() {
            let owner = self.domain.patch_info(iface.owner_patch).expect("owner patch missing");
            let zero_gamma = zero_face(&owner.ns, iface.owner_side);
            let owner_flux =
                self.one_sided_flux(owner, iface.owner_side, &zero_gamma, f.get(&iface.owner_patch));

            let jump = match &iface.neighbor {
                InterfaceNeighbor::Normal { patch_id, side } => {
                    let nbr = self.domain.patch_info(*patch_id).expect("neighbor patch missing");
                    let nbr_flux =
                        self.one_sided_flux(nbr, side.opposite(), &zero_gamma, f.get(patch_id));
                    add_face(&owner_flux, &nbr_flux)
                }
                InterfaceNeighbor::Fine { patch_ids, side } => {
                    let mut acc = owner_flux.clone();
                    for fine_id in patch_ids {
                        let fine = self.domain.patch_info(*fine_id).expect("fine patch missing");
                        let fine_flux =
                            self.one_sided_flux(fine, side.opposite(), &zero_gamma, f.get(fine_id));
                        let scaled = scale_face(&fine_flux, 1.0 / patch_ids.len() as f64);
                        acc = add_face(&acc, &scaled);
                    }
                    acc
                }
            };
            out.insert(iface.id, jump);
        }
        InterfaceVector { comm: self.domain.communicator().clone(), values: out }
    }

    /// The second half of the double-solve pattern: once `gamma` (normally
    /// `gamma*`, the Krylov solution of `S gamma = -b`) is known, solve
    /// every local patch's interior with its real source term `f` and
    /// `gamma` imposed at each of its interfaces, producing the global
    /// field.
    pub fn patch_solve(&self, f: &HashMap<u64, LocalData>, gamma: &InterfaceVector) -> HashMap<u64, LocalData> {
        let mut out = HashMap::with_capacity(self.domain.num_local_patches());
        for pinfo in self.domain.local_patches() {
            let gamma_by_side = self.gamma_by_side_for(pinfo, gamma);
            let rhs = match f.get(&pinfo.id) {
                Some(source) => source.clone(),
                None => {
                    let (store, base, strides) = allocate_patch_storage(&pinfo.ns, 1);
                    LocalData::new(store, base, strides, pinfo.ns.clone())
                }
            };
            let (store, base, strides) = allocate_patch_storage(&pinfo.ns, 1);
            let u = LocalData::new(store, base, strides, pinfo.ns.clone());
            self.solver.solve(pinfo, self.operator, &rhs, &gamma_by_side, &u);
            out.insert(pinfo.id, u);
        }
        out
    }

    /// Every interface value that bears on `pinfo`'s interior solve,
    /// whether `pinfo` is the interface's owner or its (same-level or
    /// fine-child) neighbor.
    fn gamma_by_side_for(&self, pinfo: &PatchInfo, gamma: &InterfaceVector) -> GammaBySide {
        let mut map = GammaBySide::new();
        for iface in self.interfaces.interfaces() {
            let g = match gamma.get(iface.id) {
                Some(g) => g,
                None => continue,
            };
            if iface.owner_patch == pinfo.id {
                map.insert(iface.owner_side, g.clone());
                continue;
            }
            match &iface.neighbor {
                InterfaceNeighbor::Normal { patch_id, side } if *patch_id == pinfo.id => {
                    map.insert(side.opposite(), g.clone());
                }
                InterfaceNeighbor::Fine { patch_ids, side } if patch_ids.contains(&pinfo.id) => {
                    map.insert(side.opposite(), g.clone());
                }
                _ => {}
            }
        }
        map
    }

    /// Solve `A u = source` (or `A u = 0` when `source` is `None`) on
    /// `pinfo`'s interior with `gamma_face` imposed on `side` (and nothing
    /// imposed on its other sides), then estimate the outward normal
    /// derivative of `u` at that face from `u`'s face and one-in values.
    fn one_sided_flux(
        &self,
        pinfo: &PatchInfo,
        side: Side,
        gamma_face: &LocalData,
        source: Option<&LocalData>,
    ) -> LocalData {
        let (store, base, strides) = allocate_patch_storage(&pinfo.ns, 1);
        let u = LocalData::new(store, base, strides, pinfo.ns.clone());
        let rhs = match source {
            Some(f) => f.clone(),
            None => {
                let (rstore, rbase, rstrides) = allocate_patch_storage(&pinfo.ns, 1);
                LocalData::new(rstore, rbase, rstrides, pinfo.ns.clone())
            }
        };

        let mut gamma_by_side: GammaBySide = HashMap::new();
        gamma_by_side.insert(side, gamma_face.clone());

        self.solver.solve(pinfo, self.operator, &rhs, &gamma_by_side, &u);

        let mid = u.slice_on_side(side, 0);
        let h = pinfo.spacings[side.axis()];
        let (fstore, fbase, fstrides) = allocate_patch_storage(mid.lengths(), 0);
        let flux = LocalData::new(fstore, fbase, fstrides, mid.lengths().to_vec());
        for coord in mid.iter_coords() {
            flux.set(&coord, (gamma_face.get(&coord) - mid.get(&coord)) / h);
        }
        flux
    }
}

/// A zeroed face-shaped `LocalData` for `side` of a patch with interior
/// cell counts `ns`, used as the homogeneous `gamma` the first half of the
/// double-solve pattern needs.
fn zero_face(ns: &[usize], side: Side) -> LocalData {
    let lengths: Vec<usize> =
        ns.iter().enumerate().filter(|&(axis, _)| axis != side.axis()).map(|(_, &n)| n).collect();
    let (store, base, strides) = allocate_patch_storage(&lengths, 0);
    LocalData::new(store, base, strides, lengths)
}

fn add_face(a: &LocalData, b: &LocalData) -> LocalData {
    let (store, base, strides) = allocate_patch_storage(a.lengths(), 0);
    let out = LocalData::new(store, base, strides, a.lengths().to_vec());
    for coord in a.iter_coords() {
        out.set(&coord, a.get(&coord) + b.get(&coord));
    }
    out
}

fn scale_face(a: &LocalData, alpha: f64) -> LocalData {
    let (store, base, strides) = allocate_patch_storage(a.lengths(), 0);
    let out = LocalData::new(store, base, strides, a.lengths().to_vec());
    for coord in a.iter_coords() {
        out.set(&coord, a.get(&coord) * alpha);
    }
    out
}

fn subtract_face(a: &LocalData, b: &LocalData) -> LocalData {
    let (store, base, strides) = allocate_patch_storage(a.lengths(), 0);
    let out = LocalData::new(store, base, strides, a.lengths().to_vec());
    for coord in a.iter_coords() {
        out.set(&coord, a.get(&coord) - b.get(&coord));
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn iface_id_encoding_matches_reference_test() {
        let side = Side::lower(2, 1);
        let id = encode_iface_id(1, side);
        assert_eq!(id / 4, 1);
        assert_eq!(id % 4, side.index() as u64);

        let nbr_ids = [2u64, 3u64];
        for nbr_id in nbr_ids {
            let fine_id = encode_iface_id(nbr_id, side.opposite());
            assert_eq!(fine_id / 4, nbr_id);
            assert_eq!(fine_id % 4, side.opposite().index() as u64);
        }
    }

    #[test]
    fn schur_solve_then_patch_solve_satisfies_interior_residual() {
        use crate::krylov::cg::Cg;
        use crate::krylov::TemplateVectorGenerator;
        use crate::patch_operator::StarPatchOperator;
        use crate::solvers::RelaxedPatchSolver;

        let comm = crate::comm::ThreadCommunicator::world(1).remove(0);
        let mut a = PatchInfo::new(1, 0, 0, vec![6, 6], vec![0.0, 0.0], vec![1.0 / 6.0, 1.0 / 6.0], 1);
        let mut b_patch = PatchInfo::new(2, 0, 0, vec![6, 6], vec![1.0, 0.0], vec![1.0 / 6.0, 1.0 / 6.0], 1);
        a.set_nbr(Side::upper(2, 0), NbrInfo::Normal { id: 2, rank: 0 });
        b_patch.set_nbr(Side::lower(2, 0), NbrInfo::Normal { id: 1, rank: 0 });
        let domain = Domain::new(comm, vec![a, b_patch], vec![], 1).unwrap();
        let interfaces = InterfaceDomain::build(&domain);
        let operator = StarPatchOperator::default();
        let solver = RelaxedPatchSolver::new(500, 1.0);
        let schur = SchurHelper::new(&domain, &interfaces, &operator, &solver);

        let mut f_map = HashMap::new();
        for pinfo in domain.local_patches() {
            let (store, base, strides) = allocate_patch_storage(&pinfo.ns, 1);
            let ld = LocalData::new(store, base, strides, pinfo.ns.clone());
            for coord in ld.iter_coords() {
                ld.set(&coord, 1.0);
            }
            f_map.insert(pinfo.id, ld);
        }

        let b = schur.initial_rhs(&f_map);
        b.scale(-1.0);

        let gamma = b.like_zeros();
        let mut cg = Cg::default();
        cg.set_tolerance(1e-8);
        let vg = TemplateVectorGenerator(&gamma);
        let mut sink = Vec::new();
        cg.solve(&vg, &schur, &gamma, &b, None, false, &mut sink).expect("schur cg should converge");

        let u_map = schur.patch_solve(&f_map, &gamma);

        let mut sq_resid = 0.0;
        let mut sq_f = 0.0;
        for pinfo in domain.local_patches() {
            let u = &u_map[&pinfo.id];
            let gamma_by_side = schur.gamma_by_side_for(pinfo, &gamma);
            let (store, base, strides) = allocate_patch_storage(&pinfo.ns, 1);
            let au = LocalData::new(store, base, strides, pinfo.ns.clone());
            operator.apply_with_interface(pinfo, u, &gamma_by_side, &au);
            let f = &f_map[&pinfo.id];
            for coord in au.iter_coords() {
                let r = au.get(&coord) - f.get(&coord);
                sq_resid += r * r;
                sq_f += f.get(&coord).powi(2);
            }
        }
        let resid_norm = sq_resid.sqrt();
        let f_norm = sq_f.sqrt();
        assert!(
            resid_norm < 1e-2 * f_norm,
            "patch solve with converged gamma should satisfy A u = f: resid {} vs ||f|| {}",
            resid_norm,
            f_norm
        );
    }

    #[test]
    fn normal_interface_enumerated_once() {
        let comm = crate::comm::ThreadCommunicator::world(1).remove(0);
        let mut a = PatchInfo::new(1, 0, 0, vec![4, 4], vec![0.0, 0.0], vec![0.25, 0.25], 1);
        let mut b = PatchInfo::new(2, 0, 0, vec![4, 4], vec![1.0, 0.0], vec![0.25, 0.25], 1);
        a.set_nbr(Side::upper(2, 0), NbrInfo::Normal { id: 2, rank: 0 });
        b.set_nbr(Side::lower(2, 0), NbrInfo::Normal { id: 1, rank: 0 });
        let domain = Domain::new(comm, vec![a, b], vec![], 1).unwrap();
        let ifaces = InterfaceDomain::build(&domain);
        assert_eq!(ifaces.interfaces().len(), 1);
        assert_eq!(ifaces.interfaces()[0].owner_patch, 1);
    }
}
