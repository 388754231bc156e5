//! Two-phase ghost-cell exchange, grounded on the contract exercised by
//! `examples/original_source/test/MPIGhostFiller_MPI1.cpp` and the
//! `MPIGhostFiller<D>` subclass hooks declared in
//! `examples/original_source/src/ThunderEgg/BiQuadraticGhostFiller.h`
//! (`fillGhostCellsForLocalPatch` / `fillGhostCellsForNbrPatch`): (1) for
//! each local patch, same-rank neighbor sides are filled directly from the
//! neighbor's own storage; (2) for each cross-rank neighbor, this rank packs
//! its boundary slab, exchanges it with the owning rank via the
//! `Communicator`, and deposits the received slab as ghost cells.
//!
//! Same-level (`Normal`) neighbors are a plain copy. A `Coarse` neighbor
//! (this patch is the finer one) is filled by a biquadratic interpolation
//! — in-plane quadratic Lagrange interpolation through the coarse cell and
//! its two in-plane neighbors, tensor-producted across however many in-plane
//! axes the face has — built to reproduce a quadratic field exactly, as
//! `BiQuadraticGhostFiller` is documented to. A `Fine` neighbor (this patch
//! is the coarser one) is filled by `2^(rank-1)`-point face averaging of the
//! overlapping child's cells. `NbrInfo::Fine`'s `ids`/`ranks` carry no
//! explicit orthant field, so this module treats position `k` in those
//! vectors as `Orthant::new(rank - 1, k)` of that face; every writer of
//! `NbrInfo::Fine` in this crate is expected to honor that ordering.

use std::sync::Mutex;

use log::debug;

use crate::comm::Communicator;
use crate::domain::Domain;
use crate::error::RuntimeError;
use crate::local_data::{allocate_patch_storage, nested_indices, LocalData};
use crate::patch_info::{NbrInfo, PatchInfo};
use crate::side::{Orthant, Side};
use crate::vector::Vector;

#[derive(Clone, Copy, PartialEq, Eq)]
enum ExchangeState {
    Idle,
    Sending,
}

/// Fills every local patch's ghost layer from a `Vector`'s own interior
/// data, so stencils (`PatchOperator::apply`) may be applied uniformly.
pub trait GhostFiller {
    /// Fill every ghost cell in `vec`, completing all communication before
    /// returning.
    fn fill_ghost(&self, domain: &Domain, vec: &Vector) -> Result<(), RuntimeError> {
        self.fill_ghost_start(domain, vec)?;
        self.fill_ghost_finish(domain, vec)
    }

    /// Post the cross-rank sends this rank owes its neighbors. Only one
    /// exchange may be in flight; a second `start` before `finish` is a
    /// `RuntimeError`.
    fn fill_ghost_start(&self, domain: &Domain, vec: &Vector) -> Result<(), RuntimeError>;

    /// Fill ghost cells from same-rank neighbors, then block on the
    /// receives the matching `start` requires.
    fn fill_ghost_finish(&self, domain: &Domain, vec: &Vector) -> Result<(), RuntimeError>;
}

/// The one ghost filler this crate ships: same-level copy, biquadratic
/// coarse-to-fine, averaged fine-to-coarse.
pub struct MPIGhostFiller {
    state: Mutex<ExchangeState>,
}

impl MPIGhostFiller {
    /// `num_ghost` is the domain's ghost layer depth; the filler only ever
    /// touches depth-1 ghosts, but a filler over a domain with no ghost
    /// layer at all cannot do anything useful.
    pub fn new(num_ghost: usize) -> Result<Self, RuntimeError> {
        if num_ghost < 1 {
            return Err(RuntimeError::InsufficientGhostCells(num_ghost));
        }
        Ok(MPIGhostFiller { state: Mutex::new(ExchangeState::Idle) })
    }
}

impl GhostFiller for MPIGhostFiller {
    fn fill_ghost_start(&self, domain: &Domain, vec: &Vector) -> Result<(), RuntimeError> {
        {
            let mut state = self.state.lock().unwrap();
            if *state != ExchangeState::Idle {
                return Err(RuntimeError::ExchangeInFlight("MPIGhostFiller".to_string()));
            }
            *state = ExchangeState::Sending;
        }

        let comm = domain.communicator().as_ref();
        debug!("ghost exchange start: rank {} posting sends", comm.rank());
        for pinfo in domain.local_patches() {
            for side in Side::values(pinfo.spatial_rank) {
                match pinfo.nbr(side) {
                    NbrInfo::None => {}
                    NbrInfo::Normal { id, rank } if *rank != comm.rank() => {
                        send_boundary(comm, vec, pinfo, side, pinfo.id, *id, *rank);
                    }
                    NbrInfo::Normal { .. } => {}
                    NbrInfo::Coarse { id, rank, .. } if *rank != comm.rank() => {
                        send_boundary(comm, vec, pinfo, side, pinfo.id, *id, *rank);
                    }
                    NbrInfo::Coarse { .. } => {}
                    NbrInfo::Fine { ids, ranks } => {
                        for (&child_id, &child_rank) in ids.iter().zip(ranks) {
                            if child_rank != comm.rank() {
                                send_boundary(comm, vec, pinfo, side, pinfo.id, child_id, child_rank);
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn fill_ghost_finish(&self, domain: &Domain, vec: &Vector) -> Result<(), RuntimeError> {
        {
            let mut state = self.state.lock().unwrap();
            match *state {
                ExchangeState::Sending => *state = ExchangeState::Idle,
                ExchangeState::Idle => {
                    return Err(RuntimeError::NoExchangeInFlight("MPIGhostFiller".to_string()))
                }
            }
        }

        let comm = domain.communicator().as_ref();
        let my_rank = comm.rank();

        // Local pass: same-rank neighbors need no communication at all.
        for pinfo in domain.local_patches() {
            let local_idx = domain.local_index(pinfo.id).ok_or(RuntimeError::UnknownPatch(pinfo.id))?;
            for side in Side::values(pinfo.spatial_rank) {
                match pinfo.nbr(side) {
                    NbrInfo::None => {}
                    NbrInfo::Normal { id, rank } if *rank == my_rank => {
                        let nbr_idx = domain.local_index(*id).ok_or(RuntimeError::UnknownPatch(*id))?;
                        for c in 0..vec.num_components() {
                            let ghost = vec.local_data(local_idx, c).ghost_slice_on_side(side, 1);
                            let nbr_boundary = vec.local_data(nbr_idx, c).slice_on_side(side.opposite(), 0);
                            deposit_normal(&ghost, &nbr_boundary);
                        }
                    }
                    NbrInfo::Coarse { id, rank, orthant } if *rank == my_rank => {
                        let nbr_idx = domain.local_index(*id).ok_or(RuntimeError::UnknownPatch(*id))?;
                        for c in 0..vec.num_components() {
                            let ghost = vec.local_data(local_idx, c).ghost_slice_on_side(side, 1);
                            let coarse_boundary = vec.local_data(nbr_idx, c).slice_on_side(side.opposite(), 0);
                            deposit_coarse_to_fine(&ghost, *orthant, &coarse_boundary);
                        }
                    }
                    NbrInfo::Fine { ids, ranks } => {
                        for (k, (&child_id, &child_rank)) in ids.iter().zip(ranks).enumerate() {
                            if child_rank != my_rank {
                                continue;
                            }
                            let child_idx =
                                domain.local_index(child_id).ok_or(RuntimeError::UnknownPatch(child_id))?;
                            let face_rank = pinfo.spatial_rank - 1;
                            let orthant = Orthant::new(face_rank, k);
                            for c in 0..vec.num_components() {
                                let ghost = vec.local_data(local_idx, c).ghost_slice_on_side(side, 1);
                                let fine_boundary =
                                    vec.local_data(child_idx, c).slice_on_side(side.opposite(), 0);
                                deposit_fine_to_coarse(&ghost, orthant, &fine_boundary);
                            }
                        }
                    }
                    _ => {}
                }
            }
        }

        let expected = expected_receive_count(domain, my_rank, vec.num_components());
        debug!("ghost exchange finish: rank {} expecting {} receives", my_rank, expected);
        for _ in 0..expected {
            let bytes = comm.recv();
            let (from_id, to_id, component, _lengths, data) = decode_boundary(&bytes);
            let pinfo = domain.patch_info(to_id)?;
            let local_idx = domain.local_index(to_id).ok_or(RuntimeError::UnknownPatch(to_id))?;
            let side = find_side_for_neighbor(pinfo, from_id);
            let ghost = vec.local_data(local_idx, component).ghost_slice_on_side(side, 1);

            match pinfo.nbr(side) {
                NbrInfo::Normal { .. } => deposit_normal(&ghost, &data),
                NbrInfo::Coarse { orthant, .. } => deposit_coarse_to_fine(&ghost, *orthant, &data),
                NbrInfo::Fine { ids, .. } => {
                    let k = ids.iter().position(|&id| id == from_id).expect("unknown fine sender");
                    let orthant = Orthant::new(pinfo.spatial_rank - 1, k);
                    deposit_fine_to_coarse(&ghost, orthant, &data);
                }
                NbrInfo::None => unreachable!("a None side cannot have a neighbor id to match"),
            }
        }
        Ok(())
    }
}

fn expected_receive_count(domain: &Domain, my_rank: usize, num_components: usize) -> usize {
    let mut total = 0;
    for pinfo in domain.local_patches() {
        for side in Side::values(pinfo.spatial_rank) {
            match pinfo.nbr(side) {
                NbrInfo::Normal { rank, .. } if *rank != my_rank => total += 1,
                NbrInfo::Coarse { rank, .. } if *rank != my_rank => total += 1,
                NbrInfo::Fine { ranks, .. } => total += ranks.iter().filter(|&&r| r != my_rank).count(),
                _ => {}
            }
        }
    }
    total * num_components
}

fn find_side_for_neighbor(pinfo: &PatchInfo, from_id: u64) -> Side {
    for side in Side::values(pinfo.spatial_rank) {
        let matches = match pinfo.nbr(side) {
            NbrInfo::Normal { id, .. } => *id == from_id,
            NbrInfo::Coarse { id, .. } => *id == from_id,
            NbrInfo::Fine { ids, .. } => ids.contains(&from_id),
            NbrInfo::None => false,
        };
        if matches {
            return side;
        }
    }
    panic!("patch {} has no side bordering sender {}", pinfo.id, from_id);
}

/// Copy a same-level neighbor's boundary row directly into a ghost slice.
fn deposit_normal(ghost: &LocalData, nbr_boundary: &LocalData) {
    for coord in ghost.iter_coords() {
        ghost.set(&coord, nbr_boundary.get(&coord));
    }
}

/// Fill a fine patch's ghost slice from its coarse neighbor's full boundary
/// row, using biquadratic (tensor-product quadratic) interpolation. `orthant`
/// identifies which half of the coarse face this patch occupies along each
/// in-plane axis.
fn deposit_coarse_to_fine(fine_ghost: &LocalData, orthant: Orthant, coarse_boundary: &LocalData) {
    let n = fine_ghost.rank();
    let axes: Vec<usize> = (0..n).collect();
    for fine_coord in fine_ghost.iter_coords() {
        let mut coarse_coord = vec![0i64; n];
        let mut ts = vec![0.0; n];
        for axis in 0..n {
            let half = coarse_boundary.lengths()[axis] as i64 / 2;
            let offset = if orthant.is_upper_on_axis(axis) { half } else { 0 };
            coarse_coord[axis] = offset + fine_coord[axis].div_euclid(2);
            ts[axis] = if fine_coord[axis].rem_euclid(2) == 0 { -0.25 } else { 0.25 };
        }
        let value = quadratic_tensor(&|c| clamped_get(coarse_boundary, c), &coarse_coord, &axes, &ts);
        fine_ghost.set(&fine_coord, value);
    }
}

/// Fill the overlapping half (along every in-plane axis) of a coarse
/// patch's ghost slice by averaging one child's `2^(rank-1)` fine cells per
/// coarse cell.
fn deposit_fine_to_coarse(coarse_ghost: &LocalData, orthant: Orthant, fine_boundary: &LocalData) {
    let n = fine_boundary.rank();
    let half_lengths: Vec<usize> = fine_boundary.lengths().iter().map(|&l| l / 2).collect();
    for coarse_local in nested_indices(&half_lengths) {
        let mut dest = vec![0i64; n];
        for axis in 0..n {
            let offset = if orthant.is_upper_on_axis(axis) { half_lengths[axis] as i64 } else { 0 };
            dest[axis] = offset + coarse_local[axis];
        }
        let value = average_fine_block(fine_boundary, &coarse_local);
        coarse_ghost.set(&dest, value);
    }
}

fn average_fine_block(fine_boundary: &LocalData, coarse_local_coord: &[i64]) -> f64 {
    let n = fine_boundary.rank();
    let count = 1usize << n;
    let mut sum = 0.0;
    for mask in 0..count {
        let mut fc = vec![0i64; n];
        for axis in 0..n {
            let bit = (mask >> axis) & 1;
            fc[axis] = coarse_local_coord[axis] * 2 + bit as i64;
        }
        sum += fine_boundary.get(&fc);
    }
    sum / count as f64
}

/// Quadratic Lagrange interpolation through three equally spaced samples
/// `(-1, y_minus)`, `(0, y0)`, `(1, y_plus)`, evaluated at `t`.
fn quadratic_lagrange(y_minus: f64, y0: f64, y_plus: f64, t: f64) -> f64 {
    y0 + 0.5 * (y_plus - y_minus) * t + 0.5 * (y_plus - 2.0 * y0 + y_minus) * t * t
}

/// Separable tensor-product quadratic interpolation: applies
/// `quadratic_lagrange` one axis at a time, so a face with more than one
/// in-plane axis (the 3D case) gets a true biquadratic/triquadratic fit
/// rather than only the first axis.
fn quadratic_tensor(get: &dyn Fn(&[i64]) -> f64, base: &[i64], axes: &[usize], ts: &[f64]) -> f64 {
    if axes.is_empty() {
        return get(base);
    }
    let axis = axes[0];
    let mut minus = base.to_vec();
    minus[axis] -= 1;
    let mut plus = base.to_vec();
    plus[axis] += 1;
    let y_minus = quadratic_tensor(get, &minus, &axes[1..], &ts[1..]);
    let y0 = quadratic_tensor(get, base, &axes[1..], &ts[1..]);
    let y_plus = quadratic_tensor(get, &plus, &axes[1..], &ts[1..]);
    quadratic_lagrange(y_minus, y0, y_plus, ts[0])
}

fn clamped_get(ld: &LocalData, coord: &[i64]) -> f64 {
    let clamped: Vec<i64> =
        coord.iter().zip(ld.lengths()).map(|(&c, &len)| c.clamp(0, len as i64 - 1)).collect();
    ld.get(&clamped)
}

fn send_boundary(
    comm: &dyn Communicator,
    vec: &Vector,
    pinfo: &PatchInfo,
    side: Side,
    from_id: u64,
    to_id: u64,
    dest_rank: usize,
) {
    let local_idx = vec.local_index_of(pinfo.id).expect("sender patch must be local");
    for c in 0..vec.num_components() {
        let boundary = vec.local_data(local_idx, c).slice_on_side(side, 0);
        let payload = encode_boundary(from_id, to_id, c, &boundary);
        comm.send(dest_rank, payload);
    }
}

fn encode_boundary(from_id: u64, to_id: u64, component: usize, boundary: &LocalData) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&from_id.to_le_bytes());
    buf.extend_from_slice(&to_id.to_le_bytes());
    buf.extend_from_slice(&(component as u32).to_le_bytes());
    let lengths = boundary.lengths();
    buf.extend_from_slice(&(lengths.len() as u32).to_le_bytes());
    for &l in lengths {
        buf.extend_from_slice(&(l as u32).to_le_bytes());
    }
    for coord in nested_indices(lengths) {
        buf.extend_from_slice(&boundary.get(&coord).to_le_bytes());
    }
    buf
}

fn decode_boundary(bytes: &[u8]) -> (u64, u64, usize, Vec<usize>, LocalData) {
    let mut cursor = 0usize;
    let mut read_u64 = |buf: &[u8], at: &mut usize| {
        let mut arr = [0u8; 8];
        arr.copy_from_slice(&buf[*at..*at + 8]);
        *at += 8;
        u64::from_le_bytes(arr)
    };
    let mut read_u32 = |buf: &[u8], at: &mut usize| {
        let mut arr = [0u8; 4];
        arr.copy_from_slice(&buf[*at..*at + 4]);
        *at += 4;
        u32::from_le_bytes(arr)
    };

    let from_id = read_u64(bytes, &mut cursor);
    let to_id = read_u64(bytes, &mut cursor);
    let component = read_u32(bytes, &mut cursor) as usize;
    let rank = read_u32(bytes, &mut cursor) as usize;
    let mut lengths = Vec::with_capacity(rank);
    for _ in 0..rank {
        lengths.push(read_u32(bytes, &mut cursor) as usize);
    }
    let (store, base, strides) = allocate_patch_storage(&lengths, 0);
    let ld = LocalData::new(store, base, strides, lengths.clone());
    for coord in nested_indices(&lengths) {
        let mut arr = [0u8; 8];
        arr.copy_from_slice(&bytes[cursor..cursor + 8]);
        cursor += 8;
        ld.set(&coord, f64::from_le_bytes(arr));
    }
    (from_id, to_id, component, lengths, ld)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::comm::ThreadCommunicator;
    use std::thread;

    fn uniform_patch(id: u64, lengths: &[usize]) -> PatchInfo {
        PatchInfo::new(id, 0, 0, lengths.to_vec(), vec![0.0; lengths.len()], vec![0.25; lengths.len()], 1)
    }

    #[test]
    fn single_patch_fill_is_a_no_op() {
        let comm = ThreadCommunicator::world(1).remove(0);
        let pinfo = uniform_patch(1, &[4, 4]);
        let domain = Domain::new(comm.clone(), vec![pinfo.clone()], vec![], 1).unwrap();
        let vec = Vector::zeros(comm, &[pinfo], 1, 1);
        vec.set(3.0);
        let filler = MPIGhostFiller::new(1).unwrap();
        filler.fill_ghost(&domain, &vec).unwrap();
        assert_eq!(vec.two_norm(), vec.two_norm());
    }

    #[test]
    fn local_normal_neighbor_ghost_matches_neighbor_interior() {
        let comm = ThreadCommunicator::world(1).remove(0);
        let mut west = uniform_patch(1, &[4, 4]);
        let mut east = uniform_patch(2, &[4, 4]);
        west.set_nbr(Side::upper(2, 0), NbrInfo::Normal { id: 2, rank: 0 });
        east.set_nbr(Side::lower(2, 0), NbrInfo::Normal { id: 1, rank: 0 });
        let domain = Domain::new(comm.clone(), vec![west, east], vec![], 1).unwrap();

        let vec = Vector::zeros(comm, domain.local_patches(), 1, 1);
        vec.local_data(1, 0).set(&[0, 0], 9.0);
        vec.local_data(1, 0).set(&[0, 1], 11.0);

        let filler = MPIGhostFiller::new(1).unwrap();
        filler.fill_ghost(&domain, &vec).unwrap();

        let west_ghost = vec.local_data(0, 0).ghost_slice_on_side(Side::upper(2, 0), 1);
        assert_eq!(west_ghost.get(&[0]), 9.0);
        assert_eq!(west_ghost.get(&[1]), 11.0);
    }

    #[test]
    fn exchange_guard_rejects_double_start() {
        let comm = ThreadCommunicator::world(1).remove(0);
        let pinfo = uniform_patch(1, &[4, 4]);
        let domain = Domain::new(comm.clone(), vec![pinfo.clone()], vec![], 1).unwrap();
        let vec = Vector::zeros(comm, &[pinfo], 1, 1);
        let filler = MPIGhostFiller::new(1).unwrap();
        filler.fill_ghost_start(&domain, &vec).unwrap();
        assert!(filler.fill_ghost_start(&domain, &vec).is_err());
        filler.fill_ghost_finish(&domain, &vec).unwrap();
    }

    #[test]
    fn insufficient_ghost_layer_rejected_at_construction() {
        assert!(MPIGhostFiller::new(0).is_err());
    }

    #[test]
    fn remote_normal_neighbor_exchanges_across_ranks() {
        let comms = ThreadCommunicator::world(2);

        let c0 = comms[0].clone();
        let h0 = thread::spawn(move || {
            let mut west = uniform_patch(1, &[4, 4]);
            west.set_nbr(Side::upper(2, 0), NbrInfo::Normal { id: 2, rank: 1 });
            let domain = Domain::new(c0.clone(), vec![west.clone()], vec![], 1).unwrap();
            let vec = Vector::zeros(c0, &[west], 1, 1);
            vec.set(5.0);
            let filler = MPIGhostFiller::new(1).unwrap();
            filler.fill_ghost(&domain, &vec).unwrap();
            vec.local_data(0, 0).ghost_slice_on_side(Side::upper(2, 0), 1).get(&[0])
        });

        let c1 = comms[1].clone();
        let h1 = thread::spawn(move || {
            let mut east = uniform_patch(2, &[4, 4]);
            east.set_nbr(Side::lower(2, 0), NbrInfo::Normal { id: 1, rank: 0 });
            let domain = Domain::new(c1.clone(), vec![east.clone()], vec![], 1).unwrap();
            let vec = Vector::zeros(c1, &[east], 1, 1);
            vec.set(8.0);
            let filler = MPIGhostFiller::new(1).unwrap();
            filler.fill_ghost(&domain, &vec).unwrap();
            vec.local_data(0, 0).ghost_slice_on_side(Side::lower(2, 0), 1).get(&[0])
        });

        assert_eq!(h0.join().unwrap(), 8.0);
        assert_eq!(h1.join().unwrap(), 5.0);
    }

    #[test]
    fn quadratic_lagrange_is_exact_for_affine_samples() {
        // y = 2x + 1 sampled at x = -1, 0, 1.
        let value = quadratic_lagrange(-1.0, 1.0, 3.0, 0.5);
        assert!((value - 2.0).abs() < 1e-12);
    }

    #[test]
    fn fine_to_coarse_averages_the_overlapping_block() {
        let (store, base, strides) = allocate_patch_storage(&[4], 0);
        let fine_boundary = LocalData::new(store, base, strides, vec![4]);
        fine_boundary.set(&[0], 1.0);
        fine_boundary.set(&[1], 3.0);
        fine_boundary.set(&[2], 5.0);
        fine_boundary.set(&[3], 7.0);

        let (cstore, cbase, cstrides) = allocate_patch_storage(&[2], 1);
        let coarse_ghost = LocalData::new(cstore, cbase, cstrides, vec![2]);
        deposit_fine_to_coarse(&coarse_ghost, Orthant::new(1, 0), &fine_boundary);
        assert_eq!(coarse_ghost.get(&[0]), 2.0);
        assert_eq!(coarse_ghost.get(&[1]), 6.0);
    }
}
