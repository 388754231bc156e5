//! Scatter/gather of data between one multigrid level and the next,
//! grounded on `examples/original_source/src/ThunderEgg/GMG/InterLevelComm.h`:
//! fine patches are classified as having a *local* parent (same rank, no
//! communication needed) or a *ghost* parent (owned elsewhere), and the two
//! directions of exchange go in opposite directions with opposite merge
//! rules — `getGhostPatches` overwrites, `sendGhostPatches` accumulates.
//!
//! Each direction is guarded by a single-in-flight Start/Finish pair, same
//! as the ghost filler; mismatched calls raise [`RuntimeError`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::comm::Communicator;
use crate::domain::Domain;
use crate::error::RuntimeError;
use crate::local_data::{allocate_patch_storage, nested_indices, LocalData};
use crate::patch_info::PatchInfo;
use crate::vector::Vector;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Exchange {
    GetGhost,
    SendGhost,
}

/// Classifies a rank's fine patches relative to the coarser level below
/// them, and carries out the value exchange in both directions.
pub struct InterLevelComm {
    comm: Arc<dyn Communicator>,
    my_rank: usize,
    /// parent_id -> [(fine_id, fine_rank)], built from every fine patch in
    /// the level (not just this rank's), the same way `Domain` caches
    /// remote neighbor metadata.
    children_by_parent: HashMap<u64, Vec<(u64, usize)>>,
    /// fine_id -> (parent_id, parent_rank), for this rank's own fine
    /// patches only.
    parent_by_local_fine: HashMap<u64, (u64, usize)>,
    state: Mutex<Option<Exchange>>,
}

impl InterLevelComm {
    pub fn new(comm: Arc<dyn Communicator>, all_fine_patches: &[PatchInfo]) -> Self {
        let my_rank = comm.rank();
        let mut children_by_parent: HashMap<u64, Vec<(u64, usize)>> = HashMap::new();
        let mut parent_by_local_fine = HashMap::new();
        for fine in all_fine_patches {
            if let (Some(parent_id), Some(parent_rank)) = (fine.parent_id, fine.parent_rank) {
                children_by_parent.entry(parent_id).or_default().push((fine.id, fine.rank));
                if fine.rank == my_rank {
                    parent_by_local_fine.insert(fine.id, (parent_id, parent_rank));
                }
            }
        }
        InterLevelComm {
            comm,
            my_rank,
            children_by_parent,
            parent_by_local_fine,
            state: Mutex::new(None),
        }
    }

    /// Whether fine patch `fine_id`'s parent lives on this same rank.
    pub fn has_local_parent(&self, fine_id: u64) -> bool {
        matches!(self.parent_by_local_fine.get(&fine_id), Some((_, rank)) if *rank == self.my_rank)
    }

    pub fn parent_of(&self, fine_id: u64) -> Option<(u64, usize)> {
        self.parent_by_local_fine.get(&fine_id).copied()
    }

    fn begin(&self, kind: Exchange) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().unwrap();
        if state.is_some() {
            return Err(RuntimeError::ExchangeInFlight("InterLevelComm".to_string()));
        }
        *state = Some(kind);
        Ok(())
    }

    fn end(&self, kind: Exchange) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().unwrap();
        match *state {
            Some(k) if k == kind => {
                *state = None;
                Ok(())
            }
            Some(_) => Err(RuntimeError::MismatchedExchange("InterLevelComm".to_string())),
            None => Err(RuntimeError::NoExchangeInFlight("InterLevelComm".to_string())),
        }
    }

    pub fn get_ghost_patches_start(&self) -> Result<(), RuntimeError> {
        self.begin(Exchange::GetGhost)
    }

    /// Forward scatter: every rank that owns a coarse patch with children
    /// on other ranks sends that patch's data to them; this rank receives
    /// one copy per distinct remote parent its own fine patches need,
    /// returned keyed by parent id.
    pub fn get_ghost_patches_finish(
        &self,
        coarse_domain: &Domain,
        coarse_vec: &Vector,
    ) -> Result<HashMap<u64, Vec<LocalData>>, RuntimeError> {
        self.end(Exchange::GetGhost)?;

        for pinfo in coarse_domain.local_patches() {
            if let Some(children) = self.children_by_parent.get(&pinfo.id) {
                let dest_ranks: Vec<usize> = {
                    let mut rs: Vec<usize> =
                        children.iter().map(|(_, r)| *r).filter(|&r| r != self.my_rank).collect();
                    rs.sort_unstable();
                    rs.dedup();
                    rs
                };
                if !dest_ranks.is_empty() {
                    let local_idx = coarse_domain.local_index(pinfo.id).unwrap();
                    let components: Vec<LocalData> = (0..coarse_vec.num_components())
                        .map(|c| coarse_vec.local_data(local_idx, c).clone())
                        .collect();
                    let payload = encode_patch_payload(pinfo.id, &pinfo.ns, &components);
                    for rank in dest_ranks {
                        self.comm.send(rank, payload.clone());
                    }
                }
            }
        }

        let needed_parents: Vec<u64> = {
            let mut ids: Vec<u64> = self
                .parent_by_local_fine
                .values()
                .filter(|(_, rank)| *rank != self.my_rank)
                .map(|(id, _)| *id)
                .collect();
            ids.sort_unstable();
            ids.dedup();
            ids
        };

        let mut out = HashMap::with_capacity(needed_parents.len());
        let mut remaining: std::collections::HashSet<u64> = needed_parents.into_iter().collect();
        while !remaining.is_empty() {
            let bytes = self.comm.recv();
            let (id, _lengths, components) = decode_patch_payload(&bytes);
            if remaining.remove(&id) {
                out.insert(id, components);
            } else {
                self.comm.requeue_recv(bytes);
            }
        }
        Ok(out)
    }

    pub fn send_ghost_patches_start(&self) -> Result<(), RuntimeError> {
        self.begin(Exchange::SendGhost)
    }

    /// How many `recv`s `send_ghost_patches_finish` must post for this
    /// rank's local coarse patches: one per distinct remote rank owning a
    /// child of one of them. A caller that already knows this count from
    /// its own bookkeeping may skip calling this and pass its own number.
    pub fn expected_remote_senders(&self, coarse_domain: &Domain) -> usize {
        let mut total = 0;
        for pinfo in coarse_domain.local_patches() {
            if let Some(children) = self.children_by_parent.get(&pinfo.id) {
                let mut rs: Vec<usize> =
                    children.iter().map(|(_, r)| *r).filter(|&r| r != self.my_rank).collect();
                rs.sort_unstable();
                rs.dedup();
                total += rs.len();
            }
        }
        total
    }

    /// Reverse scatter: this rank's fine patches each contribute an
    /// already coarse-shaped payload (typically produced by a
    /// `Restrictor`); contributions for a local parent are added directly,
    /// contributions for a remote parent are sent and must be accumulated
    /// by the parent's owning rank via a matching call with its own
    /// `fine_contributions` map (entries for remote children simply
    /// absent).
    pub fn send_ghost_patches_finish(
        &self,
        coarse_domain: &Domain,
        coarse_vec: &Vector,
        fine_contributions: &HashMap<u64, Vec<LocalData>>,
        expected_remote_senders: usize,
    ) -> Result<(), RuntimeError> {
        self.end(Exchange::SendGhost)?;

        for (&fine_id, components) in fine_contributions {
            match self.parent_by_local_fine.get(&fine_id) {
                Some((parent_id, parent_rank)) if *parent_rank == self.my_rank => {
                    if let Some(local_idx) = coarse_domain.local_index(*parent_id) {
                        for (c, contribution) in components.iter().enumerate() {
                            accumulate_into(coarse_vec.local_data(local_idx, c), contribution);
                        }
                    }
                }
                Some((parent_id, parent_rank)) => {
                    let lengths = components.first().map(|c| c.lengths().to_vec()).unwrap_or_default();
                    let payload = encode_patch_payload(*parent_id, &lengths, components);
                    self.comm.send(*parent_rank, payload);
                }
                None => {}
            }
        }

        for _ in 0..expected_remote_senders {
            let bytes = self.comm.recv();
            let (id, _lengths, components) = decode_patch_payload(&bytes);
            if let Some(local_idx) = coarse_domain.local_index(id) {
                for (c, contribution) in components.iter().enumerate() {
                    accumulate_into(coarse_vec.local_data(local_idx, c), contribution);
                }
            }
        }
        Ok(())
    }
}

fn accumulate_into(dest: &LocalData, contribution: &LocalData) {
    for coord in contribution.iter_coords() {
        dest.add_assign(&coord, contribution.get(&coord));
    }
}

fn encode_patch_payload(id: u64, lengths: &[usize], components: &[LocalData]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&id.to_le_bytes());
    buf.extend_from_slice(&(lengths.len() as u32).to_le_bytes());
    for &l in lengths {
        buf.extend_from_slice(&(l as u32).to_le_bytes());
    }
    buf.extend_from_slice(&(components.len() as u32).to_le_bytes());
    for ld in components {
        for coord in nested_indices(ld.lengths()) {
            buf.extend_from_slice(&ld.get(&coord).to_le_bytes());
        }
    }
    buf
}

fn decode_patch_payload(bytes: &[u8]) -> (u64, Vec<usize>, Vec<LocalData>) {
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

    let id = read_u64(bytes, &mut cursor);
    let rank = read_u32(bytes, &mut cursor) as usize;
    let mut lengths = Vec::with_capacity(rank);
    for _ in 0..rank {
        lengths.push(read_u32(bytes, &mut cursor) as usize);
    }
    let num_components = read_u32(bytes, &mut cursor) as usize;
    let mut components = Vec::with_capacity(num_components);
    for _ in 0..num_components {
        let (store, base, strides) = allocate_patch_storage(&lengths, 0);
        let ld = LocalData::new(store, base, strides, lengths.clone());
        for coord in nested_indices(&lengths) {
            let mut arr = [0u8; 8];
            arr.copy_from_slice(&bytes[cursor..cursor + 8]);
            cursor += 8;
            ld.set(&coord, f64::from_le_bytes(arr));
        }
        components.push(ld);
    }
    (id, lengths, components)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::comm::ThreadCommunicator;
    use std::thread;

    fn fine_patch(id: u64, rank: usize, parent_id: u64, parent_rank: usize) -> PatchInfo {
        let mut p = PatchInfo::new(id, rank, 1, vec![4, 4], vec![0.0, 0.0], vec![0.125, 0.125], 1);
        p.parent_id = Some(parent_id);
        p.parent_rank = Some(parent_rank);
        p
    }

    #[test]
    fn exchange_guard_rejects_double_start() {
        let comm = ThreadCommunicator::world(1).remove(0);
        let ilc = InterLevelComm::new(comm, &[fine_patch(1, 0, 0, 0)]);
        ilc.get_ghost_patches_start().unwrap();
        assert!(ilc.get_ghost_patches_start().is_err());
        let coarse = PatchInfo::new(0, 0, 0, vec![2, 2], vec![0.0, 0.0], vec![0.25, 0.25], 1);
        let domain = Domain::new(ilc.comm.clone(), vec![coarse], vec![], 1).unwrap();
        let cv = Vector::zeros(ilc.comm.clone(), domain.local_patches(), 1, 1);
        ilc.get_ghost_patches_finish(&domain, &cv).unwrap();
    }

    #[test]
    fn local_parent_classification_is_correct() {
        let comm = ThreadCommunicator::world(1).remove(0);
        let ilc = InterLevelComm::new(comm, &[fine_patch(1, 0, 0, 0), fine_patch(2, 0, 5, 1)]);
        assert!(ilc.has_local_parent(1));
        assert!(!ilc.has_local_parent(2));
    }

    #[test]
    fn remote_parent_accumulates_via_communicator() {
        // Two ranks: rank 0 owns the coarse patch, rank 1 owns the one
        // fine child whose restricted contribution must reach rank 0.
        let comms = ThreadCommunicator::world(2);
        let fine_patches = vec![fine_patch(10, 1, 0, 0)];

        let c0 = comms[0].clone();
        let fp0 = fine_patches.clone();
        let h0 = thread::spawn(move || {
            let ilc = InterLevelComm::new(c0.clone(), &fp0);
            let coarse = PatchInfo::new(0, 0, 0, vec![2, 2], vec![0.0, 0.0], vec![0.5, 0.5], 1);
            let domain = Domain::new(c0.clone(), vec![coarse], vec![], 1).unwrap();
            let cv = Vector::zeros(c0, domain.local_patches(), 1, 1);
            ilc.send_ghost_patches_start().unwrap();
            ilc.send_ghost_patches_finish(&domain, &cv, &HashMap::new(), 1).unwrap();
            cv.local_data(0, 0).get(&[0, 0])
        });

        let c1 = comms[1].clone();
        let fp1 = fine_patches.clone();
        let h1 = thread::spawn(move || {
            let ilc = InterLevelComm::new(c1.clone(), &fp1);
            let coarse = PatchInfo::new(0, 0, 0, vec![2, 2], vec![0.0, 0.0], vec![0.5, 0.5], 1);
            let domain = Domain::new(c1, vec![], vec![coarse], 1).unwrap();
            let cv = Vector::zeros(ilc.comm.clone(), &[], 1, 1);
            let (store, base, strides) = allocate_patch_storage(&[2, 2], 0);
            let contribution = LocalData::new(store, base, strides, vec![2, 2]);
            contribution.set(&[0, 0], 7.0);
            let mut contributions = HashMap::new();
            contributions.insert(10u64, vec![contribution]);
            ilc.send_ghost_patches_start().unwrap();
            ilc.send_ghost_patches_finish(&domain, &cv, &contributions, 0).unwrap();
        });

        h1.join().unwrap();
        assert_eq!(h0.join().unwrap(), 7.0);
    }
}
