//! A rank's view of the patch graph: the patches it owns, plus cached
//! metadata for the neighboring patches other ranks own.
//!
//! Grounded on the patch bookkeeping in the source library's
//! `GMG::InterLevelComm` (`getPatchInfoMap` / `getPatchInfoVector`), which
//! is where patch-id-to-local-index maps and neighbor lookups are built.

use std::collections::HashMap;
use std::sync::Arc;

use crate::comm::Communicator;
use crate::error::RuntimeError;
use crate::patch_info::{NbrInfo, PatchInfo};
use crate::side::Side;

/// The patches a single rank knows about: the ones it owns, and read-only
/// copies of the metadata for neighboring patches owned elsewhere.
pub struct Domain {
    comm: Arc<dyn Communicator>,
    spatial_rank: usize,
    num_ghost: usize,
    patch_infos: Vec<PatchInfo>,
    id_to_local: HashMap<u64, usize>,
    ghost_patch_infos: HashMap<u64, PatchInfo>,
}

impl Domain {
    pub fn new(
        comm: Arc<dyn Communicator>,
        patch_infos: Vec<PatchInfo>,
        ghost_patch_infos: Vec<PatchInfo>,
        num_ghost: usize,
    ) -> Result<Self, RuntimeError> {
        let spatial_rank = patch_infos
            .first()
            .or_else(|| ghost_patch_infos.first())
            .map(|p| p.spatial_rank)
            .unwrap_or(2);
        if spatial_rank != 2 && spatial_rank != 3 {
            return Err(RuntimeError::UnsupportedRank(spatial_rank));
        }

        let mut id_to_local = HashMap::with_capacity(patch_infos.len());
        for (idx, pinfo) in patch_infos.iter().enumerate() {
            if pinfo.spatial_rank != spatial_rank {
                return Err(RuntimeError::UnsupportedRank(pinfo.spatial_rank));
            }
            id_to_local.insert(pinfo.id, idx);
        }

        let ghost_patch_infos =
            ghost_patch_infos.into_iter().map(|p| (p.id, p)).collect::<HashMap<_, _>>();

        Ok(Domain { comm, spatial_rank, num_ghost, patch_infos, id_to_local, ghost_patch_infos })
    }

    pub fn communicator(&self) -> &Arc<dyn Communicator> {
        &self.comm
    }

    pub fn spatial_rank(&self) -> usize {
        self.spatial_rank
    }

    pub fn num_ghost(&self) -> usize {
        self.num_ghost
    }

    pub fn local_patches(&self) -> &[PatchInfo] {
        &self.patch_infos
    }

    pub fn num_local_patches(&self) -> usize {
        self.patch_infos.len()
    }

    pub fn local_index(&self, id: u64) -> Option<usize> {
        self.id_to_local.get(&id).copied()
    }

    /// Look up a patch's metadata, whether it is owned locally or cached
    /// as a ghost copy of a remote patch.
    pub fn patch_info(&self, id: u64) -> Result<&PatchInfo, RuntimeError> {
        if let Some(&idx) = self.id_to_local.get(&id) {
            Ok(&self.patch_infos[idx])
        } else {
            self.ghost_patch_infos.get(&id).ok_or(RuntimeError::UnknownPatch(id))
        }
    }

    pub fn is_local(&self, id: u64) -> bool {
        self.id_to_local.contains_key(&id)
    }

    /// Check that every neighbor relation this rank knows about is
    /// reciprocated correctly by the neighbor it names, wherever that
    /// neighbor's metadata is available to this rank. A `Normal` neighbor
    /// must see this patch back as a `Normal` neighbor on the opposite
    /// side; a `Fine` neighbor's children must each see this patch as
    /// their `Coarse` neighbor with the matching orthant, and vice versa.
    pub fn check_neighbor_symmetry(&self) -> Result<(), RuntimeError> {
        for pinfo in &self.patch_infos {
            for side in Side::values(self.spatial_rank) {
                match pinfo.nbr(side) {
                    NbrInfo::None => {}
                    NbrInfo::Normal { id: nbr_id, .. } => {
                        if let Ok(nbr) = self.patch_info(*nbr_id) {
                            let back = nbr.nbr(side.opposite());
                            match back {
                                NbrInfo::Normal { id, .. } if *id == pinfo.id => {}
                                _ => {
                                    return Err(RuntimeError::Communication(format!(
                                        "patch {} side {:?}: neighbor {} does not reciprocate",
                                        pinfo.id, side, nbr_id
                                    )))
                                }
                            }
                        }
                    }
                    NbrInfo::Fine { ids, .. } => {
                        for fine_id in ids {
                            if let Ok(fine) = self.patch_info(*fine_id) {
                                let back = fine.nbr(side.opposite());
                                match back {
                                    NbrInfo::Coarse { id, .. } if *id == pinfo.id => {}
                                    _ => {
                                        return Err(RuntimeError::Communication(format!(
                                            "patch {} side {:?}: fine neighbor {} does not reciprocate",
                                            pinfo.id, side, fine_id
                                        )))
                                    }
                                }
                            }
                        }
                    }
                    NbrInfo::Coarse { id: nbr_id, .. } => {
                        if let Ok(nbr) = self.patch_info(*nbr_id) {
                            let back = nbr.nbr(side.opposite());
                            match back {
                                NbrInfo::Fine { ids, .. } if ids.contains(&pinfo.id) => {}
                                _ => {
                                    return Err(RuntimeError::Communication(format!(
                                        "patch {} side {:?}: coarse neighbor {} does not reciprocate",
                                        pinfo.id, side, nbr_id
                                    )))
                                }
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::comm::ThreadCommunicator;

    fn base_patch(id: u64) -> PatchInfo {
        PatchInfo::new(id, 0, 0, vec![4, 4], vec![0.0, 0.0], vec![0.25, 0.25], 1)
    }

    #[test]
    fn unknown_patch_lookup_errors() {
        let comm = ThreadCommunicator::world(1).remove(0);
        let domain = Domain::new(comm, vec![base_patch(1)], vec![], 1).unwrap();
        assert!(domain.patch_info(99).is_err());
        assert!(domain.patch_info(1).is_ok());
    }

    #[test]
    fn symmetric_normal_neighbors_pass() {
        let comm = ThreadCommunicator::world(1).remove(0);
        let mut a = base_patch(1);
        let mut b = base_patch(2);
        a.set_nbr(Side::upper(2, 0), NbrInfo::Normal { id: 2, rank: 0 });
        b.set_nbr(Side::lower(2, 0), NbrInfo::Normal { id: 1, rank: 0 });
        let domain = Domain::new(comm, vec![a, b], vec![], 1).unwrap();
        assert!(domain.check_neighbor_symmetry().is_ok());
    }

    #[test]
    fn asymmetric_neighbors_fail() {
        let comm = ThreadCommunicator::world(1).remove(0);
        let mut a = base_patch(1);
        let b = base_patch(2);
        a.set_nbr(Side::upper(2, 0), NbrInfo::Normal { id: 2, rank: 0 });
        // b does not point back to a.
        let domain = Domain::new(comm, vec![a, b], vec![], 1).unwrap();
        assert!(domain.check_neighbor_symmetry().is_err());
    }
}
