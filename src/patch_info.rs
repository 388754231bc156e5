//! Metadata describing one patch's place in the domain: its extent, its
//! refinement level, and how each of its sides connects to neighbors.
//!
//! Mirrors `PatchInfo<D>` / `NbrInfo<D>` from the source library, with the
//! neighbor relation expressed as a Rust enum (`NbrInfo`) instead of a
//! `shared_ptr<NbrInfoBase>` with a runtime type tag.

use serde::{Deserialize, Serialize};

use crate::side::{Orthant, Side};

/// How a patch's side connects to the rest of the domain.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum NbrInfo {
    /// No neighbor: this side lies on the physical boundary.
    None,

    /// A single neighbor at the same refinement level.
    Normal { id: u64, rank: usize },

    /// `2^(D-1)` finer neighbors, one per orthant of this side.
    Fine { ids: Vec<u64>, ranks: Vec<usize> },

    /// A single coarser neighbor; `orthant` identifies which orthant of the
    /// coarse neighbor's side this patch occupies.
    Coarse { id: u64, rank: usize, orthant: Orthant },
}

impl NbrInfo {
    pub fn kind_name(&self) -> &'static str {
        match self {
            NbrInfo::None => "none",
            NbrInfo::Normal { .. } => "normal",
            NbrInfo::Fine { .. } => "fine",
            NbrInfo::Coarse { .. } => "coarse",
        }
    }

    pub fn as_normal(&self) -> Result<(u64, usize), crate::error::RuntimeError> {
        match self {
            NbrInfo::Normal { id, rank } => Ok((*id, *rank)),
            other => Err(crate::error::RuntimeError::NbrTypeMismatch {
                accessed: "normal",
                actual: other.kind_name(),
            }),
        }
    }

    pub fn as_fine(&self) -> Result<(&[u64], &[usize]), crate::error::RuntimeError> {
        match self {
            NbrInfo::Fine { ids, ranks } => Ok((ids, ranks)),
            other => Err(crate::error::RuntimeError::NbrTypeMismatch {
                accessed: "fine",
                actual: other.kind_name(),
            }),
        }
    }

    pub fn as_coarse(&self) -> Result<(u64, usize, Orthant), crate::error::RuntimeError> {
        match self {
            NbrInfo::Coarse { id, rank, orthant } => Ok((*id, *rank, *orthant)),
            other => Err(crate::error::RuntimeError::NbrTypeMismatch {
                accessed: "coarse",
                actual: other.kind_name(),
            }),
        }
    }
}

/// A single patch's position, extent, and neighbor topology. Owned by the
/// rank that is responsible for computing on it; ranks that merely need to
/// exchange ghost data with it hold a copy.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PatchInfo {
    /// Globally unique patch id.
    pub id: u64,

    /// The rank that owns (computes on) this patch.
    pub rank: usize,

    /// Refinement level, 0 at the coarsest level.
    pub level: usize,

    /// Dimension rank of the patch (2 or 3).
    pub spatial_rank: usize,

    /// Number of interior cells along each axis.
    pub ns: Vec<usize>,

    /// Physical-space lower corner.
    pub starts: Vec<f64>,

    /// Physical-space cell spacing along each axis.
    pub spacings: Vec<f64>,

    /// Number of scalar fields stored per cell.
    pub num_components: usize,

    /// One neighbor relation per side, indexed by `Side::index()`.
    pub nbr_info: Vec<NbrInfo>,

    /// Whether a physical-boundary side (`NbrInfo::None`) carries a Neumann
    /// condition rather than the default homogeneous Dirichlet condition.
    /// Meaningless on a side with an actual neighbor.
    pub neumann: Vec<bool>,

    /// The orthant this patch occupies among its parent's `2^rank`
    /// children, if it has a parent (`None` at the coarsest level).
    pub parent_orthant: Option<Orthant>,

    pub parent_id: Option<u64>,

    /// The rank that owns this patch's parent, if any. Lets
    /// `InterLevelComm` classify a fine patch as local-parent or
    /// ghost-parent without a separate metadata round trip.
    pub parent_rank: Option<usize>,
}

impl PatchInfo {
    pub fn new(
        id: u64,
        rank: usize,
        level: usize,
        ns: Vec<usize>,
        starts: Vec<f64>,
        spacings: Vec<f64>,
        num_components: usize,
    ) -> Self {
        let spatial_rank = ns.len();
        assert!(spatial_rank == 2 || spatial_rank == 3, "patch rank must be 2 or 3");
        assert_eq!(starts.len(), spatial_rank);
        assert_eq!(spacings.len(), spatial_rank);
        PatchInfo {
            id,
            rank,
            level,
            spatial_rank,
            ns,
            starts,
            spacings,
            num_components,
            nbr_info: vec![NbrInfo::None; 2 * spatial_rank],
            neumann: vec![false; 2 * spatial_rank],
            parent_orthant: None,
            parent_id: None,
            parent_rank: None,
        }
    }

    pub fn nbr(&self, side: Side) -> &NbrInfo {
        &self.nbr_info[side.index()]
    }

    pub fn set_nbr(&mut self, side: Side, info: NbrInfo) {
        self.nbr_info[side.index()] = info;
    }

    pub fn has_nbr(&self, side: Side) -> bool {
        !matches!(self.nbr(side), NbrInfo::None)
    }

    /// Mark a physical-boundary side as Neumann (default is Dirichlet).
    pub fn set_neumann(&mut self, side: Side, neumann: bool) {
        self.neumann[side.index()] = neumann;
    }

    pub fn is_neumann(&self, side: Side) -> bool {
        self.neumann[side.index()]
    }

    /// All ranks, other than this patch's own, that this patch must
    /// exchange ghost data with.
    pub fn nbr_ranks(&self) -> Vec<usize> {
        let mut ranks = Vec::new();
        for info in &self.nbr_info {
            match info {
                NbrInfo::None => {}
                NbrInfo::Normal { rank, .. } => ranks.push(*rank),
                NbrInfo::Fine { ranks: rs, .. } => ranks.extend(rs.iter().copied()),
                NbrInfo::Coarse { rank, .. } => ranks.push(*rank),
            }
        }
        ranks.sort_unstable();
        ranks.dedup();
        ranks
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fresh_patch_has_no_neighbors() {
        let pinfo = PatchInfo::new(1, 0, 0, vec![8, 8], vec![0.0, 0.0], vec![0.125, 0.125], 1);
        for side in Side::values(2) {
            assert!(!pinfo.has_nbr(side));
        }
    }

    #[test]
    fn fine_nbr_info_round_trips() {
        let mut pinfo = PatchInfo::new(1, 0, 0, vec![8, 8], vec![0.0, 0.0], vec![0.125, 0.125], 1);
        let side = Side::lower(2, 0);
        pinfo.set_nbr(side, NbrInfo::Fine { ids: vec![2, 3], ranks: vec![1, 2] });
        let (ids, ranks) = pinfo.nbr(side).as_fine().unwrap();
        assert_eq!(ids, &[2, 3]);
        assert_eq!(ranks, &[1, 2]);
        assert!(pinfo.nbr(side).as_normal().is_err());
    }

    #[test]
    fn nbr_ranks_deduplicated() {
        let mut pinfo = PatchInfo::new(1, 0, 0, vec![8, 8], vec![0.0, 0.0], vec![0.125, 0.125], 1);
        pinfo.set_nbr(Side::lower(2, 0), NbrInfo::Normal { id: 2, rank: 3 });
        pinfo.set_nbr(Side::upper(2, 0), NbrInfo::Normal { id: 4, rank: 3 });
        assert_eq!(pinfo.nbr_ranks(), vec![3]);
    }
}
