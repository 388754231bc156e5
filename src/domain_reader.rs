//! Mesh ingestion boundary. `examples/original_source/test/MPIGhostFiller_MPI1.cpp`
//! and its siblings drive their test cases off three named JSON mesh files
//! (`single_mesh_file`, `refined_mesh_file`, `cross_mesh_file`); the JSON
//! ingestion path itself is explicitly out of scope for this crate (octree
//! refinement and file-format parsing are left to a real `DomainReader`
//! implementation). What ships here is the trait boundary plus a
//! `GridMeshReader` that builds the same three mesh *topologies*
//! programmatically, so the solvers and ghost filler can be exercised the
//! way the seed tests exercise them without a JSON parser in this crate's
//! dependency stack.

use std::sync::Arc;

use crate::comm::Communicator;
use crate::domain::Domain;
use crate::error::RuntimeError;
use crate::patch_info::{NbrInfo, PatchInfo};
use crate::side::{Orthant, Side};

/// Delivers a finished [`Domain`] from some mesh description. The core
/// never reads a mesh file itself; every real ingestion path (JSON,
/// octree forests, simulation restarts) implements this trait.
pub trait DomainReader {
    fn read(&self, comm: Arc<dyn Communicator>) -> Result<Domain, RuntimeError>;
}

/// Builds a uniform `rows x cols` grid of same-level patches, optionally
/// refining a subset of them into `2x2` finer children. Every patch is
/// assigned to rank 0: the three meshes this reader reproduces are all
/// exercised single-rank in `examples/original_source/test/*_MPI1.cpp`, and
/// a reference reader has no basis for choosing a more interesting
/// partition than "ask the caller to redistribute if they need one".
///
/// Only 2D grids are supported: every seed mesh this reader reproduces is
/// 2D, and the refinement wiring below is written against exactly two
/// in-plane axes per face. The rest of the crate stays dimension-generic;
/// this reader is the one place that isn't, which is recorded in
/// `DESIGN.md`.
pub struct GridMeshReader {
    pub rows: usize,
    pub cols: usize,
    pub cells_per_patch: usize,
    pub domain_size: f64,
    pub num_ghost: usize,
    /// `(row, col)` of every base-grid patch to refine into four children.
    pub refine: Vec<(usize, usize)>,
}

impl GridMeshReader {
    /// The single-level 2x2 arrangement of square patches (the seed test
    /// this reproduces uses 32x32-cell patches; `cells_per_patch` is left
    /// open here so smaller grids can exercise the same topology cheaply).
    pub fn uniform_2x2(cells_per_patch: usize) -> Self {
        GridMeshReader {
            rows: 2,
            cols: 2,
            cells_per_patch,
            domain_size: 1.0,
            num_ghost: 1,
            refine: vec![],
        }
    }

    /// The 2x2 base mesh with its northwest patch (row 0, col 0) refined
    /// into four children.
    pub fn nw_refined_2x2(cells_per_patch: usize) -> Self {
        GridMeshReader {
            rows: 2,
            cols: 2,
            cells_per_patch,
            domain_size: 1.0,
            num_ghost: 1,
            refine: vec![(0, 0)],
        }
    }

    /// The 8x8 uniform mesh with five patches, spaced two apart along each
    /// axis through the grid center, refined. Viewed at the patch-grid
    /// scale this traces a plus/cross shape; the patches are kept
    /// non-adjacent so that refining one never needs to rewire a neighbor
    /// side that another refine call has already converted to a
    /// `Fine`/`Coarse` pair (`refine_patch` only rewires a neighbor
    /// starting from a plain `Normal` relation). The spec names this mesh
    /// only descriptively ("refined to form a cross-shaped pattern") with
    /// no surviving mesh file to pin the exact patch selection down; this
    /// choice is recorded here and in `DESIGN.md`.
    pub fn cross_refined_8x8(cells_per_patch: usize) -> Self {
        let c = 4; // 8x8 grid, 0-indexed: rows/cols 3 and 4 straddle the center.
        GridMeshReader {
            rows: 8,
            cols: 8,
            cells_per_patch,
            domain_size: 1.0,
            num_ghost: 1,
            refine: vec![(c, c), (c - 2, c), (c + 2, c), (c, c - 2), (c, c + 2)],
        }
    }
}

impl DomainReader for GridMeshReader {
    fn read(&self, comm: Arc<dyn Communicator>) -> Result<Domain, RuntimeError> {
        let h = self.domain_size / (self.cols * self.cells_per_patch) as f64;
        let n = self.cells_per_patch;

        let mut patches: Vec<Option<PatchInfo>> = Vec::with_capacity(self.rows * self.cols);
        for row in 0..self.rows {
            for col in 0..self.cols {
                let id = (row * self.cols + col) as u64;
                let starts = vec![col as f64 * n as f64 * h, row as f64 * n as f64 * h];
                patches.push(Some(PatchInfo::new(id, 0, 0, vec![n, n], starts, vec![h, h], 1)));
            }
        }

        let grid_id = |row: usize, col: usize| (row * self.cols + col) as u64;
        for row in 0..self.rows {
            for col in 0..self.cols {
                let me = grid_id(row, col);
                if col + 1 < self.cols {
                    let east = grid_id(row, col + 1);
                    set_normal_pair(&mut patches, me, Side::upper(2, 0), east, Side::lower(2, 0));
                }
                if row + 1 < self.rows {
                    let south = grid_id(row + 1, col);
                    set_normal_pair(&mut patches, me, Side::upper(2, 1), south, Side::lower(2, 1));
                }
            }
        }

        let mut next_id = (self.rows * self.cols) as u64;
        for &(row, col) in &self.refine {
            let parent_id = grid_id(row, col);
            next_id = refine_patch(&mut patches, parent_id, next_id, h, n);
        }

        let final_patches: Vec<PatchInfo> = patches.into_iter().flatten().collect();
        Domain::new(comm, final_patches, vec![], self.num_ghost)
    }
}

fn set_normal_pair(
    patches: &mut [Option<PatchInfo>],
    a_id: u64,
    a_side: Side,
    b_id: u64,
    b_side: Side,
) {
    let a_rank = patches[a_id as usize].as_ref().unwrap().rank;
    let b_rank = patches[b_id as usize].as_ref().unwrap().rank;
    patches[a_id as usize]
        .as_mut()
        .unwrap()
        .set_nbr(a_side, NbrInfo::Normal { id: b_id, rank: b_rank });
    patches[b_id as usize]
        .as_mut()
        .unwrap()
        .set_nbr(b_side, NbrInfo::Normal { id: a_id, rank: a_rank });
}

/// Replace `patches[parent_id]` with four same-resolution, half-spacing
/// children, rewiring every side: internal child-to-child faces become
/// `Normal`, and each outer face either stays a physical boundary or is
/// promoted to a `Coarse`/`Fine` pair with whatever patch used to be the
/// parent's `Normal` neighbor on that side. Returns the next free patch id.
fn refine_patch(
    patches: &mut Vec<Option<PatchInfo>>,
    parent_id: u64,
    next_id: u64,
    parent_h: f64,
    n: usize,
) -> u64 {
    let parent = patches[parent_id as usize].take().expect("refining an already-removed patch");
    assert_eq!(parent.spatial_rank, 2, "GridMeshReader only refines 2D grids");

    let child_h = parent_h / 2.0;
    let half_extent = n as f64 * child_h;
    let mut child_ids = [0u64; 4];
    for orthant_idx in 0..4u64 {
        let orthant = Orthant::new(2, orthant_idx as usize);
        let ox = orthant.is_upper_on_axis(0) as u64 as f64;
        let oy = orthant.is_upper_on_axis(1) as u64 as f64;
        let id = next_id + orthant_idx;
        child_ids[orthant_idx as usize] = id;
        let starts = vec![parent.starts[0] + ox * half_extent, parent.starts[1] + oy * half_extent];
        let mut child = PatchInfo::new(id, parent.rank, parent.level + 1, vec![n, n], starts, vec![child_h, child_h], 1);
        child.parent_id = Some(parent.id);
        child.parent_rank = Some(parent.rank);
        child.parent_orthant = Some(orthant);
        while patches.len() <= id as usize {
            patches.push(None);
        }
        patches[id as usize] = Some(child);
    }

    // Internal child-to-child faces (same level, always Normal).
    for axis in 0..2 {
        let other_axis = 1 - axis;
        for other_bit in 0..2u64 {
            let lower_idx = orthant_index(axis, 0, other_axis, other_bit);
            let upper_idx = orthant_index(axis, 1, other_axis, other_bit);
            set_normal_pair(
                patches,
                child_ids[lower_idx],
                Side::upper(2, axis),
                child_ids[upper_idx],
                Side::lower(2, axis),
            );
        }
    }

    // Outer faces: whatever the parent had on each side, translated onto
    // the two children that touch it.
    for side in Side::values(2) {
        let axis = side.axis();
        let other_axis = 1 - axis;
        let touching_bit = if side.is_lower() { 0 } else { 1 };
        let mut touching: Vec<(u64, u64)> = (0..2u64)
            .map(|other_bit| (other_bit, child_ids[orthant_index(axis, touching_bit, other_axis, other_bit)]))
            .collect();
        touching.sort_by_key(|&(other_bit, _)| other_bit);
        let touching_ids: Vec<u64> = touching.iter().map(|&(_, id)| id).collect();

        match parent.nbr(side) {
            NbrInfo::None => {
                for &id in &touching_ids {
                    patches[id as usize].as_mut().unwrap().set_nbr(side, NbrInfo::None);
                    let neumann = parent.is_neumann(side);
                    patches[id as usize].as_mut().unwrap().set_neumann(side, neumann);
                }
            }
            NbrInfo::Normal { id: nbr_id, rank: nbr_rank } => {
                let nbr_id = *nbr_id;
                let nbr_rank = *nbr_rank;
                for (face_orthant_idx, &child_id) in touching_ids.iter().enumerate() {
                    let orthant = Orthant::new(1, face_orthant_idx);
                    patches[child_id as usize].as_mut().unwrap().set_nbr(
                        side,
                        NbrInfo::Coarse { id: nbr_id, rank: nbr_rank, orthant },
                    );
                }
                patches[nbr_id as usize].as_mut().unwrap().set_nbr(
                    side.opposite(),
                    NbrInfo::Fine { ids: touching_ids.clone(), ranks: vec![parent.rank; touching_ids.len()] },
                );
            }
            NbrInfo::Coarse { .. } | NbrInfo::Fine { .. } => {
                panic!("refine_patch only supports refining directly out of a uniform base grid");
            }
        }
    }

    next_id + 4
}

/// Index, within a `2^2`-orthant array, of the child whose bit on `axis` is
/// `axis_bit` and whose bit on `other_axis` is `other_bit`.
fn orthant_index(axis: usize, axis_bit: u64, other_axis: usize, other_bit: u64) -> usize {
    let mut idx = 0usize;
    if axis == 0 {
        idx |= axis_bit as usize;
        idx |= (other_bit as usize) << other_axis;
    } else {
        idx |= (other_bit as usize) << other_axis;
        idx |= (axis_bit as usize) << axis;
    }
    idx
}
