use crate::grid::{ChunkRef, Direction, GridDims, VoxelPos};

/// Per-chunk bookkeeping.
///
/// Voxel storage lives in the owning block's packed buffers; a chunk only
/// knows where it is and who its neighbours are. A chunk is "unsettled"
/// iff it is present in its block's dirty set.
#[derive(Debug, Clone)]
pub struct ChunkMeta {
    /// Linear id within the owning block
    pub id: u16,
    /// Arena index of the owning block
    pub block: usize,
    /// World voxel position of this chunk's (0,0,0) voxel
    pub origin: VoxelPos,
    /// Face neighbours, resolved across block boundaries at startup.
    /// `None` on the world hull.
    pub neighbours: [Option<ChunkRef>; 6],
}

impl ChunkMeta {
    /// Build the metadata of one chunk, resolving neighbour links through
    /// the block-neighbour table
    pub fn new(
        dims: &GridDims,
        block: usize,
        block_neighbours: &[Option<usize>; 6],
        id: u16,
    ) -> Self {
        let block_pos = dims.block_pos(block);
        let (cx, cy, cz) = dims.chunk_coords(id);
        let k = dims.chunk_size() as i32;
        let bs = dims.block_size() as i32;
        let origin = VoxelPos::new(
            block_pos.x * bs + cx as i32 * k,
            block_pos.y * bs + cy as i32 * k,
            block_pos.z * bs + cz as i32 * k,
        );

        let m = dims.block_chunks() as i32;
        let mut neighbours = [None; 6];
        for dir in Direction::ALL {
            let (dx, dy, dz) = dir.offset();
            let (nx, ny, nz) = (cx as i32 + dx, cy as i32 + dy, cz as i32 + dz);
            let inside =
                nx >= 0 && ny >= 0 && nz >= 0 && nx < m && ny < m && nz < m;
            neighbours[dir as usize] = if inside {
                Some(ChunkRef {
                    block,
                    chunk: dims.chunk_id(nx as u32, ny as u32, nz as u32),
                })
            } else {
                block_neighbours[dir as usize].map(|nb| ChunkRef {
                    block: nb,
                    chunk: dims.chunk_id(
                        nx.rem_euclid(m) as u32,
                        ny.rem_euclid(m) as u32,
                        nz.rem_euclid(m) as u32,
                    ),
                })
            };
        }

        Self {
            id,
            block,
            origin,
            neighbours,
        }
    }
}
