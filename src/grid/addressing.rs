//! Index arithmetic for the voxel/chunk/block hierarchy.
//!
//! Chunk side K and block side M are powers of two, so all hot-path
//! addressing is bit shifts and masks. A `neighbour_slow` variant with
//! euclidean division exists for runtime dimensions that are not powers
//! of two; tests use it as an oracle for the fast path.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::grid::position::{BlockPos, Direction, VoxelIndices, VoxelPos};

/// Result of resolving one neighbour step. Indices are block-local; when
/// `crossed_block` is set they are valid *as if* the adjacent block
/// existed and the caller combines them with the block-neighbour link (or
/// reports "outside").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NeighbourHop {
    pub chunk: u16,
    pub voxel: u16,
    pub crossed_block: bool,
}

/// Grid dimensions plus the precomputed shifts used by the fast path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridDims {
    chunk_size: u32,
    block_chunks: u32,
    blocks: (u32, u32, u32),
    chunk_shift: u32,
    block_shift: u32,
}

impl GridDims {
    pub fn new(
        chunk_size: u32,
        block_chunks: u32,
        blocks: (u32, u32, u32),
    ) -> EngineResult<Self> {
        if chunk_size == 0 || !chunk_size.is_power_of_two() {
            return Err(EngineError::invalid_config(format!(
                "chunk size {} is not a power of two",
                chunk_size
            )));
        }
        if block_chunks == 0 || !block_chunks.is_power_of_two() {
            return Err(EngineError::invalid_config(format!(
                "block chunk count {} is not a power of two",
                block_chunks
            )));
        }
        if blocks.0 == 0 || blocks.1 == 0 || blocks.2 == 0 {
            return Err(EngineError::invalid_config(format!(
                "world size {:?} has a zero component",
                blocks
            )));
        }
        // Chunk and block ids are u16; keep the composed indices in range.
        let voxels_per_block = (chunk_size as u64 * block_chunks as u64).pow(3);
        if voxels_per_block > u16::MAX as u64 + 1 {
            return Err(EngineError::invalid_config(format!(
                "block of {} voxels exceeds the u16 index space",
                voxels_per_block
            )));
        }
        Ok(Self {
            chunk_size,
            block_chunks,
            blocks,
            chunk_shift: chunk_size.trailing_zeros(),
            block_shift: block_chunks.trailing_zeros(),
        })
    }

    /// Voxels per chunk edge (K)
    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Chunks per block edge (M)
    pub fn block_chunks(&self) -> u32 {
        self.block_chunks
    }

    /// Voxels per block edge
    pub fn block_size(&self) -> u32 {
        self.chunk_size * self.block_chunks
    }

    /// World size in blocks
    pub fn blocks(&self) -> (u32, u32, u32) {
        self.blocks
    }

    pub fn block_count(&self) -> usize {
        (self.blocks.0 * self.blocks.1 * self.blocks.2) as usize
    }

    pub fn voxels_per_chunk(&self) -> usize {
        (self.chunk_size * self.chunk_size * self.chunk_size) as usize
    }

    pub fn chunks_per_block(&self) -> usize {
        (self.block_chunks * self.block_chunks * self.block_chunks) as usize
    }

    pub fn voxels_per_block(&self) -> usize {
        self.voxels_per_chunk() * self.chunks_per_block()
    }

    /// World size in voxels
    pub fn world_size(&self) -> (u32, u32, u32) {
        let s = self.block_size();
        (self.blocks.0 * s, self.blocks.1 * s, self.blocks.2 * s)
    }

    /// Pack chunk-local voxel coordinates into a linear voxel id
    #[inline]
    pub fn voxel_id(&self, x: u32, y: u32, z: u32) -> u16 {
        debug_assert!(x < self.chunk_size && y < self.chunk_size && z < self.chunk_size);
        (x + (z << self.chunk_shift) + (y << (self.chunk_shift * 2))) as u16
    }

    /// Unpack a linear voxel id into chunk-local coordinates
    #[inline]
    pub fn voxel_coords(&self, id: u16) -> (u32, u32, u32) {
        let mask = self.chunk_size - 1;
        let id = id as u32;
        (
            id & mask,
            (id >> (self.chunk_shift * 2)) & mask,
            (id >> self.chunk_shift) & mask,
        )
    }

    /// Pack block-local chunk coordinates into a linear chunk id
    #[inline]
    pub fn chunk_id(&self, x: u32, y: u32, z: u32) -> u16 {
        debug_assert!(x < self.block_chunks && y < self.block_chunks && z < self.block_chunks);
        (x + (z << self.block_shift) + (y << (self.block_shift * 2))) as u16
    }

    /// Unpack a linear chunk id into block-local coordinates
    #[inline]
    pub fn chunk_coords(&self, id: u16) -> (u32, u32, u32) {
        let mask = self.block_chunks - 1;
        let id = id as u32;
        (
            id & mask,
            (id >> (self.block_shift * 2)) & mask,
            (id >> self.block_shift) & mask,
        )
    }

    /// Linear index of a block-local voxel inside the packed block buffer
    /// (chunk-major layout)
    #[inline]
    pub fn buffer_index(&self, chunk: u16, voxel: u16) -> usize {
        chunk as usize * self.voxels_per_chunk() + voxel as usize
    }

    /// Resolve the cell one step in `dir` from (chunk, voxel). Safe at
    /// chunk edges; at block edges `crossed_block` is set and the indices
    /// are returned as if the adjacent block existed.
    #[inline]
    pub fn neighbour(&self, chunk: u16, voxel: u16, dir: Direction) -> NeighbourHop {
        let k = self.chunk_size as i32;
        let m = self.block_chunks as i32;
        let (vx, vy, vz) = self.voxel_coords(voxel);
        let (cx, cy, cz) = self.chunk_coords(chunk);
        let (mut vx, mut vy, mut vz) = (vx as i32, vy as i32, vz as i32);
        let (mut cx, mut cy, mut cz) = (cx as i32, cy as i32, cz as i32);
        let (dx, dy, dz) = dir.offset();
        vx += dx;
        vy += dy;
        vz += dz;

        if vx < 0 {
            vx = k - 1;
            cx -= 1;
        } else if vx >= k {
            vx = 0;
            cx += 1;
        }
        if vy < 0 {
            vy = k - 1;
            cy -= 1;
        } else if vy >= k {
            vy = 0;
            cy += 1;
        }
        if vz < 0 {
            vz = k - 1;
            cz -= 1;
        } else if vz >= k {
            vz = 0;
            cz += 1;
        }

        let mut crossed = false;
        if cx < 0 {
            cx = m - 1;
            crossed = true;
        } else if cx >= m {
            cx = 0;
            crossed = true;
        }
        if cy < 0 {
            cy = m - 1;
            crossed = true;
        } else if cy >= m {
            cy = 0;
            crossed = true;
        }
        if cz < 0 {
            cz = m - 1;
            crossed = true;
        } else if cz >= m {
            cz = 0;
            crossed = true;
        }

        NeighbourHop {
            chunk: self.chunk_id(cx as u32, cy as u32, cz as u32),
            voxel: self.voxel_id(vx as u32, vy as u32, vz as u32),
            crossed_block: crossed,
        }
    }

    /// Linear index of the block at the given block coordinates
    pub fn block_index(&self, pos: BlockPos) -> Option<usize> {
        let (bx, by, bz) = (self.blocks.0 as i32, self.blocks.1 as i32, self.blocks.2 as i32);
        if pos.x < 0 || pos.y < 0 || pos.z < 0 || pos.x >= bx || pos.y >= by || pos.z >= bz {
            return None;
        }
        Some(((pos.y * bz + pos.z) * bx + pos.x) as usize)
    }

    /// Block coordinates of the given linear block index
    pub fn block_pos(&self, index: usize) -> BlockPos {
        let bx = self.blocks.0 as usize;
        let bz = self.blocks.2 as usize;
        BlockPos::new(
            (index % bx) as i32,
            (index / (bx * bz)) as i32,
            ((index / bx) % bz) as i32,
        )
    }

    /// Whether a world voxel position lies inside the world (border
    /// sentinels included)
    pub fn contains(&self, pos: VoxelPos) -> bool {
        let (wx, wy, wz) = self.world_size();
        pos.x >= 0
            && pos.y >= 0
            && pos.z >= 0
            && pos.x < wx as i32
            && pos.y < wy as i32
            && pos.z < wz as i32
    }

    /// Whether a position lies on the one-voxel sentinel frame around the
    /// world. Border cells are never real cells.
    pub fn is_border(&self, pos: VoxelPos) -> bool {
        let (wx, wy, wz) = self.world_size();
        self.contains(pos)
            && (pos.x == 0
                || pos.y == 0
                || pos.z == 0
                || pos.x == wx as i32 - 1
                || pos.y == wy as i32 - 1
                || pos.z == wz as i32 - 1)
    }

    /// Resolve a world voxel position to its (block, chunk, voxel) triple
    pub fn world_to_indices(&self, pos: VoxelPos) -> Option<VoxelIndices> {
        if !self.contains(pos) {
            return None;
        }
        let bs = self.block_size() as i32;
        let block = self.block_index(BlockPos::new(pos.x / bs, pos.y / bs, pos.z / bs))?;
        let (lx, ly, lz) = (
            (pos.x % bs) as u32,
            (pos.y % bs) as u32,
            (pos.z % bs) as u32,
        );
        let chunk = self.chunk_id(
            lx >> self.chunk_shift,
            ly >> self.chunk_shift,
            lz >> self.chunk_shift,
        );
        let mask = self.chunk_size - 1;
        let voxel = self.voxel_id(lx & mask, ly & mask, lz & mask);
        Some(VoxelIndices {
            block,
            chunk,
            voxel,
        })
    }

    /// World voxel position of the given (block, chunk, voxel) triple
    pub fn indices_to_world(&self, indices: VoxelIndices) -> VoxelPos {
        let bp = self.block_pos(indices.block);
        let bs = self.block_size() as i32;
        let k = self.chunk_size as i32;
        let (cx, cy, cz) = self.chunk_coords(indices.chunk);
        let (vx, vy, vz) = self.voxel_coords(indices.voxel);
        VoxelPos::new(
            bp.x * bs + cx as i32 * k + vx as i32,
            bp.y * bs + cy as i32 * k + vy as i32,
            bp.z * bs + cz as i32 * k + vz as i32,
        )
    }
}

/// Neighbour resolution for arbitrary (possibly non-power-of-two) chunk
/// and block sides, using euclidean division. Same packing convention as
/// the fast path: `x + z*K + y*K²` for voxels, `x + z*M + y*M²` for
/// chunks.
pub fn neighbour_slow(
    chunk_size: u32,
    block_chunks: u32,
    chunk: u16,
    voxel: u16,
    dir: Direction,
) -> NeighbourHop {
    let k = chunk_size as i32;
    let m = block_chunks as i32;
    let v = voxel as i32;
    let c = chunk as i32;
    let (vx, vy, vz) = (v % k, v / (k * k), (v / k) % k);
    let (cx, cy, cz) = (c % m, c / (m * m), (c / m) % m);
    let (dx, dy, dz) = dir.offset();

    // Absolute block-local coordinates, then re-split.
    let ax = cx * k + vx + dx;
    let ay = cy * k + vy + dy;
    let az = cz * k + vz + dz;
    let edge = k * m;
    let crossed = ax < 0 || ay < 0 || az < 0 || ax >= edge || ay >= edge || az >= edge;
    let (ax, ay, az) = (
        ax.rem_euclid(edge),
        ay.rem_euclid(edge),
        az.rem_euclid(edge),
    );
    let (cx, cy, cz) = (ax.div_euclid(k), ay.div_euclid(k), az.div_euclid(k));
    let (vx, vy, vz) = (ax.rem_euclid(k), ay.rem_euclid(k), az.rem_euclid(k));
    NeighbourHop {
        chunk: (cx + cz * m + cy * m * m) as u16,
        voxel: (vx + vz * k + vy * k * k) as u16,
        crossed_block: crossed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dims() -> GridDims {
        GridDims::new(8, 2, (2, 1, 1)).expect("valid dims")
    }

    #[test]
    fn rejects_non_power_of_two() {
        assert!(GridDims::new(6, 2, (1, 1, 1)).is_err());
        assert!(GridDims::new(8, 3, (1, 1, 1)).is_err());
        assert!(GridDims::new(0, 2, (1, 1, 1)).is_err());
        assert!(GridDims::new(8, 2, (0, 1, 1)).is_err());
    }

    #[test]
    fn voxel_id_round_trip() {
        let d = dims();
        for y in 0..8 {
            for z in 0..8 {
                for x in 0..8 {
                    assert_eq!(d.voxel_coords(d.voxel_id(x, y, z)), (x, y, z));
                }
            }
        }
    }

    #[test]
    fn chunk_id_round_trip() {
        let d = dims();
        for y in 0..2 {
            for z in 0..2 {
                for x in 0..2 {
                    assert_eq!(d.chunk_coords(d.chunk_id(x, y, z)), (x, y, z));
                }
            }
        }
    }

    #[test]
    fn fast_neighbour_matches_slow_oracle() {
        let d = dims();
        for chunk in 0..d.chunks_per_block() as u16 {
            for voxel in 0..d.voxels_per_chunk() as u16 {
                for dir in Direction::ALL {
                    let fast = d.neighbour(chunk, voxel, dir);
                    let slow = neighbour_slow(8, 2, chunk, voxel, dir);
                    assert_eq!(fast, slow, "chunk {} voxel {} dir {:?}", chunk, voxel, dir);
                }
            }
        }
    }

    #[test]
    fn neighbour_crosses_block_at_edge() {
        let d = dims();
        // Max-X voxel of the max-X chunk.
        let chunk = d.chunk_id(1, 0, 0);
        let voxel = d.voxel_id(7, 3, 3);
        let hop = d.neighbour(chunk, voxel, Direction::PosX);
        assert!(hop.crossed_block);
        assert_eq!(hop.chunk, d.chunk_id(0, 0, 0));
        assert_eq!(hop.voxel, d.voxel_id(0, 3, 3));
        // One step back stays inside.
        let hop = d.neighbour(chunk, voxel, Direction::NegX);
        assert!(!hop.crossed_block);
        assert_eq!(hop.voxel, d.voxel_id(6, 3, 3));
    }

    #[test]
    fn world_round_trip_and_border() {
        let d = dims();
        let pos = VoxelPos::new(17, 9, 4);
        let idx = d.world_to_indices(pos).expect("inside");
        assert_eq!(idx.block, 1);
        assert_eq!(d.indices_to_world(idx), pos);

        assert!(d.is_border(VoxelPos::new(0, 9, 4)));
        assert!(d.is_border(VoxelPos::new(31, 9, 4)));
        assert!(!d.is_border(VoxelPos::new(16, 9, 4)));
        assert!(d.world_to_indices(VoxelPos::new(32, 0, 0)).is_none());
    }

    #[test]
    fn block_index_round_trip() {
        let d = GridDims::new(8, 2, (3, 2, 4)).expect("valid dims");
        for i in 0..d.block_count() {
            assert_eq!(d.block_index(d.block_pos(i)), Some(i));
        }
        assert_eq!(d.block_index(BlockPos::new(-1, 0, 0)), None);
        assert_eq!(d.block_index(BlockPos::new(3, 0, 0)), None);
    }
}
