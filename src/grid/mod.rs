//! Grid addressing
//!
//! Block/chunk/voxel indexing and neighbour resolution across chunk and
//! block boundaries. Everything here is index arithmetic; no voxel storage
//! lives in this module.

pub mod addressing;
pub mod position;

pub use addressing::{neighbour_slow, GridDims, NeighbourHop};
pub use position::{BlockPos, ChunkRef, Direction, VoxelBox, VoxelIndices, VoxelPos};
