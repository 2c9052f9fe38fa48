//! World data: blocks, chunks and the engine façade
//!
//! The world is an arena of blocks; blocks own the packed voxel buffers;
//! chunks are bookkeeping. All cross-references are indices, never
//! pointers, so parallel tasks share the arena without aliasing hazards.

pub mod block;
pub mod chunk;
#[allow(clippy::module_inception)]
pub mod world;

pub use block::{Block, BlockJob};
pub use chunk::ChunkMeta;
pub use world::{EngineConfig, SimStats, SimStatsSnapshot, World};
pub(crate) use world::{apply_pending_edits, WorldState};
