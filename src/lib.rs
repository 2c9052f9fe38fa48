//! Cascade Engine: cellular-automaton fluid simulation over destructible
//! voxel terrain.
//!
//! The core is three pieces: the per-voxel flow rules (up, down,
//! sideways) driven by a block-scoped, double-buffered parallel
//! scheduler; settle bookkeeping that freezes inactive regions; and a
//! connected-component tracker that groups settled fluid into bodies and
//! equalizes their free surfaces to imitate pressure. Terrain authoring,
//! meshing and rendering are collaborators on the other side of the
//! `World` façade.

// Core engine modules
pub mod constants;
pub mod error;

// Simulation systems
pub mod component;
pub mod grid;
pub mod persistence;
pub mod sim;
pub mod voxel;
pub mod world;

// Utilities
pub mod thread_pool;

pub use component::{ComponentStatsSnapshot, ComponentSummary};
pub use error::{EngineError, EngineResult};
pub use grid::{BlockPos, ChunkRef, Direction, GridDims, VoxelBox, VoxelIndices, VoxelPos};
pub use persistence::{load_world, load_world_from_path, save_world, save_world_to_path};
pub use sim::SimStep;
pub use voxel::{FluidTable, Voxel};
pub use world::{EngineConfig, SimStatsSnapshot, World};
