// Cascade Engine Constants - SINGLE SOURCE OF TRUTH
//
// This file contains ALL simulation constants used throughout the engine.
// Tunables live here so the kernel, the scheduler and the component
// manager can never disagree about them.

/// Grid hierarchy constants (defaults; runtime dimensions are validated
/// against the power-of-two requirement in `GridDims::new`)
pub mod grid {
    /// Voxels per chunk edge (K)
    pub const CHUNK_SIZE: u32 = 8;
    /// Chunks per block edge (M)
    pub const BLOCK_CHUNKS: u32 = 2;
    /// Voxels per block edge
    pub const BLOCK_SIZE: u32 = CHUNK_SIZE * BLOCK_CHUNKS;
    /// Voxel count of one chunk
    pub const VOXELS_PER_CHUNK: usize =
        (CHUNK_SIZE * CHUNK_SIZE * CHUNK_SIZE) as usize;
    /// Chunk count of one block
    pub const CHUNKS_PER_BLOCK: usize =
        (BLOCK_CHUNKS * BLOCK_CHUNKS * BLOCK_CHUNKS) as usize;
    /// Voxel count of one block
    pub const VOXELS_PER_BLOCK: usize = VOXELS_PER_CHUNK * CHUNKS_PER_BLOCK;
}

/// Per-voxel fluid model constants
pub mod fluid {
    /// Per-voxel volume ceiling. Half of the u8 range; the upper half is
    /// headroom for transient overflow between kernel writes.
    pub const VMAX: u8 = 127;
    /// Face neighbours of a voxel
    pub const NEIGHBOUR_COUNT: u32 = 6;
    /// Residual fluid at or below this amount is dust and is cleared when
    /// a voxel settles without overflow
    pub const EPSILON: u8 = (NEIGHBOUR_COUNT - 1) as u8;
    /// Divisor of the volume-difference share moved to one horizontal
    /// neighbour (1/5 of the difference, truncated; sub-share residue
    /// stalls and is reclaimed as dust)
    pub const SPREAD_DIVISOR: i32 = (NEIGHBOUR_COUNT - 1) as i32;

    /// Built-in fluid type tags. A viscosity tag of zero means "no fluid";
    /// smaller positive values are more viscous.
    pub const WATER: u8 = 255;
    pub const LAVA: u8 = 20;
}

/// Connected-component tracker constants
pub mod component {
    /// Minimum voxel cardinality for a component to persist past its
    /// grace period
    pub const MIN_COMPONENT_SIZE: u32 = 15;
    /// Grace period (seconds) before undersized components are removed
    pub const MIN_COMPONENT_LIFETIME: f32 = 0.5;
    /// Components at or below this viscosity keep their staircase
    /// surface (lava-class fluids are not equalized)
    pub const MAX_VISCOSITY_NOT_EQUALIZE: u8 = 20;
    /// Intake budget of one maintenance pass
    pub const MAX_VOXELS_PER_ITERATION: usize = super::grid::VOXELS_PER_CHUNK;
    /// Outlet level spread that triggers an equalization pass
    pub const EQUALIZE_SPREAD: i64 = super::fluid::VMAX as i64 / 2;
}

/// Scheduler constants
pub mod sim {
    /// Simulation steps per tick (up, down, sideways)
    pub const STEPS_PER_TICK: usize = 3;
}
