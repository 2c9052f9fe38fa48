use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};

use crate::component::{ComponentManager, ComponentStatsSnapshot, ComponentSummary};
use crate::constants::fluid::VMAX;
use crate::error::{EngineError, EngineResult};
use crate::grid::{ChunkRef, Direction, GridDims, VoxelIndices, VoxelPos};
use crate::sim::queue::{Edit, PendingEdits};
use crate::sim::scheduler;
use crate::thread_pool::{ThreadPoolConfig, ThreadPoolManager};
use crate::voxel::{FluidTable, Voxel};
use crate::world::block::Block;

/// World construction parameters
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// World size in blocks
    pub size_blocks: (u32, u32, u32),
    /// Edge length of one voxel in metres
    pub voxel_size_m: f32,
    /// Voxels per chunk edge (K, power of two)
    pub chunk_size: u32,
    /// Chunks per block edge (M, power of two)
    pub block_chunks: u32,
    /// Registered fluid types as (viscosity, label) pairs; the first is
    /// the default for `modify_fluid`
    pub fluid_types: Vec<(u8, String)>,
    /// Worker thread override; `None` sizes from the machine
    pub worker_threads: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            size_blocks: (2, 2, 2),
            voxel_size_m: 0.25,
            chunk_size: crate::constants::grid::CHUNK_SIZE,
            block_chunks: crate::constants::grid::BLOCK_CHUNKS,
            fluid_types: FluidTable::default_fluids()
                .entries()
                .to_vec(),
            worker_threads: None,
        }
    }
}

/// Simulation counters, updated by the scheduler with relaxed atomics
#[derive(Debug, Default)]
pub struct SimStats {
    pub ticks: AtomicU64,
    pub ticks_skipped: AtomicU64,
    pub steps: AtomicU64,
    pub chunks_simulated: AtomicU64,
    pub voxels_settled: AtomicU64,
    pub edits_applied: AtomicU64,
}

/// Point-in-time copy of the simulation counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimStatsSnapshot {
    pub ticks: u64,
    pub ticks_skipped: u64,
    pub steps: u64,
    pub chunks_simulated: u64,
    pub voxels_settled: u64,
    pub edits_applied: u64,
}

impl SimStats {
    pub fn snapshot(&self) -> SimStatsSnapshot {
        SimStatsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            ticks_skipped: self.ticks_skipped.load(Ordering::Relaxed),
            steps: self.steps.load(Ordering::Relaxed),
            chunks_simulated: self.chunks_simulated.load(Ordering::Relaxed),
            voxels_settled: self.voxels_settled.load(Ordering::Relaxed),
            edits_applied: self.edits_applied.load(Ordering::Relaxed),
        }
    }
}

/// Shared state behind the `World` façade. Everything the scheduler, the
/// kernel and the component manager touch lives here behind its own lock,
/// so per-block step tasks and per-component update tasks can run in
/// parallel against one `Arc`.
pub(crate) struct WorldState {
    pub dims: GridDims,
    pub voxel_size_m: f32,
    pub fluids: FluidTable,
    pub blocks: Vec<Block>,
    pub pending: PendingEdits,
    pub components: ComponentManager,
    pub stats: SimStats,
    pub in_flight: AtomicBool,
    pub idle_tx: Sender<()>,
    pub idle_rx: Receiver<()>,
    rebuild_tx: Sender<ChunkRef>,
    rebuild_rx: Receiver<ChunkRef>,
}

impl WorldState {
    /// Read one voxel by world position. Outside the world this returns
    /// the invalid sentinel, never an error.
    pub fn voxel(&self, pos: VoxelPos) -> Voxel {
        match self.dims.world_to_indices(pos) {
            Some(idx) => self.voxel_by_indices(idx),
            None => Voxel::invalid(),
        }
    }

    pub fn voxel_by_indices(&self, idx: VoxelIndices) -> Voxel {
        let buf = self.blocks[idx.block].read();
        buf[self.dims.buffer_index(idx.chunk, idx.voxel)]
    }

    /// Mutate one voxel in the read buffer. Only legal between ticks or
    /// during the component phase, when no step task is writing.
    pub fn with_voxel_mut<R>(
        &self,
        pos: VoxelPos,
        f: impl FnOnce(&mut Voxel) -> R,
    ) -> Option<R> {
        let idx = self.dims.world_to_indices(pos)?;
        let block = &self.blocks[idx.block];
        let mut buf = block.front_mut();
        let cell = &mut buf[self.dims.buffer_index(idx.chunk, idx.voxel)];
        if !cell.is_valid() {
            return None;
        }
        Some(f(cell))
    }

    /// Wake a voxel and put its chunk back into the dirty set
    pub fn unsettle_voxel(&self, pos: VoxelPos, amount: i32) {
        if self
            .with_voxel_mut(pos, |v| v.unsettle(amount))
            .is_some()
        {
            self.mark_dirty_at(pos);
        }
    }

    /// Idempotent dirty-set insertion for the chunk containing `pos`
    pub fn mark_dirty_at(&self, pos: VoxelPos) {
        if let Some(idx) = self.dims.world_to_indices(pos) {
            self.blocks[idx.block].mark_chunk_dirty(idx.chunk);
        }
    }

    /// Announce that a chunk needs a mesh rebuild
    pub fn send_rebuild(&self, chunk: ChunkRef) {
        let _ = self.rebuild_tx.send(chunk);
    }
}

/// The public façade of the fluid core.
///
/// Cheap to clone; all state is shared. The surrounding application calls
/// `tick` from its update loop, queues edits at any time, and drains
/// rebuild notifications for its mesher.
#[derive(Clone)]
pub struct World {
    state: Arc<WorldState>,
}

impl World {
    /// Allocate blocks, chunks and voxels, wire neighbour pointers and
    /// establish the border sentinels
    pub fn new(config: EngineConfig) -> EngineResult<Self> {
        if !(config.voxel_size_m > 0.0) {
            return Err(EngineError::invalid_config(format!(
                "voxel size {} m is not positive",
                config.voxel_size_m
            )));
        }
        let dims = GridDims::new(config.chunk_size, config.block_chunks, config.size_blocks)?;
        let fluids = FluidTable::new(config.fluid_types)?;

        let pool_config = match config.worker_threads {
            Some(n) => ThreadPoolConfig::with_total_threads(n),
            None => ThreadPoolConfig::default(),
        };
        if let Err(e) = ThreadPoolManager::initialize(pool_config) {
            log::debug!("[World::new] thread pool manager already initialized: {}", e);
        }

        let mut blocks = Vec::new();
        blocks
            .try_reserve_exact(dims.block_count())
            .map_err(|_| EngineError::ResourceExhausted {
                what: "block arena".to_string(),
            })?;
        for i in 0..dims.block_count() {
            blocks.push(Block::new(&dims, i)?);
        }

        let (idle_tx, idle_rx) = bounded(1);
        let (rebuild_tx, rebuild_rx) = unbounded();
        let state = Arc::new(WorldState {
            dims,
            voxel_size_m: config.voxel_size_m,
            fluids,
            blocks,
            pending: PendingEdits::default(),
            components: ComponentManager::new(),
            stats: SimStats::default(),
            in_flight: AtomicBool::new(false),
            idle_tx,
            idle_rx,
            rebuild_tx,
            rebuild_rx,
        });

        let world = Self { state };
        world.paint_borders();
        let (wx, wy, wz) = world.state.dims.world_size();
        log::info!(
            "[World::new] world ready: {}x{}x{} voxels in {} blocks, {} fluid types",
            wx,
            wy,
            wz,
            world.state.dims.block_count(),
            world.state.fluids.entries().len()
        );
        Ok(world)
    }

    /// Shorthand constructor: world size in blocks, voxel edge length,
    /// fluid table
    pub fn init(
        size_blocks: (u32, u32, u32),
        voxel_size_m: f32,
        fluid_types: Vec<(u8, String)>,
    ) -> EngineResult<Self> {
        Self::new(EngineConfig {
            size_blocks,
            voxel_size_m,
            fluid_types,
            ..EngineConfig::default()
        })
    }

    /// One-voxel sentinel frame around the world; never real cells
    fn paint_borders(&self) {
        let (wx, wy, wz) = self.state.dims.world_size();
        let (wx, wy, wz) = (wx as i32, wy as i32, wz as i32);
        let paint = |pos: VoxelPos| {
            if let Some(idx) = self.state.dims.world_to_indices(pos) {
                let block = &self.state.blocks[idx.block];
                let mut buf = block.front_mut();
                buf[self.state.dims.buffer_index(idx.chunk, idx.voxel)] = Voxel::invalid();
                let mut back = block.back_mut();
                back[self.state.dims.buffer_index(idx.chunk, idx.voxel)] = Voxel::invalid();
            }
        };
        for y in 0..wy {
            for z in 0..wz {
                for x in 0..wx {
                    let on_border = x == 0
                        || y == 0
                        || z == 0
                        || x == wx - 1
                        || y == wy - 1
                        || z == wz - 1;
                    if on_border {
                        paint(VoxelPos::new(x, y, z));
                    }
                }
            }
        }
    }

    pub(crate) fn state(&self) -> &Arc<WorldState> {
        &self.state
    }

    pub fn dims(&self) -> GridDims {
        self.state.dims
    }

    pub fn voxel_size_m(&self) -> f32 {
        self.state.voxel_size_m
    }

    pub fn fluids(&self) -> &FluidTable {
        &self.state.fluids
    }

    /// Read-only voxel snapshot at a world-space point (metres)
    pub fn get_voxel(&self, point: glam::Vec3) -> Voxel {
        self.get_voxel_at(VoxelPos::from_world_pos(point, self.state.voxel_size_m))
    }

    /// Read-only voxel snapshot at world voxel coordinates. Outside the
    /// world this reports the invalid voxel.
    pub fn get_voxel_at(&self, pos: VoxelPos) -> Voxel {
        self.state.voxel(pos)
    }

    /// Read-only voxel snapshot by (block, chunk, voxel) indices.
    /// API-level out-of-range indices raise `OutOfBounds`.
    pub fn get_voxel_by_indices(&self, indices: VoxelIndices) -> EngineResult<Voxel> {
        let dims = &self.state.dims;
        if indices.block >= dims.block_count()
            || indices.chunk as usize >= dims.chunks_per_block()
            || indices.voxel as usize >= dims.voxels_per_chunk()
        {
            return Err(EngineError::out_of_bounds(format!(
                "indices {:?}",
                indices
            )));
        }
        Ok(self.state.voxel_by_indices(indices))
    }

    /// Queue a fluid edit with the world's default fluid type
    pub fn modify_fluid(&self, point: glam::Vec3, add: bool) -> EngineResult<()> {
        let viscosity = self.state.fluids.default_viscosity();
        self.modify_fluid_of(point, viscosity, add)
    }

    /// Queue a fluid edit with an explicit fluid type
    pub fn modify_fluid_of(
        &self,
        point: glam::Vec3,
        viscosity: u8,
        add: bool,
    ) -> EngineResult<()> {
        if !self.state.fluids.contains(viscosity) {
            return Err(EngineError::invalid_config(format!(
                "unknown viscosity tag {}",
                viscosity
            )));
        }
        let pos = VoxelPos::from_world_pos(point, self.state.voxel_size_m);
        self.queue_edit(pos, Edit::Fluid { viscosity, add })
    }

    /// Queue a terrain edit
    pub fn modify_terrain(&self, point: glam::Vec3, add: bool) -> EngineResult<()> {
        let pos = VoxelPos::from_world_pos(point, self.state.voxel_size_m);
        self.queue_edit(pos, Edit::Terrain { add })
    }

    /// Queue terrain removal
    pub fn remove_terrain(&self, point: glam::Vec3) -> EngineResult<()> {
        self.modify_terrain(point, false)
    }

    /// Voxel-addressed variants used by tooling and tests
    pub fn modify_fluid_at(&self, pos: VoxelPos, viscosity: u8, add: bool) -> EngineResult<()> {
        if !self.state.fluids.contains(viscosity) {
            return Err(EngineError::invalid_config(format!(
                "unknown viscosity tag {}",
                viscosity
            )));
        }
        self.queue_edit(pos, Edit::Fluid { viscosity, add })
    }

    pub fn modify_terrain_at(&self, pos: VoxelPos, add: bool) -> EngineResult<()> {
        self.queue_edit(pos, Edit::Terrain { add })
    }

    fn queue_edit(&self, pos: VoxelPos, edit: Edit) -> EngineResult<()> {
        if !self.state.dims.contains(pos) || self.state.dims.is_border(pos) {
            return Err(EngineError::out_of_bounds(format!(
                "edit at {:?} is outside the editable world",
                pos
            )));
        }
        self.state.pending.queue(pos, edit);
        Ok(())
    }

    /// Direct write into the voxel buffers, for tooling, tests and
    /// save-game import. Unlike the queued edits this takes effect
    /// immediately, so the simulation must be drained first (`Conflict`
    /// otherwise). The neighbourhood is woken like a queued edit's.
    pub fn write_voxel(&self, pos: VoxelPos, voxel: Voxel) -> EngineResult<()> {
        if self.state.in_flight.load(Ordering::Acquire) {
            return Err(EngineError::Conflict {
                what: "voxel write while simulation jobs are in flight".to_string(),
            });
        }
        if !self.state.dims.contains(pos) || self.state.dims.is_border(pos) {
            return Err(EngineError::out_of_bounds(format!(
                "write at {:?} is outside the editable world",
                pos
            )));
        }
        let _ = self.state.with_voxel_mut(pos, |v| *v = voxel);
        if !voxel.is_settled() {
            self.state.mark_dirty_at(pos);
            for dir in Direction::ALL {
                self.state.unsettle_voxel(pos.step(dir), voxel.fluid as i32 + 1);
            }
        }
        Ok(())
    }

    /// Idempotent addition to a block's dirty set
    pub fn unsettle_chunk(&self, chunk: ChunkRef) -> EngineResult<()> {
        let dims = &self.state.dims;
        if chunk.block >= dims.block_count() || chunk.chunk as usize >= dims.chunks_per_block() {
            return Err(EngineError::out_of_bounds(format!("chunk {:?}", chunk)));
        }
        self.state.blocks[chunk.block].mark_chunk_dirty(chunk.chunk);
        Ok(())
    }

    /// Advance the simulation. Non-blocking: if the previous tick's jobs
    /// have not drained yet this returns immediately and the simulation
    /// keeps free-running.
    pub fn tick(&self, dt: f32) -> EngineResult<()> {
        scheduler::tick(&self.state, dt)
    }

    /// Block until all outstanding simulation jobs have drained
    pub fn wait_until_quiescent(&self) {
        while self.state.in_flight.load(Ordering::Acquire) {
            let _ = self
                .state
                .idle_rx
                .recv_timeout(std::time::Duration::from_millis(1));
        }
    }

    /// Whether a tick is currently in flight
    pub fn is_idle(&self) -> bool {
        !self.state.in_flight.load(Ordering::Acquire)
    }

    /// Apply queued edits immediately. Fails with `Conflict` while a tick
    /// is in flight; `tick` performs the same drain automatically between
    /// ticks.
    pub fn apply_queued_edits(&self) -> EngineResult<usize> {
        if self.state.in_flight.load(Ordering::Acquire) {
            return Err(EngineError::Conflict {
                what: "edit drain while simulation jobs are in flight".to_string(),
            });
        }
        Ok(apply_pending_edits(&self.state))
    }

    /// Chunks whose meshes need rebuilding since the last drain
    pub fn drain_rebuilds(&self) -> Vec<ChunkRef> {
        let mut out = Vec::new();
        while let Ok(chunk) = self.state.rebuild_rx.try_recv() {
            out.push(chunk);
        }
        out
    }

    pub fn stats(&self) -> SimStatsSnapshot {
        self.state.stats.snapshot()
    }

    pub fn component_stats(&self) -> ComponentStatsSnapshot {
        self.state.components.stats()
    }

    /// Component claiming the voxel at `pos`, if any
    pub fn component_at(&self, pos: VoxelPos) -> Option<u32> {
        self.state.components.component_at(pos)
    }

    /// Snapshot of all live components
    pub fn component_summaries(&self) -> Vec<ComponentSummary> {
        self.state.components.summaries()
    }

    /// Force a component to rebuild its segment topology during the next
    /// maintenance pass
    pub fn mark_component_for_rebuild(&self, id: u32) {
        self.state.components.request_rebuild(id);
    }

    /// Tear down: drain outstanding jobs. Buffers and arenas drop with
    /// the last clone of the world; jobs are never cancelled mid-flight.
    pub fn shutdown(&self) {
        self.wait_until_quiescent();
        log::info!(
            "[World::shutdown] simulation drained after {} ticks",
            self.state.stats.ticks.load(Ordering::Relaxed)
        );
    }
}

/// Drain phase: merge queued writes into the read buffers, wake the
/// touched neighbourhood and flag suspect components for rebuild. Runs
/// only between ticks.
pub(crate) fn apply_pending_edits(state: &WorldState) -> usize {
    let drained = state.pending.drain();
    if drained.is_empty() {
        return 0;
    }
    let mut applied = 0;
    for (pos, edit) in drained {
        let changed = state.with_voxel_mut(pos, |v| {
            match edit {
                Edit::Fluid { viscosity, add: true } => {
                    v.fluid = VMAX;
                    v.viscosity = viscosity;
                }
                Edit::Fluid { add: false, .. } => {
                    v.fluid = 0;
                    v.viscosity = 0;
                }
                Edit::Terrain { add: true } => {
                    v.solid = VMAX;
                }
                Edit::Terrain { add: false } => {
                    v.solid = 0;
                }
            }
            v.unsettle(VMAX as i32);
        });
        if changed.is_none() {
            continue;
        }
        state.mark_dirty_at(pos);
        for dir in Direction::ALL {
            state.unsettle_voxel(pos.step(dir), VMAX as i32);
        }
        if edit.suspects_topology_change() {
            let mut suspects = vec![pos];
            suspects.extend(Direction::ALL.iter().map(|d| pos.step(*d)));
            for p in suspects {
                if let Some(id) = state.components.component_at(p) {
                    state.components.request_rebuild(id);
                }
            }
        }
        applied += 1;
    }
    state
        .stats
        .edits_applied
        .fetch_add(applied as u64, Ordering::Relaxed);
    log::debug!("[World] applied {} queued edits", applied);
    applied
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::fluid::WATER;

    fn small_world() -> World {
        World::new(EngineConfig {
            size_blocks: (1, 1, 1),
            ..EngineConfig::default()
        })
        .expect("world")
    }

    #[test]
    fn border_is_sentinel() {
        let w = small_world();
        assert!(!w.get_voxel_at(VoxelPos::new(0, 0, 0)).is_valid());
        assert!(!w.get_voxel_at(VoxelPos::new(15, 8, 8)).is_valid());
        assert!(w.get_voxel_at(VoxelPos::new(8, 8, 8)).is_valid());
        // Outside the world entirely: invalid, not an error.
        assert!(!w.get_voxel_at(VoxelPos::new(99, 0, 0)).is_valid());
    }

    #[test]
    fn border_edit_is_out_of_bounds() {
        let w = small_world();
        assert!(matches!(
            w.modify_fluid_at(VoxelPos::new(0, 5, 5), WATER, true),
            Err(EngineError::OutOfBounds { .. })
        ));
        assert!(matches!(
            w.modify_terrain_at(VoxelPos::new(8, 99, 8), true),
            Err(EngineError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn unknown_viscosity_is_invalid_config() {
        let w = small_world();
        assert!(matches!(
            w.modify_fluid_at(VoxelPos::new(8, 8, 8), 33, true),
            Err(EngineError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn edits_apply_between_ticks() {
        let w = small_world();
        let pos = VoxelPos::new(8, 8, 8);
        w.modify_fluid_at(pos, WATER, true).expect("queued");
        assert_eq!(w.get_voxel_at(pos).fluid, 0);
        let applied = w.apply_queued_edits().expect("idle");
        assert_eq!(applied, 1);
        let v = w.get_voxel_at(pos);
        assert_eq!(v.fluid, VMAX);
        assert_eq!(v.viscosity, WATER);
        assert!(!v.is_settled());
        // The touched chunk is dirty now.
        let idx = w.dims().world_to_indices(pos).expect("inside");
        assert!(w.state.blocks[idx.block].is_chunk_dirty(idx.chunk));
    }

    #[test]
    fn conflict_while_in_flight() {
        let w = small_world();
        w.state.in_flight.store(true, Ordering::Release);
        assert!(matches!(
            w.apply_queued_edits(),
            Err(EngineError::Conflict { .. })
        ));
        w.state.in_flight.store(false, Ordering::Release);
        assert!(w.apply_queued_edits().is_ok());
    }

    #[test]
    fn get_voxel_by_indices_bounds() {
        let w = small_world();
        let bad = VoxelIndices {
            block: 9,
            chunk: 0,
            voxel: 0,
        };
        assert!(matches!(
            w.get_voxel_by_indices(bad),
            Err(EngineError::OutOfBounds { .. })
        ));
        let good = VoxelIndices {
            block: 0,
            chunk: 0,
            voxel: 0,
        };
        assert!(w.get_voxel_by_indices(good).is_ok());
    }

    #[test]
    fn unsettle_chunk_is_idempotent() {
        let w = small_world();
        let chunk = ChunkRef { block: 0, chunk: 3 };
        w.unsettle_chunk(chunk).expect("in range");
        w.unsettle_chunk(chunk).expect("in range");
        assert_eq!(w.state.blocks[0].dirty_len(), 1);
        assert!(w
            .unsettle_chunk(ChunkRef { block: 5, chunk: 0 })
            .is_err());
    }
}
