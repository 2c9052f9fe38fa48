use parking_lot::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use rustc_hash::FxHashSet;

use crate::error::{EngineError, EngineResult};
use crate::grid::{BlockPos, ChunkRef, GridDims, VoxelPos};
use crate::voxel::Voxel;
use crate::world::chunk::ChunkMeta;

/// Per-tick job state of one block: the frozen plan plus the append-only
/// outputs the kernel produces while executing it.
#[derive(Debug)]
pub struct BlockJob {
    /// Chunks to simulate this tick, frozen at plan time
    pub plan: Vec<u16>,
    /// Chunks (own or neighbouring blocks') to mark dirty during
    /// maintenance
    pub chunks_to_unsettle: FxHashSet<ChunkRef>,
    /// Block-local buffer indices of voxels that settled with fluid this
    /// tick, bound for the component manager's intake
    pub voxels_to_process: Vec<u16>,
}

impl BlockJob {
    pub fn with_plan(plan: Vec<u16>) -> EngineResult<Self> {
        let mut voxels_to_process = Vec::new();
        // Allocation failures leave the block at last-known-good state;
        // the scheduler retries next tick.
        voxels_to_process
            .try_reserve(plan.len())
            .map_err(|_| EngineError::ResourceExhausted {
                what: "block job voxel list".to_string(),
            })?;
        Ok(Self {
            plan,
            chunks_to_unsettle: FxHashSet::default(),
            voxels_to_process,
        })
    }
}

/// The unit of simulation parallelism: M³ chunks of K³ voxels in one
/// contiguous double-buffered array, scheduled as one task per step.
///
/// `front` is the externally visible read buffer; `back` is written by
/// this block's step task only and swapped into place at each step
/// barrier. The dirty set is the incoming `UnsettledChunks` collection,
/// mutated concurrently by maintenance tasks and external callers.
pub struct Block {
    pub index: usize,
    pub pos: BlockPos,
    /// World voxel position of this block's (0,0,0) voxel
    pub origin: VoxelPos,
    /// Face-adjacent blocks in the arena, `None` on the world hull
    pub neighbours: [Option<usize>; 6],
    pub chunks: Vec<ChunkMeta>,
    front: RwLock<Vec<Voxel>>,
    back: Mutex<Vec<Voxel>>,
    dirty: Mutex<FxHashSet<u16>>,
    pub(crate) job: Mutex<Option<BlockJob>>,
}

impl Block {
    pub fn new(dims: &GridDims, index: usize) -> EngineResult<Self> {
        let pos = dims.block_pos(index);
        let bs = dims.block_size() as i32;
        let origin = VoxelPos::new(pos.x * bs, pos.y * bs, pos.z * bs);

        let mut neighbours = [None; 6];
        for dir in crate::grid::Direction::ALL {
            let (dx, dy, dz) = dir.offset();
            neighbours[dir as usize] = dims.block_index(pos.offset(dx, dy, dz));
        }

        let chunks = (0..dims.chunks_per_block() as u16)
            .map(|id| ChunkMeta::new(dims, index, &neighbours, id))
            .collect();

        let n = dims.voxels_per_block();
        let alloc = |what: &str| EngineError::ResourceExhausted {
            what: what.to_string(),
        };
        let mut front = Vec::new();
        front
            .try_reserve_exact(n)
            .map_err(|_| alloc("block read buffer"))?;
        front.resize(n, Voxel::air());
        let mut back = Vec::new();
        back.try_reserve_exact(n)
            .map_err(|_| alloc("block write buffer"))?;
        back.resize(n, Voxel::air());

        Ok(Self {
            index,
            pos,
            origin,
            neighbours,
            chunks,
            front: RwLock::new(front),
            back: Mutex::new(back),
            dirty: Mutex::new(FxHashSet::default()),
            job: Mutex::new(None),
        })
    }

    /// Read view of the current state. During a step this is the snapshot
    /// every kernel task sees; between steps it is the step-boundary
    /// buffer.
    pub fn read(&self) -> RwLockReadGuard<'_, Vec<Voxel>> {
        self.front.read()
    }

    /// Mutable access to the read buffer, for external writes between
    /// ticks (queued-edit drain, persistence load)
    pub(crate) fn front_mut(&self) -> RwLockWriteGuard<'_, Vec<Voxel>> {
        self.front.write()
    }

    /// Mutable access to the write buffer; only this block's step task
    /// takes it during a step
    pub(crate) fn back_mut(&self) -> MutexGuard<'_, Vec<Voxel>> {
        self.back.lock()
    }

    /// Exchange read and write buffers. Called by the scheduler at step
    /// barriers, never while step tasks are running.
    pub(crate) fn swap_buffers(&self) {
        let mut back = self.back.lock();
        let mut front = self.front.write();
        std::mem::swap(&mut *front, &mut *back);
    }

    /// Restore the write buffer to a full mirror of the read buffer.
    /// Called at plan time: every cell outside the tick's plan is then
    /// identical in both buffers, so the per-step swaps cannot rotate a
    /// stale region (or an externally edited one) into the visible
    /// buffer, no matter how many steps the tick runs.
    pub(crate) fn mirror_front_to_back(&self) {
        let mut back = self.back.lock();
        let front = self.front.read();
        back.copy_from_slice(front.as_slice());
    }

    /// Idempotent insertion into the dirty set; returns whether the chunk
    /// was newly marked
    pub fn mark_chunk_dirty(&self, chunk: u16) -> bool {
        self.dirty.lock().insert(chunk)
    }

    pub fn dirty_len(&self) -> usize {
        self.dirty.lock().len()
    }

    pub fn is_chunk_dirty(&self, chunk: u16) -> bool {
        self.dirty.lock().contains(&chunk)
    }

    /// Drain the incoming dirty set (plan phase)
    pub(crate) fn take_dirty(&self) -> FxHashSet<u16> {
        std::mem::take(&mut *self.dirty.lock())
    }

    /// Put a drained dirty set back (job creation failed; retry next tick)
    pub(crate) fn restore_dirty(&self, set: FxHashSet<u16>) {
        self.dirty.lock().extend(set);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_wiring() {
        let dims = GridDims::new(8, 2, (2, 1, 1)).expect("valid dims");
        let b0 = Block::new(&dims, 0).expect("block");
        let b1 = Block::new(&dims, 1).expect("block");
        assert_eq!(b0.neighbours[crate::grid::Direction::PosX as usize], Some(1));
        assert_eq!(b1.neighbours[crate::grid::Direction::NegX as usize], Some(0));
        assert_eq!(b1.origin, VoxelPos::new(16, 0, 0));
        assert_eq!(b0.chunks.len(), 8);
        assert_eq!(b0.read().len(), dims.voxels_per_block());
    }

    #[test]
    fn dirty_set_is_idempotent() {
        let dims = GridDims::new(8, 2, (1, 1, 1)).expect("valid dims");
        let b = Block::new(&dims, 0).expect("block");
        assert!(b.mark_chunk_dirty(3));
        assert!(!b.mark_chunk_dirty(3));
        assert_eq!(b.dirty_len(), 1);
        let taken = b.take_dirty();
        assert_eq!(taken.len(), 1);
        assert_eq!(b.dirty_len(), 0);
        b.restore_dirty(taken);
        assert!(b.is_chunk_dirty(3));
    }

    #[test]
    fn buffer_swap() {
        let dims = GridDims::new(8, 2, (1, 1, 1)).expect("valid dims");
        let b = Block::new(&dims, 0).expect("block");
        {
            let mut back = b.back_mut();
            back[0].fluid = 42;
        }
        assert_eq!(b.read()[0].fluid, 0);
        b.swap_buffers();
        assert_eq!(b.read()[0].fluid, 42);
    }
}
