//! Tick orchestration
//!
//! `tick` never blocks the calling thread: if the previous tick's job set
//! has not drained yet it returns immediately and the simulation keeps
//! free-running. Otherwise it drains queued external writes, freezes a
//! plan per active block and hands the step pipeline to the worker pool.
//! Inside the pipeline the only synchronization is the barrier at the end
//! of each step's `par_iter`; within a step, blocks run independently
//! against their neighbours' read buffers.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use rayon::prelude::*;

use crate::error::EngineResult;
use crate::grid::{ChunkRef, VoxelIndices};
use crate::sim::kernel::{self, NeighbourViews};
use crate::sim::SimStep;
use crate::thread_pool::{PoolCategory, ThreadPoolManager};
use crate::world::{apply_pending_edits, BlockJob, WorldState};

/// Drive one external tick. Non-blocking; see module docs.
pub(crate) fn tick(state: &Arc<WorldState>, dt: f32) -> EngineResult<()> {
    if state
        .in_flight
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        state.stats.ticks_skipped.fetch_add(1, Ordering::Relaxed);
        return Ok(());
    }

    // Between ticks now: the previous job set has drained, so the read
    // buffers are safe for external writes.
    apply_pending_edits(state);
    let active = plan_jobs(state);

    if active.is_empty() && !state.components.has_work() {
        state.in_flight.store(false, Ordering::Release);
        let _ = state.idle_tx.try_send(());
        return Ok(());
    }

    state.stats.ticks.fetch_add(1, Ordering::Relaxed);
    let state = Arc::clone(state);
    ThreadPoolManager::global().spawn(PoolCategory::Simulation, move || {
        run_tick(&state, &active, dt);
        state.in_flight.store(false, Ordering::Release);
        let _ = state.idle_tx.try_send(());
    });
    Ok(())
}

/// Plan phase: freeze each block's dirty set into its job plan, announce
/// chunks that settled since last tick and drop jobs with no work left.
/// Returns the arena indices of the blocks that will simulate this tick.
fn plan_jobs(state: &WorldState) -> Vec<usize> {
    let mut active = Vec::new();
    for (index, block) in state.blocks.iter().enumerate() {
        let drained = block.take_dirty();
        let mut plan: Vec<u16> = drained.iter().copied().collect();
        plan.sort_unstable();

        let mut job_slot = block.job.lock();

        // Previously-unsettled chunks that did not reappear just
        // settled; their meshes need a rebuild.
        if let Some(job) = job_slot.as_ref() {
            for &chunk in &job.plan {
                if !drained.contains(&chunk) {
                    state.send_rebuild(ChunkRef {
                        block: index,
                        chunk,
                    });
                }
            }
        }

        if plan.is_empty() {
            // No more work: drop the job, leave the block idle.
            *job_slot = None;
            continue;
        }

        if job_slot.is_none() {
            match BlockJob::with_plan(plan) {
                Ok(job) => {
                    *job_slot = Some(job);
                    active.push(index);
                }
                Err(e) => {
                    // Leave the block at last-known-good state and retry
                    // next tick.
                    log::error!(
                        "[Scheduler] job creation for block {} failed: {}",
                        index,
                        e
                    );
                    drop(job_slot);
                    block.restore_dirty(drained);
                    continue;
                }
            }
        } else if let Some(job) = job_slot.as_mut() {
            job.plan = plan;
            job.chunks_to_unsettle.clear();
            job.voxels_to_process.clear();
            active.push(index);
        }
        drop(job_slot);

        // The block will swap once per step this tick. Re-mirroring the
        // write buffer now keeps every unplanned region (settled chunks,
        // chunks edited through the read buffer between ticks) identical
        // in both buffers, so those swaps preserve the visible state.
        block.mirror_front_to_back();
    }
    active
}

/// The job pipeline of one tick: three kernel steps with barriers, then
/// block maintenance, then the component tracker. Runs on the worker
/// pool.
fn run_tick(state: &WorldState, active: &[usize], dt: f32) {
    let manager = ThreadPoolManager::global();
    let pool = manager.pool(PoolCategory::Simulation);

    for step in SimStep::ALL {
        pool.install(|| {
            active
                .par_iter()
                .for_each(|&index| run_block_step(state, index, step));
        });
        // Step barrier: everything written this step becomes readable.
        for &index in active {
            state.blocks[index].swap_buffers();
        }
        state.stats.steps.fetch_add(1, Ordering::Relaxed);
    }

    pool.install(|| {
        active
            .par_iter()
            .for_each(|&index| run_block_maintenance(state, index));
    });

    crate::component::run_component_tick(state, dt);
}

/// One (block, step) task: bind the neighbour read views and run the
/// kernel over the frozen plan
fn run_block_step(state: &WorldState, index: usize, step: SimStep) {
    let block = &state.blocks[index];
    let mut job_slot = block.job.lock();
    let Some(job) = job_slot.as_mut() else {
        return;
    };

    // The neighbour views rebind every step: a neighbour that swapped
    // last barrier is read through its fresh front buffer, a neighbour
    // without a job through its static buffer.
    let own = block.read();
    let side_guards = block
        .neighbours
        .map(|slot| slot.map(|i| state.blocks[i].read()));
    let sides: [Option<&[crate::voxel::Voxel]>; 6] =
        std::array::from_fn(|i| side_guards[i].as_ref().map(|g| g.as_slice()));
    let views = NeighbourViews {
        own: own.as_slice(),
        sides,
    };

    let mut back = block.back_mut();
    kernel::run_step(&state.dims, block, &views, step, back.as_mut_slice(), job);

    if step == SimStep::Sideways {
        state
            .stats
            .chunks_simulated
            .fetch_add(job.plan.len() as u64, Ordering::Relaxed);
    }
}

/// Post-step maintenance of one block: apply collected unsettles into the
/// dirty sets (own and neighbouring blocks') and forward just-settled
/// fluid voxels into the component manager's intake
fn run_block_maintenance(state: &WorldState, index: usize) {
    let block = &state.blocks[index];
    let (to_unsettle, to_process) = {
        let mut job_slot = block.job.lock();
        let Some(job) = job_slot.as_mut() else {
            return;
        };
        (
            job.chunks_to_unsettle.drain().collect::<Vec<_>>(),
            std::mem::take(&mut job.voxels_to_process),
        )
    };

    for chunk in to_unsettle {
        state.blocks[chunk.block].mark_chunk_dirty(chunk.chunk);
    }

    let vpc = state.dims.voxels_per_chunk() as u16;
    for buffer_index in to_process {
        let indices = VoxelIndices {
            block: index,
            chunk: buffer_index / vpc,
            voxel: buffer_index % vpc,
        };
        let pos = state.dims.indices_to_world(indices);
        state.components.push_intake(pos);
        state.stats.voxels_settled.fetch_add(1, Ordering::Relaxed);
    }
}
