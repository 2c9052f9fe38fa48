//! The simulation kernel: the three flow rules executed per unsettled
//! chunk.
//!
//! A step task reads a consistent snapshot (its own block's read buffer
//! plus read views into up to six neighbour blocks) and writes only its
//! own block's write buffer. Cells outside the world resolve to the
//! invalid sentinel, so edges behave like walls. All arithmetic is
//! integer and saturating; the kernel never panics on neighbour
//! resolution.

use crate::constants::fluid::SPREAD_DIVISOR;
use crate::grid::{ChunkRef, Direction, GridDims};
use crate::sim::SimStep;
use crate::voxel::Voxel;
use crate::world::{Block, BlockJob};

/// Read views for one step task: own read buffer plus the read buffers of
/// the face-adjacent blocks that exist
pub(crate) struct NeighbourViews<'a> {
    pub own: &'a [Voxel],
    pub sides: [Option<&'a [Voxel]>; 6],
}

impl<'a> NeighbourViews<'a> {
    /// Resolve the cell one step from (chunk, voxel); the sentinel when
    /// the step leaves the world
    #[inline]
    fn cell(&self, dims: &GridDims, chunk: u16, voxel: u16, dir: Direction) -> Voxel {
        let hop = dims.neighbour(chunk, voxel, dir);
        let idx = dims.buffer_index(hop.chunk, hop.voxel);
        if hop.crossed_block {
            match self.sides[dir as usize] {
                Some(buf) => buf[idx],
                None => Voxel::invalid(),
            }
        } else {
            self.own[idx]
        }
    }
}

/// Execute one step over the block's frozen plan, populating the write
/// buffer and the job's output lists
pub(crate) fn run_step(
    dims: &GridDims,
    block: &Block,
    views: &NeighbourViews<'_>,
    step: SimStep,
    back: &mut [Voxel],
    job: &mut BlockJob,
) {
    let vpc = dims.voxels_per_chunk();
    for plan_index in 0..job.plan.len() {
        let chunk = job.plan[plan_index];
        let base = chunk as usize * vpc;
        // Unwritten cells must carry the previous step's state forward.
        back[base..base + vpc].copy_from_slice(&views.own[base..base + vpc]);

        let mut chunk_active = false;
        for v in 0..vpc as u16 {
            let i = base + v as usize;
            let cur = views.own[i];
            if !cur.is_valid() {
                continue;
            }

            let n: [Voxel; 6] = Direction::ALL.map(|d| views.cell(dims, chunk, v, d));
            if cur.is_settled() {
                if cur.is_terrain() {
                    continue;
                }
                if n.iter().all(|x| x.is_settled()) {
                    continue;
                }
            }

            let top = n[Direction::PosY as usize];
            let bottom = n[Direction::NegY as usize];
            let mut transfer = 0i32;
            // Viscosity tag of fluid arriving this step; zero = none.
            let mut incoming = 0u8;

            match step {
                SimStep::Up => {
                    // Resolve overflow: pull excess up from below, hand
                    // own excess to the cell above. Both directions are
                    // gated on compatibility so the giving and taking
                    // sides always agree.
                    let pull = if cur.has_compatible_viscosity(&bottom) {
                        bottom.excess_volume() as i32
                    } else {
                        0
                    };
                    let push = if cur.has_compatible_viscosity(&top) {
                        cur.excess_volume() as i32
                    } else {
                        0
                    };
                    transfer = pull - push;
                    if pull > 0 {
                        incoming = bottom.viscosity;
                    }
                }
                SimStep::Down => {
                    let give = if cur.has_compatible_viscosity(&bottom) {
                        (cur.fluid as u16).min(bottom.free_volume()) as i32
                    } else {
                        0
                    };
                    let take = if cur.has_compatible_viscosity(&top) {
                        (top.fluid as u16).min(cur.free_volume()) as i32
                    } else {
                        0
                    };
                    transfer = take - give;
                    if take > 0 {
                        incoming = top.viscosity;
                    }
                }
                SimStep::Sideways => {
                    for dir in Direction::HORIZONTAL {
                        let nb = n[dir as usize];
                        if !cur.has_compatible_viscosity(&nb) {
                            continue;
                        }
                        let diff = (cur.current_volume() as i32
                            - nb.current_volume() as i32)
                            / SPREAD_DIVISOR;
                        let give = diff.clamp(0, cur.fluid as i32 / SPREAD_DIVISOR);
                        let take = (-diff).clamp(0, nb.fluid as i32 / SPREAD_DIVISOR);
                        let net = take - give;
                        if net == 0 {
                            continue;
                        }
                        let viscosity = cur.viscosity.max(nb.viscosity) as i32;
                        let scaled = net * viscosity / 255;
                        // Snap to unity: viscosity scaling must not erase
                        // a nonzero exchange, or viscous fluids would
                        // never make forward progress.
                        transfer += if scaled == 0 { net.signum() } else { scaled };
                        if net > 0 {
                            incoming = nb.viscosity;
                        }
                    }
                }
            }

            let new_fluid = (cur.fluid as i32 + transfer).clamp(0, u8::MAX as i32) as u8;
            let mut out = cur;
            out.fluid = new_fluid;
            if out.has_fluid() {
                if incoming != 0 {
                    out.viscosity = incoming;
                }
            } else {
                out.viscosity = 0;
            }

            let diff = new_fluid as i32 - cur.fluid as i32;
            if diff != 0 {
                out.unsettle(diff);
            } else if step == SimStep::Sideways && !out.is_settled() {
                let falling = top.has_fluid() && !bottom.is_settled();
                if !falling {
                    out.decrease_settle();
                    if out.is_settled() && out.has_fluid() {
                        job.voxels_to_process.push(i as u16);
                    }
                }
            }

            back[i] = out;

            if !out.is_settled() {
                chunk_active = true;
                if diff != 0 {
                    // A changed cell on a chunk face wakes the adjacent
                    // chunk, which may live in a neighbour block.
                    spread_activity(dims, block, chunk, v, job);
                }
            }
        }

        if chunk_active {
            job.chunks_to_unsettle.insert(ChunkRef {
                block: block.index,
                chunk,
            });
        }
    }
}

/// Mark the chunks face-adjacent to a changed boundary voxel for
/// unsettling; resolution goes through the chunk's precomputed links so
/// block crossings land in the right arena slot
fn spread_activity(dims: &GridDims, block: &Block, chunk: u16, voxel: u16, job: &mut BlockJob) {
    for dir in Direction::ALL {
        let hop = dims.neighbour(chunk, voxel, dir);
        if hop.chunk == chunk && !hop.crossed_block {
            continue;
        }
        if let Some(link) = block.chunks[chunk as usize].neighbours[dir as usize] {
            job.chunks_to_unsettle.insert(link);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::fluid::{LAVA, VMAX, WATER};
    use crate::grid::{GridDims, VoxelPos};

    fn dims() -> GridDims {
        GridDims::new(8, 2, (1, 1, 1)).expect("valid dims")
    }

    fn water(fluid: u8) -> Voxel {
        let mut v = Voxel::air();
        v.fluid = fluid;
        v.viscosity = WATER;
        v.unsettle(1);
        v
    }

    fn lava(fluid: u8) -> Voxel {
        let mut v = Voxel::air();
        v.fluid = fluid;
        v.viscosity = LAVA;
        v.unsettle(1);
        v
    }

    /// Build a block, place voxels through a closure, run one step over
    /// every chunk and swap, then return the block and its job.
    fn run_one_step(
        step: SimStep,
        place_cells: impl FnOnce(&GridDims, &mut Vec<Voxel>),
    ) -> (Block, BlockJob) {
        let dims = dims();
        let block = Block::new(&dims, 0).expect("block");
        {
            let mut front = block.front_mut();
            place_cells(&dims, &mut front);
        }
        let plan: Vec<u16> = (0..dims.chunks_per_block() as u16).collect();
        let mut job = BlockJob::with_plan(plan).expect("job");
        {
            let own = block.read();
            let views = NeighbourViews {
                own: &own,
                sides: [None; 6],
            };
            let mut back = block.back_mut();
            run_step(&dims, &block, &views, step, back.as_mut_slice(), &mut job);
        }
        block.swap_buffers();
        (block, job)
    }

    fn at(dims: &GridDims, block: &Block, x: i32, y: i32, z: i32) -> Voxel {
        let idx = dims
            .world_to_indices(VoxelPos::new(x, y, z))
            .expect("inside");
        block.read()[dims.buffer_index(idx.chunk, idx.voxel)]
    }

    fn place(dims: &GridDims, buf: &mut [Voxel], x: i32, y: i32, z: i32, v: Voxel) {
        let idx = dims
            .world_to_indices(VoxelPos::new(x, y, z))
            .expect("inside");
        buf[dims.buffer_index(idx.chunk, idx.voxel)] = v;
    }

    #[test]
    fn down_step_moves_packet_one_cell() {
        let d = dims();
        let (block, _) = run_one_step(SimStep::Down, |d, buf| {
            place(d, buf, 8, 8, 8, water(VMAX));
        });
        assert_eq!(at(&d, &block, 8, 8, 8).fluid, 0);
        let below = at(&d, &block, 8, 7, 8);
        assert_eq!(below.fluid, VMAX);
        assert_eq!(below.viscosity, WATER);
        assert!(!below.is_settled());
    }

    #[test]
    fn down_step_respects_solid_floor() {
        let d = dims();
        let (block, _) = run_one_step(SimStep::Down, |d, buf| {
            place(d, buf, 8, 7, 8, Voxel::terrain());
            place(d, buf, 8, 8, 8, water(VMAX));
        });
        // Floor is full: nothing fits below.
        assert_eq!(at(&d, &block, 8, 8, 8).fluid, VMAX);
        assert_eq!(at(&d, &block, 8, 7, 8).fluid, 0);
    }

    #[test]
    fn down_step_is_blocked_by_incompatible_fluid() {
        let d = dims();
        let (block, _) = run_one_step(SimStep::Down, |d, buf| {
            place(d, buf, 8, 6, 8, Voxel::terrain());
            place(d, buf, 8, 7, 8, lava(40));
            place(d, buf, 8, 8, 8, water(VMAX));
        });
        assert_eq!(at(&d, &block, 8, 8, 8).fluid, VMAX);
        assert_eq!(at(&d, &block, 8, 7, 8).fluid, 40);
        assert_eq!(at(&d, &block, 8, 7, 8).viscosity, LAVA);
    }

    #[test]
    fn up_step_resolves_overflow() {
        let d = dims();
        let (block, _) = run_one_step(SimStep::Up, |d, buf| {
            // Terrain added under fluid: the cell holds solid VMAX plus
            // 40 units of trapped fluid, i.e. 40 excess volume.
            let mut squeezed = Voxel::terrain();
            squeezed.fluid = 40;
            squeezed.viscosity = WATER;
            squeezed.unsettle(1);
            place(d, buf, 8, 8, 8, squeezed);
        });
        // The squeezed cell pushed its excess into the cell above.
        assert_eq!(at(&d, &block, 8, 8, 8).fluid, 0);
        let above = at(&d, &block, 8, 9, 8);
        assert_eq!(above.fluid, 40);
        assert_eq!(above.viscosity, WATER);
        assert!(!above.is_settled());
    }

    #[test]
    fn sideways_step_levels_towards_neighbours() {
        let d = dims();
        let (block, _) = run_one_step(SimStep::Sideways, |d, buf| {
            place(d, buf, 8, 8, 8, water(100));
        });
        let centre = at(&d, &block, 8, 8, 8);
        // A fifth of the difference flows to each of the four sides.
        assert_eq!(centre.fluid, 100 - 4 * 20);
        let mut total = centre.fluid as u32;
        for (x, z) in [(7, 8), (9, 8), (8, 7), (8, 9)] {
            let side = at(&d, &block, x, 8, z);
            assert_eq!(side.fluid, 20);
            assert_eq!(side.viscosity, WATER);
            assert!(!side.is_settled());
            total += side.fluid as u32;
        }
        // Volume is conserved across the exchange.
        assert_eq!(total, 100);
    }

    #[test]
    fn sideways_sub_share_residue_stalls() {
        let d = dims();
        let (block, _) = run_one_step(SimStep::Sideways, |d, buf| {
            place(d, buf, 8, 8, 8, water(3));
        });
        // A difference below the 1/5 share truncates to zero: dust does
        // not creep, it waits for the settle counter to reclaim it.
        assert_eq!(at(&d, &block, 8, 8, 8).fluid, 3);
        for (x, z) in [(7, 8), (9, 8), (8, 7), (8, 9)] {
            assert_eq!(at(&d, &block, x, 8, z).fluid, 0);
        }
    }

    #[test]
    fn sideways_snap_to_unity_moves_viscous_fluid() {
        let d = dims();
        let (block, _) = run_one_step(SimStep::Sideways, |d, buf| {
            place(d, buf, 8, 8, 8, lava(40));
        });
        // 8 units per side scale to 8*20/255 = 0; the snap forces one
        // unit of progress instead of freezing the flow entirely.
        let centre = at(&d, &block, 8, 8, 8);
        assert_eq!(centre.fluid, 40 - 4);
        for (x, z) in [(7, 8), (9, 8), (8, 7), (8, 9)] {
            assert_eq!(at(&d, &block, x, 8, z).fluid, 1);
        }
    }

    #[test]
    fn settled_world_yields_no_writes() {
        let d = dims();
        let block = Block::new(&d, 0).expect("block");
        {
            let mut front = block.front_mut();
            let mut settled = water(VMAX);
            settled.settle();
            place(&d, front.as_mut_slice(), 8, 2, 8, Voxel::terrain());
            place(&d, front.as_mut_slice(), 8, 3, 8, settled);
        }
        let plan: Vec<u16> = (0..d.chunks_per_block() as u16).collect();
        for step in SimStep::ALL {
            let mut job = BlockJob::with_plan(plan.clone()).expect("job");
            {
                let own = block.read();
                let views = NeighbourViews {
                    own: &own,
                    sides: [None; 6],
                };
                let mut back = block.back_mut();
                run_step(&d, &block, &views, step, back.as_mut_slice(), &mut job);
            }
            assert!(job.chunks_to_unsettle.is_empty(), "step {:?}", step);
            assert!(job.voxels_to_process.is_empty(), "step {:?}", step);
            block.swap_buffers();
        }
        // Equilibrium is idempotent: the settled cell did not change.
        let v = at(&d, &block, 8, 3, 8);
        assert_eq!(v.fluid, VMAX);
        assert!(v.is_settled());
    }

    #[test]
    fn walled_fluid_settles_and_is_reported() {
        let d = dims();
        // A full cell boxed in by terrain has no exchange left; the
        // sideways step drains its counter and reports the settle.
        let block = Block::new(&d, 0).expect("block");
        {
            let mut front = block.front_mut();
            place(&d, front.as_mut_slice(), 8, 2, 8, Voxel::terrain());
            for (x, z) in [(7, 8), (9, 8), (8, 7), (8, 9)] {
                place(&d, front.as_mut_slice(), x, 3, z, Voxel::terrain());
            }
            let mut v = water(VMAX);
            v.settle_counter = 0;
            place(&d, front.as_mut_slice(), 8, 3, 8, v);
        }
        let plan: Vec<u16> = (0..d.chunks_per_block() as u16).collect();
        let mut job = BlockJob::with_plan(plan).expect("job");
        {
            let own = block.read();
            let views = NeighbourViews {
                own: &own,
                sides: [None; 6],
            };
            let mut back = block.back_mut();
            run_step(&d, &block, &views, SimStep::Sideways, back.as_mut_slice(), &mut job);
        }
        block.swap_buffers();
        let v = at(&d, &block, 8, 3, 8);
        assert!(v.is_settled());
        assert_eq!(v.fluid, VMAX);
        assert_eq!(job.voxels_to_process.len(), 1);
    }

    #[test]
    fn changed_boundary_voxel_wakes_adjacent_chunk() {
        let d = dims();
        // Fluid at the max-X face of chunk (0,_,_) falls; the write lands
        // next to chunk (1,_,_), which must be queued for unsettling.
        let (block, job) = run_one_step(SimStep::Down, |d, buf| {
            place(d, buf, 7, 8, 8, water(VMAX));
        });
        assert_eq!(at(&d, &block, 7, 7, 8).fluid, VMAX);
        let woken: Vec<ChunkRef> = job.chunks_to_unsettle.iter().copied().collect();
        let own_chunk = d.world_to_indices(VoxelPos::new(7, 7, 8)).expect("in").chunk;
        let adjacent = d.world_to_indices(VoxelPos::new(8, 7, 8)).expect("in").chunk;
        assert!(woken.contains(&ChunkRef { block: 0, chunk: own_chunk }));
        assert!(woken.contains(&ChunkRef { block: 0, chunk: adjacent }));
    }
}
