use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use dashmap::DashSet;
use parking_lot::Mutex;
use rayon::prelude::*;
use rustc_hash::FxHashMap;

use crate::component::component::{ComponentSummary, FluidComponent};
use crate::component::update;
use crate::constants::component::{MAX_VOXELS_PER_ITERATION, MIN_COMPONENT_SIZE};
use crate::constants::fluid::VMAX;
use crate::grid::VoxelPos;
use crate::thread_pool::{PoolCategory, ThreadPoolManager};
use crate::world::WorldState;

/// Component tracker counters
#[derive(Debug, Default)]
pub struct ComponentStats {
    pub created: AtomicU64,
    pub merged: AtomicU64,
    pub removed: AtomicU64,
    pub rebuilt: AtomicU64,
    pub equalizations: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ComponentStatsSnapshot {
    pub created: u64,
    pub merged: u64,
    pub removed: u64,
    pub rebuilt: u64,
    pub equalizations: u64,
    pub live: u64,
    pub intake_pending: u64,
}

/// Tracks connected fluid bodies over the settled parts of the world.
///
/// Block maintenance tasks push just-settled fluid voxels into the intake
/// set concurrently; the maintenance job drains it, growing, creating,
/// merging and retiring components. Per-component update jobs run in
/// parallel on checked-out components, so the map lock is never held
/// across voxel reads.
pub struct ComponentManager {
    components: Mutex<FxHashMap<u32, FluidComponent>>,
    next_id: AtomicU32,
    intake: DashSet<VoxelPos>,
    pending_rebuilds: DashSet<u32>,
    stats: ComponentStats,
}

impl ComponentManager {
    pub fn new() -> Self {
        Self {
            components: Mutex::new(FxHashMap::default()),
            next_id: AtomicU32::new(1),
            intake: DashSet::new(),
            pending_rebuilds: DashSet::new(),
            stats: ComponentStats::default(),
        }
    }

    /// Thread-safe intake of a just-settled fluid voxel
    pub fn push_intake(&self, pos: VoxelPos) {
        self.intake.insert(pos);
    }

    pub fn intake_len(&self) -> usize {
        self.intake.len()
    }

    /// Whether the component phase has anything to do this tick
    pub fn has_work(&self) -> bool {
        if !self.intake.is_empty() || !self.pending_rebuilds.is_empty() {
            return true;
        }
        self.components
            .lock()
            .values()
            .any(|c| !c.settled || c.to_rebuild)
    }

    /// Component claiming the given voxel: coarse AABB test, then a scan
    /// of the segments in the voxel's row
    pub fn component_at(&self, pos: VoxelPos) -> Option<u32> {
        let components = self.components.lock();
        components
            .values()
            .find(|c| c.contains(pos))
            .map(|c| c.id)
    }

    /// Queue a topology rebuild; applied at the next maintenance pass
    pub fn request_rebuild(&self, id: u32) {
        self.pending_rebuilds.insert(id);
    }

    pub fn summaries(&self) -> Vec<ComponentSummary> {
        self.components.lock().values().map(|c| c.summary()).collect()
    }

    pub fn stats(&self) -> ComponentStatsSnapshot {
        ComponentStatsSnapshot {
            created: self.stats.created.load(Ordering::Relaxed),
            merged: self.stats.merged.load(Ordering::Relaxed),
            removed: self.stats.removed.load(Ordering::Relaxed),
            rebuilt: self.stats.rebuilt.load(Ordering::Relaxed),
            equalizations: self.stats.equalizations.load(Ordering::Relaxed),
            live: self.components.lock().len() as u64,
            intake_pending: self.intake.len() as u64,
        }
    }

    pub(crate) fn note_equalization(&self) {
        self.stats.equalizations.fetch_add(1, Ordering::Relaxed);
    }

    /// Check out every component due for an update this tick
    fn take_updatable(&self, dt: f32) -> Vec<FluidComponent> {
        let mut components = self.components.lock();
        for c in components.values_mut() {
            c.lifetime += dt;
        }
        let ids: Vec<u32> = components
            .values()
            .filter(|c| c.wants_update())
            .map(|c| c.id)
            .collect();
        ids.into_iter()
            .filter_map(|id| components.remove(&id))
            .collect()
    }

    fn check_in(&self, updated: Vec<FluidComponent>) {
        let mut components = self.components.lock();
        for c in updated {
            components.insert(c.id, c);
        }
    }

    /// Maintenance pass: apply rebuild requests, drain the intake budget,
    /// seed at most one new component, then retire and rebuild as flagged
    pub(crate) fn run_maintenance(&self, state: &WorldState) {
        let mut components = self.components.lock();

        let requested: Vec<u32> = self.pending_rebuilds.iter().map(|r| *r).collect();
        self.pending_rebuilds.clear();
        for id in requested {
            if let Some(c) = components.get_mut(&id) {
                c.to_rebuild = true;
            }
        }

        self.process_intake(&mut components, state);
        self.try_create_component(&mut components, state);
        self.retire_and_rebuild(&mut components, state);
    }

    /// Try to attach intake voxels to existing components, up to the
    /// per-tick budget. Voxels that fit nowhere stay in the intake for a
    /// later tick (or for component creation).
    fn process_intake(
        &self,
        components: &mut FxHashMap<u32, FluidComponent>,
        state: &WorldState,
    ) {
        let batch: Vec<VoxelPos> = self
            .intake
            .iter()
            .take(MAX_VOXELS_PER_ITERATION)
            .map(|r| *r)
            .collect();
        for pos in batch {
            let v = state.voxel(pos);
            if !v.is_settled() || !v.has_fluid() {
                // Stale entry: the voxel moved on since it settled.
                self.intake.remove(&pos);
                continue;
            }
            let below = state.voxel(pos.below());
            if !below.is_settled() || !below.is_full() {
                // No support yet; revisit once the cell below settles.
                continue;
            }
            if let Some(id) = try_add_to_existing(components, pos, v.viscosity) {
                self.intake.remove(&pos);
                self.resolve_merges(components, id);
            }
        }
    }

    /// Seed at most one new component per maintenance tick once enough
    /// unclaimed settled fluid has accumulated
    fn try_create_component(
        &self,
        components: &mut FxHashMap<u32, FluidComponent>,
        state: &WorldState,
    ) {
        if (self.intake.len() as u32) < MIN_COMPONENT_SIZE {
            return;
        }
        let mut seed: Option<(VoxelPos, u8)> = None;
        for r in self.intake.iter() {
            let pos = *r;
            let v = state.voxel(pos);
            if !v.is_settled() || !v.has_fluid() {
                continue;
            }
            let below = state.voxel(pos.below());
            if !below.is_settled() || !below.is_full() {
                continue;
            }
            if components.values().any(|c| c.contains(pos)) {
                continue;
            }
            if !no_component_below(components, state, pos) {
                continue;
            }
            seed = Some((pos, v.viscosity));
            break;
        }
        let Some((pos, viscosity)) = seed else {
            return;
        };
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        components.insert(id, FluidComponent::new(id, viscosity, pos));
        self.intake.remove(&pos);
        self.stats.created.fetch_add(1, Ordering::Relaxed);
        log::debug!(
            "[ComponentManager] created component {} at {:?} (viscosity {})",
            id,
            pos,
            viscosity
        );
        self.resolve_merges(components, id);
    }

    /// Merge chains: as long as the given component touches a peer of the
    /// same viscosity, one eats the other. A rebuilding component always
    /// eats a non-rebuilding peer; otherwise the larger one wins.
    pub(crate) fn resolve_merges(
        &self,
        components: &mut FxHashMap<u32, FluidComponent>,
        mut id: u32,
    ) {
        loop {
            let mut partner = None;
            if let Some(c) = components.get(&id) {
                for (&oid, other) in components.iter() {
                    if oid == id || other.viscosity != c.viscosity {
                        continue;
                    }
                    if !c.bounds.expanded(1).intersects(&other.bounds) {
                        continue;
                    }
                    if c.touches(other) {
                        partner = Some(oid);
                        break;
                    }
                }
            }
            let Some(pid) = partner else {
                return;
            };
            let winner_id = {
                let a = &components[&id];
                let b = &components[&pid];
                if a.rebuilding != b.rebuilding {
                    if a.rebuilding {
                        id
                    } else {
                        pid
                    }
                } else if a.count != b.count {
                    if a.count > b.count {
                        id
                    } else {
                        pid
                    }
                } else if id < pid {
                    id
                } else {
                    pid
                }
            };
            let loser_id = if winner_id == id { pid } else { id };
            if let Some(loser) = components.remove(&loser_id) {
                log::debug!(
                    "[ComponentManager] component {} absorbed component {}",
                    winner_id,
                    loser_id
                );
                if let Some(winner) = components.get_mut(&winner_id) {
                    winner.merge_from(loser);
                }
                self.stats.merged.fetch_add(1, Ordering::Relaxed);
            }
            id = winner_id;
        }
    }

    /// Retire components flagged for removal and reinitialize the ones
    /// flagged for rebuild, waking their voxels either way
    fn retire_and_rebuild(
        &self,
        components: &mut FxHashMap<u32, FluidComponent>,
        state: &WorldState,
    ) {
        // Components below the update threshold still need their settle
        // counter drained, or an abandoned one could linger unsettled
        // forever instead of aging into removal. A rebuilding component
        // is spared while intake material is still arriving for it.
        let intake_empty = self.intake.is_empty();
        for c in components.values_mut() {
            if !c.settled && !c.wants_update() && (!c.rebuilding || intake_empty) {
                c.decrease_settle();
            }
        }

        let ids: Vec<u32> = components.keys().copied().collect();
        for id in ids {
            let Some(c) = components.get(&id) else {
                continue;
            };
            if c.should_remove() {
                if let Some(dead) = components.remove(&id) {
                    for pos in dead.voxel_positions() {
                        state.unsettle_voxel(pos, VMAX as i32);
                    }
                    self.stats.removed.fetch_add(1, Ordering::Relaxed);
                    log::debug!("[ComponentManager] removed component {}", id);
                }
            } else if c.to_rebuild {
                if let Some(c) = components.get_mut(&id) {
                    // The seed must still be a claimable voxel, or the
                    // rebuild would anchor on a cell the edit destroyed.
                    let seed = c.voxel_positions().into_iter().find(|&pos| {
                        let v = state.voxel(pos);
                        v.is_settled() && v.has_fluid() && v.viscosity == c.viscosity
                    });
                    for pos in c.voxel_positions() {
                        if Some(pos) != seed {
                            state.unsettle_voxel(pos, VMAX as i32);
                        }
                    }
                    match seed {
                        Some(seed) => {
                            c.reinitialize(seed);
                            self.stats.rebuilt.fetch_add(1, Ordering::Relaxed);
                            log::debug!(
                                "[ComponentManager] rebuilding component {} from {:?}",
                                id,
                                seed
                            );
                        }
                        None => {
                            // Nothing left to seed from; removal handles
                            // it on a later tick.
                            c.to_rebuild = false;
                            c.rows.clear();
                        }
                    }
                }
            }
        }
    }
}

impl Default for ComponentManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Attach one settled fluid voxel to an existing component. First pass
/// looks for a segment in the voxel's own (x, y) row to extend; second
/// pass looks across the eight row-adjacent neighbours and starts a new
/// segment in the voxel's row.
fn try_add_to_existing(
    components: &mut FxHashMap<u32, FluidComponent>,
    pos: VoxelPos,
    viscosity: u8,
) -> Option<u32> {
    // Same-row pass.
    for (&id, c) in components.iter_mut() {
        if c.viscosity != viscosity || !c.bounds.expanded(1).contains(pos) {
            continue;
        }
        if c.contains(pos) {
            return Some(id);
        }
        let same_row = c
            .rows
            .get(&(pos.x, pos.y))
            .map_or(false, |row| {
                row.iter()
                    .any(|s| s.z_min - 1 <= pos.z && pos.z <= s.z_max + 1)
            });
        if same_row {
            c.add_voxel(pos);
            return Some(id);
        }
    }
    // Row-adjacent pass.
    const ROW_NEIGHBOURS: [(i32, i32); 8] = [
        (1, 0),
        (-1, 0),
        (0, 1),
        (0, -1),
        (1, 1),
        (1, -1),
        (-1, 1),
        (-1, -1),
    ];
    for (&id, c) in components.iter_mut() {
        if c.viscosity != viscosity || !c.bounds.expanded(1).contains(pos) {
            continue;
        }
        let adjacent = ROW_NEIGHBOURS.iter().any(|&(dx, dy)| {
            c.rows
                .get(&(pos.x + dx, pos.y + dy))
                .map_or(false, |row| row.iter().any(|s| s.contains(pos.z)))
        });
        if adjacent {
            c.add_voxel(pos);
            return Some(id);
        }
    }
    None
}

/// Scan downward through full cells to confirm no existing component
/// already claims the column under a prospective seed
fn no_component_below(
    components: &FxHashMap<u32, FluidComponent>,
    state: &WorldState,
    pos: VoxelPos,
) -> bool {
    let mut p = pos.below();
    loop {
        let v = state.voxel(p);
        if !v.is_valid() {
            // Reached the world hull.
            return true;
        }
        if components.values().any(|c| c.contains(p)) {
            return false;
        }
        if !v.is_full() {
            // Air gap ends the supported column.
            return true;
        }
        p = p.below();
    }
}


/// The component phase of one tick: parallel per-component update jobs,
/// then the serial manager maintenance job
pub(crate) fn run_component_tick(state: &WorldState, dt: f32) {
    let manager = &state.components;
    let to_update = manager.take_updatable(dt);
    if !to_update.is_empty() {
        let updated: Vec<FluidComponent> =
            ThreadPoolManager::global().install(PoolCategory::Components, || {
                to_update
                    .into_par_iter()
                    .map(|mut c| {
                        update::update_component(state, &mut c);
                        c
                    })
                    .collect()
            });
        manager.check_in(updated);
    }
    manager.run_maintenance(state);
}
