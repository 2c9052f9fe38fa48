//! Per-component update job
//!
//! Runs in parallel over checked-out components after block maintenance:
//! validates every segment, maintains the outlet set over the free
//! surface, tracks the water level and equalizes outlets to imitate
//! pressure. All voxel writes go through the world's between-tick write
//! path and wake the touched chunks.

use crate::component::component::FluidComponent;
use crate::component::segment::{RowKey, Segment};
use crate::constants::component::{EQUALIZE_SPREAD, MAX_VISCOSITY_NOT_EQUALIZE};
use crate::constants::fluid::VMAX;
use crate::grid::VoxelPos;
use crate::world::WorldState;

pub(crate) fn update_component(state: &WorldState, component: &mut FluidComponent) {
    let count_before = component.count;
    validate_segments(state, component);
    refresh_outlets(state, component);
    update_water_level(component);
    equalize_outlets(state, component);

    let delta = (component.count as i64 - count_before as i64).unsigned_abs();
    if delta != 0 {
        component.unsettle_by(delta.min(u32::MAX as u64) as u32);
    } else {
        component.decrease_settle();
    }
}

/// Walk every segment in Z order and drop voxels that no longer qualify:
/// a member must be settled fluid of the component's viscosity, sitting
/// on a settled, full cell. Invalid voxels split their segment, are woken
/// for re-simulation and decrement the cardinality.
fn validate_segments(state: &WorldState, component: &mut FluidComponent) {
    let keys: Vec<RowKey> = component.rows.keys().copied().collect();
    let mut removed = 0u32;
    for key in keys {
        let Some(old_row) = component.rows.remove(&key) else {
            continue;
        };
        let mut fresh: Vec<Segment> = Vec::new();
        for seg in old_row {
            let mut run_start: Option<i32> = None;
            for z in seg.z_min..=seg.z_max {
                let pos = VoxelPos::new(key.0, key.1, z);
                let v = state.voxel(pos);
                let below = state.voxel(pos.below());
                let valid = v.is_settled()
                    && v.has_fluid()
                    && v.viscosity == component.viscosity
                    && below.is_settled()
                    && below.is_full();
                if valid {
                    run_start.get_or_insert(z);
                } else {
                    if let Some(start) = run_start.take() {
                        fresh.push(Segment {
                            z_min: start,
                            z_max: z - 1,
                        });
                    }
                    removed += 1;
                    state.unsettle_voxel(pos, VMAX as i32);
                }
            }
            if let Some(start) = run_start.take() {
                fresh.push(Segment {
                    z_min: start,
                    z_max: seg.z_max,
                });
            }
        }
        if !fresh.is_empty() {
            component.rows.insert(key, fresh);
        }
    }
    component.count = component.count.saturating_sub(removed);
}

/// Maintain the outlet set: drop outlets the surface moved away from,
/// then collect candidates along the free surface. A settled fluid voxel
/// with headroom is its own outlet; a full one promotes its compatible,
/// non-full top neighbour.
fn refresh_outlets(state: &WorldState, component: &mut FluidComponent) {
    let water_level = component.water_level;
    component.outlets.retain(|pos| {
        let v = state.voxel(*pos);
        if !v.is_valid() {
            return false;
        }
        if !v.has_fluid() && pos.y > water_level {
            return false;
        }
        if v.is_full() {
            if pos.y < water_level {
                return false;
            }
            // A full cell is only "on the surface" while the cell above
            // it has room; otherwise the surface moved past it.
            let above = state.voxel(pos.above());
            if !(above.is_valid() && v.has_compatible_viscosity(&above) && !above.is_full()) {
                return false;
            }
        }
        true
    });

    // Scan every row: the fullness conditions below only ever admit
    // cells of the free surface, which may sit far below the component's
    // top (a flooded corridor venting into a second shaft).
    for (&(x, y), row) in component.rows.iter() {
        for seg in row {
            for z in seg.z_min..=seg.z_max {
                let pos = VoxelPos::new(x, y, z);
                let v = state.voxel(pos);
                if !v.is_settled() {
                    continue;
                }
                if !v.is_full() && v.has_fluid() {
                    component.outlets.insert(pos);
                } else if v.is_full() {
                    let above_pos = pos.above();
                    let above = state.voxel(above_pos);
                    if above.is_valid()
                        && v.has_compatible_viscosity(&above)
                        && !above.is_full()
                    {
                        component.outlets.insert(above_pos);
                    }
                }
            }
        }
    }
}

/// Lowest outlet defines the water level; with no outlets left the level
/// probes upward one row per update
fn update_water_level(component: &mut FluidComponent) {
    let lowest = component.outlets.iter().map(|p| p.y).min();
    match lowest {
        Some(y) => component.water_level = y,
        None => component.water_level += 1,
    }
}

/// Absolute fill level of an outlet: whole cells below it plus its own
/// fluid content
fn outlet_level(pos: VoxelPos, fluid: u8) -> i64 {
    pos.y as i64 * VMAX as i64 + fluid as i64
}

/// Volume-preserving two-pass redistribution across the outlets around
/// their mean level. Lava-class fluids keep their staircase: components
/// at or below `MAX_VISCOSITY_NOT_EQUALIZE` are never equalized.
fn equalize_outlets(state: &WorldState, component: &mut FluidComponent) {
    if component.viscosity <= MAX_VISCOSITY_NOT_EQUALIZE {
        return;
    }
    if component.outlets.len() < 2 {
        return;
    }

    let mut entries: Vec<(VoxelPos, u8)> = component
        .outlets
        .iter()
        .map(|&pos| (pos, state.voxel(pos).fluid))
        .collect();
    entries.sort_unstable_by_key(|&(pos, fluid)| (outlet_level(pos, fluid), pos.x, pos.z));

    let levels: Vec<i64> = entries
        .iter()
        .map(|&(pos, fluid)| outlet_level(pos, fluid))
        .collect();
    let spread = levels[levels.len() - 1] - levels[0];
    if spread < EQUALIZE_SPREAD {
        return;
    }
    let average = levels.iter().sum::<i64>() / levels.len() as i64;

    let viscosity = component.viscosity;
    let mut emptied: Vec<VoxelPos> = Vec::new();
    let mut write = |pos: VoxelPos, from: u8, to: u8, emptied: &mut Vec<VoxelPos>| {
        let _ = state.with_voxel_mut(pos, |v| {
            v.fluid = to;
            if v.fluid == 0 {
                v.viscosity = 0;
            } else if v.viscosity == 0 {
                v.viscosity = viscosity;
            }
            v.unsettle(to as i32 - from as i32);
        });
        state.mark_dirty_at(pos);
        if to == 0 {
            emptied.push(pos);
        }
    };

    // Give pass: raise every outlet below the average towards it,
    // tracking how much volume was introduced.
    let mut balance: i64 = 0;
    for &(pos, fluid) in entries.iter() {
        if outlet_level(pos, fluid) >= average {
            break;
        }
        let target = (average - pos.y as i64 * VMAX as i64).clamp(0, VMAX as i64) as u8;
        if target > fluid {
            balance += (target - fluid) as i64;
            write(pos, fluid, target, &mut emptied);
        }
    }
    if balance == 0 {
        // The spread sits entirely in outlets that cannot be raised;
        // nothing moved, nothing to repay.
        return;
    }

    // Take pass: withdraw the same volume from the outlets above the
    // average, highest first, until the balance is repaid.
    for &(pos, fluid) in entries.iter().rev() {
        if balance <= 0 {
            break;
        }
        if outlet_level(pos, fluid) <= average {
            break;
        }
        let target = (average - pos.y as i64 * VMAX as i64).clamp(0, VMAX as i64) as u8;
        if target < fluid {
            let withdraw = ((fluid - target) as i64).min(balance);
            let to = fluid - withdraw as u8;
            balance -= withdraw;
            write(pos, fluid, to, &mut emptied);
        }
    }

    // A drained outlet hands its slot to the cell below: the free
    // surface descends.
    for pos in emptied {
        component.outlets.insert(pos.below());
    }

    state.components.note_equalization();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outlet_level_orders_by_height_then_fill() {
        let low = outlet_level(VoxelPos::new(0, 2, 0), 100);
        let high = outlet_level(VoxelPos::new(0, 3, 0), 10);
        assert!(high > low);
        assert_eq!(outlet_level(VoxelPos::new(0, 0, 0), 5), 5);
    }
}
