use rustc_hash::{FxHashMap, FxHashSet};

use crate::component::segment::{self, RowKey, Segment};
use crate::constants::component::{MIN_COMPONENT_LIFETIME, MIN_COMPONENT_SIZE};
use crate::grid::{VoxelBox, VoxelPos};

/// A connected region of settled fluid voxels with one viscosity,
/// represented compactly as Z-runs per (x, y) row.
///
/// Components reference voxels by position only; the storage stays owned
/// by the blocks. A voxel belongs to at most one component at a time.
#[derive(Debug, Clone)]
pub struct FluidComponent {
    pub id: u32,
    pub viscosity: u8,
    pub(crate) rows: FxHashMap<RowKey, Vec<Segment>>,
    /// Voxels on or just above the free surface, eligible for
    /// equalization
    pub(crate) outlets: FxHashSet<VoxelPos>,
    /// AABB approximation of the claimed region (inclusive)
    pub bounds: VoxelBox,
    /// Voxel cardinality; equals the summed segment lengths
    pub count: u32,
    /// Y of the lowest outlet, or the probe level while outlets are empty
    pub water_level: i32,
    /// Seconds since creation
    pub lifetime: f32,
    pub(crate) settle_counter: u16,
    pub settled: bool,
    pub to_rebuild: bool,
    pub rebuilding: bool,
}

impl FluidComponent {
    pub fn new(id: u32, viscosity: u8, seed: VoxelPos) -> Self {
        let mut rows = FxHashMap::default();
        rows.insert((seed.x, seed.y), vec![Segment::single(seed.z)]);
        Self {
            id,
            viscosity,
            rows,
            outlets: FxHashSet::default(),
            bounds: VoxelBox::point(seed),
            count: 1,
            water_level: seed.y,
            lifetime: 0.0,
            settle_counter: Self::settle_rate(viscosity),
            settled: false,
            to_rebuild: false,
            rebuilding: false,
        }
    }

    fn settle_rate(viscosity: u8) -> u16 {
        if viscosity == 0 {
            u8::MAX as u16
        } else {
            viscosity as u16
        }
    }

    /// Membership test: row lookup plus a scan over the handful of
    /// segments in it
    pub fn contains(&self, pos: VoxelPos) -> bool {
        if !self.bounds.contains(pos) {
            return false;
        }
        self.rows
            .get(&(pos.x, pos.y))
            .map_or(false, |row| row.iter().any(|s| s.contains(pos.z)))
    }

    /// Claim one voxel: grow or start the segment in its row, restore the
    /// row invariant and track bounds/count. The caller checks
    /// `contains` first.
    pub fn add_voxel(&mut self, pos: VoxelPos) {
        let row = self.rows.entry((pos.x, pos.y)).or_default();
        row.push(Segment::single(pos.z));
        segment::coalesce(row);
        self.count += 1;
        self.bounds.encapsulate(pos);
        self.unsettle_by(1);
    }

    /// Whether any segment of this component is adjacent to one of
    /// `other`: along Z within the same row, or sharing a Z level across
    /// one of the eight row-adjacent (x, y) neighbours
    pub fn touches(&self, other: &FluidComponent) -> bool {
        for (&(x, y), segments) in &self.rows {
            for dy in -1..=1 {
                for dx in -1..=1 {
                    let Some(other_segments) = other.rows.get(&(x + dx, y + dy)) else {
                        continue;
                    };
                    for a in segments {
                        for b in other_segments {
                            let hit = if dx == 0 && dy == 0 {
                                a.touches(b)
                            } else {
                                a.overlaps(b)
                            };
                            if hit {
                                return true;
                            }
                        }
                    }
                }
            }
        }
        false
    }

    /// Absorb another component of the same viscosity
    pub fn merge_from(&mut self, other: FluidComponent) {
        for (key, mut segments) in other.rows {
            let row = self.rows.entry(key).or_default();
            row.append(&mut segments);
            segment::coalesce(row);
        }
        self.outlets.extend(other.outlets);
        self.bounds.encapsulate(other.bounds.min);
        self.bounds.encapsulate(other.bounds.max);
        self.lifetime = self.lifetime.max(other.lifetime);
        let absorbed = other.count;
        self.recompute_count();
        self.unsettle_by(absorbed);
    }

    /// Restore `count` from the segment map
    pub fn recompute_count(&mut self) {
        self.count = self.rows.values().map(|row| segment::row_len(row)).sum();
    }

    /// Full AABB recomputation from the segment map; leaves a degenerate
    /// box when no segments remain
    pub fn recompute_bounds(&mut self) {
        let mut iter = self.rows.iter().flat_map(|(&(x, y), row)| {
            row.iter()
                .flat_map(move |s| [VoxelPos::new(x, y, s.z_min), VoxelPos::new(x, y, s.z_max)])
        });
        if let Some(first) = iter.next() {
            let mut bounds = VoxelBox::point(first);
            for pos in iter {
                bounds.encapsulate(pos);
            }
            self.bounds = bounds;
        }
    }

    /// Every claimed voxel position (cleanup paths only; linear in count)
    pub fn voxel_positions(&self) -> Vec<VoxelPos> {
        let mut out = Vec::with_capacity(self.count as usize);
        for (&(x, y), row) in &self.rows {
            for seg in row {
                for z in seg.z_min..=seg.z_max {
                    out.push(VoxelPos::new(x, y, z));
                }
            }
        }
        out
    }

    /// Reset to a single seed voxel, entering the rebuilding state
    pub fn reinitialize(&mut self, seed: VoxelPos) {
        self.rows.clear();
        self.rows
            .insert((seed.x, seed.y), vec![Segment::single(seed.z)]);
        self.outlets.clear();
        self.bounds = VoxelBox::point(seed);
        self.count = 1;
        self.water_level = seed.y;
        self.settle_counter = Self::settle_rate(self.viscosity);
        self.settled = false;
        self.to_rebuild = false;
        self.rebuilding = true;
    }

    /// Accumulate activity evidence proportional to the change in
    /// cardinality
    pub fn unsettle_by(&mut self, delta: u32) {
        let amount = (delta as u64 * Self::settle_rate(self.viscosity) as u64)
            .min(u16::MAX as u64) as u16;
        self.settle_counter = self.settle_counter.saturating_add(amount.max(1));
        self.settled = false;
    }

    /// Drain the activity counter; reaching zero settles the component,
    /// ends any rebuild and refreshes the AABB. Returns whether the
    /// component settled on this call.
    pub fn decrease_settle(&mut self) -> bool {
        if self.settled {
            return false;
        }
        self.settle_counter = self
            .settle_counter
            .saturating_sub(Self::settle_rate(self.viscosity));
        if self.settle_counter == 0 {
            self.settled = true;
            self.rebuilding = false;
            self.recompute_bounds();
            return true;
        }
        false
    }

    /// Update-job eligibility for this tick
    pub fn wants_update(&self) -> bool {
        !self.settled && self.lifetime > MIN_COMPONENT_LIFETIME && self.count >= MIN_COMPONENT_SIZE
    }

    /// Removal eligibility: past the grace period and either shrunk below
    /// the minimum size (while not rebuilding) or out of segments
    pub fn should_remove(&self) -> bool {
        self.lifetime > MIN_COMPONENT_LIFETIME
            && ((!self.rebuilding && self.count < MIN_COMPONENT_SIZE) || self.rows.is_empty())
    }
}

/// Read-only component snapshot exposed through the façade
#[derive(Debug, Clone)]
pub struct ComponentSummary {
    pub id: u32,
    pub viscosity: u8,
    pub count: u32,
    pub water_level: i32,
    pub settled: bool,
    pub rebuilding: bool,
    pub outlets: usize,
    pub bounds: VoxelBox,
    pub lifetime: f32,
}

impl FluidComponent {
    pub fn summary(&self) -> ComponentSummary {
        ComponentSummary {
            id: self.id,
            viscosity: self.viscosity,
            count: self.count,
            water_level: self.water_level,
            settled: self.settled,
            rebuilding: self.rebuilding,
            outlets: self.outlets.len(),
            bounds: self.bounds,
            lifetime: self.lifetime,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::fluid::WATER;

    fn filled(id: u32, from: VoxelPos, to: VoxelPos) -> FluidComponent {
        let mut c = FluidComponent::new(id, WATER, from);
        for x in from.x..=to.x {
            for y in from.y..=to.y {
                for z in from.z..=to.z {
                    let p = VoxelPos::new(x, y, z);
                    if !c.contains(p) {
                        c.add_voxel(p);
                    }
                }
            }
        }
        c
    }

    #[test]
    fn count_matches_segments() {
        let c = filled(1, VoxelPos::new(0, 2, 0), VoxelPos::new(3, 2, 3));
        assert_eq!(c.count, 16);
        let summed: u32 = c.rows.values().map(|r| segment::row_len(r)).sum();
        assert_eq!(c.count, summed);
        assert!(c.contains(VoxelPos::new(2, 2, 2)));
        assert!(!c.contains(VoxelPos::new(2, 3, 2)));
    }

    #[test]
    fn adjacent_segments_merge_within_row() {
        let mut c = FluidComponent::new(1, WATER, VoxelPos::new(0, 0, 0));
        c.add_voxel(VoxelPos::new(0, 0, 2));
        assert_eq!(c.rows[&(0, 0)].len(), 2);
        c.add_voxel(VoxelPos::new(0, 0, 1));
        assert_eq!(c.rows[&(0, 0)].len(), 1);
        assert_eq!(c.count, 3);
    }

    #[test]
    fn touching_components() {
        let a = filled(1, VoxelPos::new(0, 2, 0), VoxelPos::new(1, 2, 1));
        let same_row = filled(2, VoxelPos::new(0, 2, 2), VoxelPos::new(0, 2, 3));
        let diagonal_row = filled(3, VoxelPos::new(2, 3, 0), VoxelPos::new(2, 3, 1));
        let far = filled(4, VoxelPos::new(5, 2, 5), VoxelPos::new(6, 2, 6));
        assert!(a.touches(&same_row));
        assert!(a.touches(&diagonal_row));
        assert!(!a.touches(&far));
    }

    #[test]
    fn merge_recomputes_cardinality() {
        let mut a = filled(1, VoxelPos::new(0, 2, 0), VoxelPos::new(0, 2, 3));
        let b = filled(2, VoxelPos::new(0, 2, 4), VoxelPos::new(0, 2, 7));
        a.merge_from(b);
        assert_eq!(a.count, 8);
        assert_eq!(a.rows[&(0, 2)].len(), 1);
        assert!(a.bounds.contains(VoxelPos::new(0, 2, 7)));
    }

    #[test]
    fn settling_lifecycle() {
        let mut c = FluidComponent::new(1, WATER, VoxelPos::new(1, 1, 1));
        assert!(!c.settled);
        assert!(c.decrease_settle());
        assert!(c.settled);
        c.unsettle_by(2);
        assert!(!c.settled);
        c.rebuilding = true;
        while !c.decrease_settle() {}
        assert!(c.settled);
        assert!(!c.rebuilding);
    }

    #[test]
    fn removal_predicate() {
        let mut c = FluidComponent::new(1, WATER, VoxelPos::new(1, 1, 1));
        assert!(!c.should_remove());
        c.lifetime = 1.0;
        assert!(c.should_remove());
        c.rebuilding = true;
        assert!(!c.should_remove());
        c.rows.clear();
        assert!(c.should_remove());
    }
}
