use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::grid::VoxelPos;

/// One queued external write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edit {
    /// Pour or subtract fluid of the given viscosity tag
    Fluid { viscosity: u8, add: bool },
    /// Add or carve terrain
    Terrain { add: bool },
}

impl Edit {
    /// Whether this edit can change the topology of settled fluid bodies
    /// (terrain edits and fluid subtraction force component rebuilds)
    pub fn suspects_topology_change(&self) -> bool {
        !matches!(self, Edit::Fluid { add: true, .. })
    }
}

/// Pending external writes, merged by voxel.
///
/// Writes land here at any time; they are applied in a single drain phase
/// between ticks. Two writes to the same cell in one tick resolve to the
/// later one.
#[derive(Debug, Default)]
pub struct PendingEdits {
    map: Mutex<FxHashMap<VoxelPos, Edit>>,
}

impl PendingEdits {
    pub fn queue(&self, pos: VoxelPos, edit: Edit) {
        self.map.lock().insert(pos, edit);
    }

    /// Take everything queued so far
    pub fn drain(&self) -> FxHashMap<VoxelPos, Edit> {
        std::mem::take(&mut *self.map.lock())
    }

    pub fn is_empty(&self) -> bool {
        self.map.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.map.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_write_wins() {
        let q = PendingEdits::default();
        let p = VoxelPos::new(1, 2, 3);
        q.queue(p, Edit::Terrain { add: true });
        q.queue(
            p,
            Edit::Fluid {
                viscosity: 255,
                add: true,
            },
        );
        let drained = q.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(
            drained[&p],
            Edit::Fluid {
                viscosity: 255,
                add: true
            }
        );
        assert!(q.is_empty());
    }
}
