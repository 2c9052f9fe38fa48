/// Row key of a component's segment map: an (x, y) column of the world,
/// holding contiguous runs along Z
pub type RowKey = (i32, i32);

/// One maximal run of settled fluid voxels along Z in a single (x, y)
/// row. Inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub z_min: i32,
    pub z_max: i32,
}

impl Segment {
    pub fn single(z: i32) -> Self {
        Self { z_min: z, z_max: z }
    }

    pub fn len(&self) -> u32 {
        (self.z_max - self.z_min + 1).max(0) as u32
    }

    pub fn is_empty(&self) -> bool {
        self.z_max < self.z_min
    }

    pub fn contains(&self, z: i32) -> bool {
        z >= self.z_min && z <= self.z_max
    }

    /// Overlapping or immediately adjacent along Z. Segments in a row are
    /// kept disjoint and non-adjacent, so touching segments merge.
    pub fn touches(&self, other: &Segment) -> bool {
        self.z_min <= other.z_max + 1 && other.z_min <= self.z_max + 1
    }

    /// Strict Z-range intersection (used for adjacency across rows)
    pub fn overlaps(&self, other: &Segment) -> bool {
        self.z_min <= other.z_max && other.z_min <= self.z_max
    }
}

/// Sort a row and merge every pair of touching segments, restoring the
/// disjoint/non-adjacent row invariant
pub fn coalesce(row: &mut Vec<Segment>) {
    if row.len() < 2 {
        return;
    }
    row.sort_unstable_by_key(|s| s.z_min);
    let mut merged: Vec<Segment> = Vec::with_capacity(row.len());
    for seg in row.drain(..) {
        match merged.last_mut() {
            Some(last) if last.touches(&seg) => {
                last.z_min = last.z_min.min(seg.z_min);
                last.z_max = last.z_max.max(seg.z_max);
            }
            _ => merged.push(seg),
        }
    }
    *row = merged;
}

/// Total voxel count of one row
pub fn row_len(row: &[Segment]) -> u32 {
    row.iter().map(Segment::len).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn touching_and_overlap() {
        let a = Segment { z_min: 2, z_max: 5 };
        assert!(a.touches(&Segment::single(6)));
        assert!(a.touches(&Segment::single(1)));
        assert!(!a.touches(&Segment::single(7)));
        assert!(a.overlaps(&Segment { z_min: 5, z_max: 9 }));
        assert!(!a.overlaps(&Segment::single(6)));
        assert!(a.contains(2) && a.contains(5) && !a.contains(6));
        assert_eq!(a.len(), 4);
    }

    #[test]
    fn coalesce_merges_transitive_runs() {
        let mut row = vec![
            Segment::single(7),
            Segment { z_min: 1, z_max: 3 },
            Segment { z_min: 4, z_max: 6 },
        ];
        coalesce(&mut row);
        assert_eq!(row, vec![Segment { z_min: 1, z_max: 7 }]);
        assert_eq!(row_len(&row), 7);

        let mut sparse = vec![Segment::single(0), Segment::single(9)];
        coalesce(&mut sparse);
        assert_eq!(sparse.len(), 2);
    }
}
