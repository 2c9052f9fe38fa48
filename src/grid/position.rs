use serde::{Deserialize, Serialize};

/// Position of a voxel in the world (world voxel coordinates)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VoxelPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl VoxelPos {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Create a new position offset by the given amounts
    pub fn offset(&self, dx: i32, dy: i32, dz: i32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.z + dz)
    }

    /// Step one voxel in the given direction
    pub fn step(&self, dir: Direction) -> Self {
        let (dx, dy, dz) = dir.offset();
        self.offset(dx, dy, dz)
    }

    /// The voxel directly above
    pub fn above(&self) -> Self {
        self.offset(0, 1, 0)
    }

    /// The voxel directly below
    pub fn below(&self) -> Self {
        self.offset(0, -1, 0)
    }

    /// Create VoxelPos from a world-space point (metres)
    pub fn from_world_pos(pos: glam::Vec3, voxel_size_m: f32) -> Self {
        Self {
            x: (pos.x / voxel_size_m).floor() as i32,
            y: (pos.y / voxel_size_m).floor() as i32,
            z: (pos.z / voxel_size_m).floor() as i32,
        }
    }

    /// Centre of this voxel in world space (metres)
    pub fn to_world_pos(&self, voxel_size_m: f32) -> glam::Vec3 {
        glam::Vec3::new(
            (self.x as f32 + 0.5) * voxel_size_m,
            (self.y as f32 + 0.5) * voxel_size_m,
            (self.z as f32 + 0.5) * voxel_size_m,
        )
    }
}

/// Position of a block in the world (block coordinates)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    pub fn offset(&self, dx: i32, dy: i32, dz: i32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.z + dz)
    }
}

/// A chunk addressed by its owning block and its linear id within it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkRef {
    pub block: usize,
    pub chunk: u16,
}

/// Full (block, chunk, voxel) address of one cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VoxelIndices {
    pub block: usize,
    pub chunk: u16,
    pub voxel: u16,
}

/// Face directions of a voxel. Y is up.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    PosX = 0,
    NegX = 1,
    PosY = 2,
    NegY = 3,
    PosZ = 4,
    NegZ = 5,
}

impl Direction {
    pub const ALL: [Direction; 6] = [
        Direction::PosX,
        Direction::NegX,
        Direction::PosY,
        Direction::NegY,
        Direction::PosZ,
        Direction::NegZ,
    ];

    /// The four lateral directions used by the sideways flow rule
    pub const HORIZONTAL: [Direction; 4] = [
        Direction::PosX,
        Direction::NegX,
        Direction::PosZ,
        Direction::NegZ,
    ];

    pub const UP: Direction = Direction::PosY;
    pub const DOWN: Direction = Direction::NegY;

    /// Unit offset of this direction
    pub fn offset(self) -> (i32, i32, i32) {
        match self {
            Direction::PosX => (1, 0, 0),
            Direction::NegX => (-1, 0, 0),
            Direction::PosY => (0, 1, 0),
            Direction::NegY => (0, -1, 0),
            Direction::PosZ => (0, 0, 1),
            Direction::NegZ => (0, 0, -1),
        }
    }

    pub fn opposite(self) -> Direction {
        match self {
            Direction::PosX => Direction::NegX,
            Direction::NegX => Direction::PosX,
            Direction::PosY => Direction::NegY,
            Direction::NegY => Direction::PosY,
            Direction::PosZ => Direction::NegZ,
            Direction::NegZ => Direction::PosZ,
        }
    }
}

/// Inclusive axis-aligned voxel box
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoxelBox {
    pub min: VoxelPos,
    pub max: VoxelPos,
}

impl VoxelBox {
    /// Degenerate box covering a single voxel
    pub fn point(pos: VoxelPos) -> Self {
        Self { min: pos, max: pos }
    }

    pub fn contains(&self, pos: VoxelPos) -> bool {
        pos.x >= self.min.x
            && pos.x <= self.max.x
            && pos.y >= self.min.y
            && pos.y <= self.max.y
            && pos.z >= self.min.z
            && pos.z <= self.max.z
    }

    pub fn intersects(&self, other: &VoxelBox) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    /// Grow to cover the given voxel
    pub fn encapsulate(&mut self, pos: VoxelPos) {
        self.min.x = self.min.x.min(pos.x);
        self.min.y = self.min.y.min(pos.y);
        self.min.z = self.min.z.min(pos.z);
        self.max.x = self.max.x.max(pos.x);
        self.max.y = self.max.y.max(pos.y);
        self.max.z = self.max.z.max(pos.z);
    }

    /// Box expanded by `n` voxels on every side
    pub fn expanded(&self, n: i32) -> VoxelBox {
        VoxelBox {
            min: self.min.offset(-n, -n, -n),
            max: self.max.offset(n, n, n),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_round_trip() {
        for dir in Direction::ALL {
            let (dx, dy, dz) = dir.offset();
            let (ox, oy, oz) = dir.opposite().offset();
            assert_eq!((dx + ox, dy + oy, dz + oz), (0, 0, 0));
        }
    }

    #[test]
    fn voxel_box_encapsulate() {
        let mut b = VoxelBox::point(VoxelPos::new(2, 2, 2));
        b.encapsulate(VoxelPos::new(-1, 5, 2));
        assert!(b.contains(VoxelPos::new(0, 3, 2)));
        assert!(!b.contains(VoxelPos::new(0, 3, 3)));
        assert!(b.intersects(&VoxelBox::point(VoxelPos::new(-1, 2, 2))));
        assert!(!b.intersects(&VoxelBox::point(VoxelPos::new(-2, 2, 2))));
        assert!(b
            .expanded(1)
            .intersects(&VoxelBox::point(VoxelPos::new(-2, 2, 2))));
    }

    #[test]
    fn world_pos_round_trip() {
        let pos = VoxelPos::new(3, -2, 7);
        let back = VoxelPos::from_world_pos(pos.to_world_pos(0.25), 0.25);
        assert_eq!(pos, back);
    }
}
