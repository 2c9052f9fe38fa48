use bytemuck::{Pod, Zeroable};

use crate::constants::fluid::{EPSILON, VMAX};

/// The voxel is at rest; the kernel skips it unless a neighbour is active
pub const FLAG_SETTLED: u8 = 1 << 0;
/// Clear only on the sentinel cells of the world border and on
/// out-of-world queries
pub const FLAG_VALID: u8 = 1 << 1;

/// One simulation cell, packed for flat storage.
///
/// Layout (6 bytes, the persisted format): `solid`, `fluid`, `viscosity`,
/// `flags`, `settle_counter` (little-endian u16). `solid + fluid` stays
/// within `[0, VMAX]` at rest; values up to 255 are legal between kernel
/// writes while overflow is being resolved.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct Voxel {
    pub solid: u8,
    pub fluid: u8,
    pub viscosity: u8,
    pub flags: u8,
    pub settle_counter: u16,
}

impl Voxel {
    /// Empty, settled, valid air cell
    pub fn air() -> Self {
        Self {
            solid: 0,
            fluid: 0,
            viscosity: 0,
            flags: FLAG_SETTLED | FLAG_VALID,
            settle_counter: 0,
        }
    }

    /// The sentinel returned for border cells and out-of-world queries.
    /// Zero-filled and never valid; incompatible with every fluid, so
    /// world edges behave like walls.
    pub fn invalid() -> Self {
        Self {
            solid: 0,
            fluid: 0,
            viscosity: 0,
            flags: FLAG_SETTLED,
            settle_counter: 0,
        }
    }

    /// Fully solid terrain cell
    pub fn terrain() -> Self {
        Self {
            solid: VMAX,
            fluid: 0,
            viscosity: 0,
            flags: FLAG_SETTLED | FLAG_VALID,
            settle_counter: 0,
        }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.flags & FLAG_VALID != 0
    }

    #[inline]
    pub fn is_settled(&self) -> bool {
        self.flags & FLAG_SETTLED != 0
    }

    #[inline]
    pub fn has_fluid(&self) -> bool {
        self.fluid > 0
    }

    /// Settled, fully solid, no fluid: nothing the kernel can do here
    #[inline]
    pub fn is_terrain(&self) -> bool {
        self.is_settled() && self.solid == VMAX && self.fluid == 0
    }

    #[inline]
    pub fn current_volume(&self) -> u16 {
        self.solid as u16 + self.fluid as u16
    }

    /// Volume above the per-voxel ceiling, to be pushed out by the Up rule
    #[inline]
    pub fn excess_volume(&self) -> u16 {
        self.current_volume().saturating_sub(VMAX as u16)
    }

    /// Room left below the per-voxel ceiling
    #[inline]
    pub fn free_volume(&self) -> u16 {
        (VMAX as u16).saturating_sub(self.current_volume())
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.current_volume() >= VMAX as u16
    }

    /// Two cells may exchange fluid iff the other cell is valid and the
    /// viscosity tags match (zero matches anything)
    #[inline]
    pub fn has_compatible_viscosity(&self, other: &Voxel) -> bool {
        other.is_valid()
            && (self.viscosity == 0 || other.viscosity == 0 || self.viscosity == other.viscosity)
    }

    /// Accumulate evidence of activity and wake the cell up
    pub fn unsettle(&mut self, delta: i32) {
        let amount = delta.unsigned_abs().min(u16::MAX as u32) as u16;
        self.settle_counter = self.settle_counter.saturating_add(amount);
        self.flags &= !FLAG_SETTLED;
    }

    /// Drain the activity counter by one viscosity quantum; a drained
    /// counter (or a pure air cell) settles the voxel
    pub fn decrease_settle(&mut self) {
        if self.settle_counter == 0 || (self.solid == 0 && self.fluid == 0) {
            self.settle();
            return;
        }
        let rate = if self.viscosity == 0 {
            u8::MAX as u16
        } else {
            self.viscosity as u16
        };
        self.settle_counter = self.settle_counter.saturating_sub(rate);
    }

    /// Normalize and mark at rest: dust below `EPSILON` is cleared when
    /// there is no overflow, fluid is clamped under the ceiling, and an
    /// empty cell loses its viscosity tag
    pub fn settle(&mut self) {
        if self.fluid <= EPSILON && self.excess_volume() == 0 {
            self.fluid = 0;
        }
        let cap = VMAX.saturating_sub(self.solid.min(VMAX));
        if self.fluid > cap {
            self.fluid = cap;
        }
        if self.fluid == 0 {
            self.viscosity = 0;
        }
        self.settle_counter = 0;
        self.flags |= FLAG_SETTLED;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::fluid::WATER;

    #[test]
    fn voxel_is_six_bytes() {
        assert_eq!(std::mem::size_of::<Voxel>(), 6);
    }

    #[test]
    fn volumes() {
        let mut v = Voxel::air();
        v.solid = 100;
        v.fluid = 50;
        assert_eq!(v.current_volume(), 150);
        assert_eq!(v.excess_volume(), 23);
        assert_eq!(v.free_volume(), 0);
        v.fluid = 20;
        assert_eq!(v.excess_volume(), 0);
        assert_eq!(v.free_volume(), 7);
    }

    #[test]
    fn compatibility() {
        let mut water = Voxel::air();
        water.fluid = 10;
        water.viscosity = WATER;
        let mut lava = Voxel::air();
        lava.fluid = 10;
        lava.viscosity = 20;
        let air = Voxel::air();

        assert!(water.has_compatible_viscosity(&air));
        assert!(air.has_compatible_viscosity(&water));
        assert!(!water.has_compatible_viscosity(&lava));
        assert!(!water.has_compatible_viscosity(&Voxel::invalid()));
    }

    #[test]
    fn settle_clears_dust() {
        let mut v = Voxel::air();
        v.fluid = EPSILON;
        v.viscosity = WATER;
        v.unsettle(3);
        assert!(!v.is_settled());
        v.settle();
        assert_eq!(v.fluid, 0);
        assert_eq!(v.viscosity, 0);
        assert!(v.is_settled());
    }

    #[test]
    fn settle_keeps_overflowed_fluid_clamped() {
        let mut v = Voxel::air();
        v.solid = VMAX;
        v.fluid = 3;
        v.settle();
        // Overflowed, so the dust rule does not apply; the clamp does.
        assert_eq!(v.fluid, 0);
    }

    #[test]
    fn decrease_settle_drains_by_viscosity() {
        let mut v = Voxel::air();
        v.fluid = 40;
        v.viscosity = 20;
        v.unsettle(50);
        assert_eq!(v.settle_counter, 50);
        v.decrease_settle();
        assert_eq!(v.settle_counter, 30);
        assert!(!v.is_settled());
        v.decrease_settle();
        v.decrease_settle();
        assert_eq!(v.settle_counter, 0);
        assert!(!v.is_settled());
        // Counter is drained; the next decrease settles.
        v.decrease_settle();
        assert!(v.is_settled());
        assert_eq!(v.fluid, 40);
    }

    #[test]
    fn pure_air_settles_immediately() {
        let mut v = Voxel::air();
        v.unsettle(1000);
        v.decrease_settle();
        assert!(v.is_settled());
    }

    #[test]
    fn unsettle_saturates() {
        let mut v = Voxel::air();
        v.settle_counter = u16::MAX - 1;
        v.unsettle(i32::MIN);
        assert_eq!(v.settle_counter, u16::MAX);
    }
}
