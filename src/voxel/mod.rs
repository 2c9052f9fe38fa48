//! Voxel model
//!
//! The atomic cell of the simulation: one byte of solid mass, one byte of
//! fluid mass, a viscosity tag, a settle counter and two flags, packed
//! into six bytes so block buffers persist as flat byte slices.

pub mod fluids;
pub mod voxel;

pub use fluids::FluidTable;
pub use voxel::{Voxel, FLAG_SETTLED, FLAG_VALID};
