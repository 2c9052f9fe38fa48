//! Persistence of the core state
//!
//! Optional out-of-core format: a small header followed by a flat array
//! of block voxel buffers, six bytes per voxel, with a checksum trailer.
//! No other format is exposed by the core.

pub mod world_save;

pub use world_save::{load_world, load_world_from_path, save_world, save_world_to_path};
