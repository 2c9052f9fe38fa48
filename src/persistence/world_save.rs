use std::io::{Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::grid::VoxelPos;
use crate::voxel::Voxel;
use crate::world::{EngineConfig, World};

/// Magic bytes identifying a world save
const WORLD_MAGIC: [u8; 4] = *b"CSCW";

/// Version of the save format
const WORLD_FORMAT_VERSION: u32 = 1;

/// Per-voxel record size: solid, fluid, viscosity, settle_counter (u16
/// little-endian), flags
const VOXEL_RECORD_SIZE: usize = 6;

/// Header for serialized worlds
#[derive(Debug, Serialize, Deserialize)]
struct WorldHeader {
    magic: [u8; 4],
    version: u32,
    chunk_size: u32,
    block_chunks: u32,
    blocks: (u32, u32, u32),
    voxel_size_m: f32,
    fluid_types: Vec<(u8, String)>,
}

/// Serialize the whole world: header, then every block's voxel buffer in
/// arena order, then a crc32 of the payload. Requires a drained
/// simulation (`Conflict` otherwise).
pub fn save_world<W: Write>(world: &World, writer: &mut W) -> EngineResult<()> {
    if !world.is_idle() {
        return Err(EngineError::Conflict {
            what: "world save while simulation jobs are in flight".to_string(),
        });
    }
    let state = world.state();
    let dims = state.dims;
    let header = WorldHeader {
        magic: WORLD_MAGIC,
        version: WORLD_FORMAT_VERSION,
        chunk_size: dims.chunk_size(),
        block_chunks: dims.block_chunks(),
        blocks: dims.blocks(),
        voxel_size_m: state.voxel_size_m,
        fluid_types: state.fluids.entries().to_vec(),
    };
    bincode::serialize_into(&mut *writer, &header)
        .map_err(|e| EngineError::CorruptedData(format!("header encode: {}", e)))?;

    let mut hasher = crc32fast::Hasher::new();
    let mut record = [0u8; VOXEL_RECORD_SIZE];
    for block in &state.blocks {
        let buffer = block.read();
        let mut bytes = Vec::with_capacity(buffer.len() * VOXEL_RECORD_SIZE);
        for voxel in buffer.iter() {
            encode_voxel(voxel, &mut record);
            bytes.extend_from_slice(&record);
        }
        hasher.update(&bytes);
        writer.write_all(&bytes)?;
    }
    writer.write_all(&hasher.finalize().to_le_bytes())?;
    log::info!(
        "[Persistence] saved world: {} blocks, {} voxels each",
        state.blocks.len(),
        dims.voxels_per_block()
    );
    Ok(())
}

/// Deserialize a world saved by `save_world`. Settled fluid voxels are
/// fed back into the component intake so bodies of water re-form over the
/// following maintenance ticks.
pub fn load_world<R: Read>(reader: &mut R) -> EngineResult<World> {
    let header: WorldHeader = bincode::deserialize_from(&mut *reader)
        .map_err(|e| EngineError::CorruptedData(format!("header decode: {}", e)))?;
    if header.magic != WORLD_MAGIC {
        return Err(EngineError::CorruptedData("bad world magic".to_string()));
    }
    if header.version != WORLD_FORMAT_VERSION {
        return Err(EngineError::VersionMismatch {
            expected: WORLD_FORMAT_VERSION,
            found: header.version,
        });
    }

    let world = World::new(EngineConfig {
        size_blocks: header.blocks,
        voxel_size_m: header.voxel_size_m,
        chunk_size: header.chunk_size,
        block_chunks: header.block_chunks,
        fluid_types: header.fluid_types,
        worker_threads: None,
    })?;

    let state = world.state();
    let dims = state.dims;
    let per_block = dims.voxels_per_block() * VOXEL_RECORD_SIZE;
    let mut hasher = crc32fast::Hasher::new();
    let mut bytes = vec![0u8; per_block];
    for block in &state.blocks {
        reader.read_exact(&mut bytes)?;
        hasher.update(&bytes);
        let mut front = block.front_mut();
        for (i, record) in bytes.chunks_exact(VOXEL_RECORD_SIZE).enumerate() {
            front[i] = decode_voxel(record);
        }
        let mut back = block.back_mut();
        back.copy_from_slice(front.as_slice());
    }
    let mut trailer = [0u8; 4];
    reader.read_exact(&mut trailer)?;
    if u32::from_le_bytes(trailer) != hasher.finalize() {
        return Err(EngineError::CorruptedData(
            "world payload checksum mismatch".to_string(),
        ));
    }

    // Re-seed the component intake from the settled fluid so bodies of
    // water reassemble, and put chunks holding unsettled voxels back
    // into their dirty sets (dirty sets are not part of the format).
    let (wx, wy, wz) = dims.world_size();
    for y in 0..wy as i32 {
        for z in 0..wz as i32 {
            for x in 0..wx as i32 {
                let pos = VoxelPos::new(x, y, z);
                let v = state.voxel(pos);
                if !v.is_valid() {
                    continue;
                }
                if !v.is_settled() {
                    state.mark_dirty_at(pos);
                } else if v.has_fluid() {
                    state.components.push_intake(pos);
                }
            }
        }
    }

    log::info!(
        "[Persistence] loaded world: {} blocks, {} intake voxels re-seeded",
        state.blocks.len(),
        state.components.intake_len()
    );
    Ok(world)
}

/// Save to a file path
pub fn save_world_to_path(world: &World, path: impl AsRef<Path>) -> EngineResult<()> {
    let mut file = std::fs::File::create(path)?;
    save_world(world, &mut file)?;
    file.sync_all()?;
    Ok(())
}

/// Load from a file path
pub fn load_world_from_path(path: impl AsRef<Path>) -> EngineResult<World> {
    let mut file = std::fs::File::open(path)?;
    load_world(&mut file)
}

fn encode_voxel(voxel: &Voxel, out: &mut [u8; VOXEL_RECORD_SIZE]) {
    out[0] = voxel.solid;
    out[1] = voxel.fluid;
    out[2] = voxel.viscosity;
    let counter = voxel.settle_counter.to_le_bytes();
    out[3] = counter[0];
    out[4] = counter[1];
    out[5] = voxel.flags;
}

fn decode_voxel(bytes: &[u8]) -> Voxel {
    Voxel {
        solid: bytes[0],
        fluid: bytes[1],
        viscosity: bytes[2],
        flags: bytes[5],
        settle_counter: u16::from_le_bytes([bytes[3], bytes[4]]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::fluid::{VMAX, WATER};

    fn sample_world() -> World {
        let world = World::new(EngineConfig {
            size_blocks: (2, 1, 1),
            ..EngineConfig::default()
        })
        .expect("world");
        for x in 2..10 {
            world
                .modify_terrain_at(VoxelPos::new(x, 2, 8), true)
                .expect("in range");
        }
        world
            .modify_fluid_at(VoxelPos::new(5, 6, 8), WATER, true)
            .expect("in range");
        world.apply_queued_edits().expect("idle");
        world
    }

    #[test]
    fn voxel_record_round_trip() {
        let mut v = Voxel::air();
        v.solid = 12;
        v.fluid = 99;
        v.viscosity = WATER;
        v.unsettle(777);
        let mut record = [0u8; VOXEL_RECORD_SIZE];
        encode_voxel(&v, &mut record);
        assert_eq!(record[0], 12);
        assert_eq!(record[1], 99);
        assert_eq!(decode_voxel(&record), v);
    }

    #[test]
    fn world_round_trip() {
        let world = sample_world();
        let mut bytes = Vec::new();
        save_world(&world, &mut bytes).expect("save");
        let mut cursor = std::io::Cursor::new(bytes);
        let loaded = load_world(&mut cursor).expect("load");

        assert_eq!(loaded.dims(), world.dims());
        let terrain = loaded.get_voxel_at(VoxelPos::new(4, 2, 8));
        assert_eq!(terrain.solid, VMAX);
        let fluid = loaded.get_voxel_at(VoxelPos::new(5, 6, 8));
        assert_eq!(fluid.fluid, VMAX);
        assert_eq!(fluid.viscosity, WATER);
        assert!(!loaded.get_voxel_at(VoxelPos::new(0, 0, 0)).is_valid());
    }

    #[test]
    fn corrupted_payload_is_rejected() {
        let world = sample_world();
        let mut bytes = Vec::new();
        save_world(&world, &mut bytes).expect("save");
        let len = bytes.len();
        bytes[len - 20] ^= 0xFF;
        let mut cursor = std::io::Cursor::new(bytes);
        assert!(matches!(
            load_world(&mut cursor),
            Err(EngineError::CorruptedData(_))
        ));
    }

    #[test]
    fn truncated_save_is_an_error() {
        let world = sample_world();
        let mut bytes = Vec::new();
        save_world(&world, &mut bytes).expect("save");
        bytes.truncate(bytes.len() / 2);
        let mut cursor = std::io::Cursor::new(bytes);
        assert!(load_world(&mut cursor).is_err());
    }

    #[test]
    fn file_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("world.cscw");
        let world = sample_world();
        save_world_to_path(&world, &path).expect("save");
        let loaded = load_world_from_path(&path).expect("load");
        assert_eq!(loaded.get_voxel_at(VoxelPos::new(5, 6, 8)).fluid, VMAX);
    }
}
