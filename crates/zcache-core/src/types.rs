//! Core data model: zones, chunks, and the physical location a data id maps to.

use serde::{Deserialize, Serialize};

/// Index of a zone within the device's zone array.
pub type ZoneId = u32;

/// Offset of a chunk within a zone, in chunk-size units (not bytes).
pub type ChunkOffset = u32;

/// Opaque application-level key for a cached payload.
pub type DataId = u32;

/// The physical address of a single chunk: `(zone, chunk_offset)`, plus the
/// bookkeeping fields the original id and in-use flag carry along for the
/// eviction policies' per-zone chunk pools.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub zone: ZoneId,
    pub chunk_offset: ChunkOffset,
    pub id: DataId,
    pub in_use: bool,
}

impl Location {
    pub const fn new(zone: ZoneId, chunk_offset: ChunkOffset, id: DataId) -> Self {
        Self {
            zone,
            chunk_offset,
            id,
            in_use: true,
        }
    }
}

/// Lifecycle state of a zone.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ZoneState {
    /// Empty, not currently allocated to any writer.
    Free,
    /// Being written; `write_pointer` tracks how many chunks have landed
    /// since the last reset.
    Active,
    /// Write pointer at capacity; at least one chunk still valid.
    Full,
    /// Being reset; transient state between Full/Active and Free.
    Invalidating,
}

/// Device/cache geometry, fixed for the life of a cache instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geometry {
    pub num_zones: u32,
    pub zone_size_bytes: u64,
    pub zone_capacity_bytes: u64,
    pub chunk_size_bytes: u64,
}

impl Geometry {
    pub fn chunks_per_zone(&self) -> u32 {
        (self.zone_capacity_bytes / self.chunk_size_bytes) as u32
    }

    /// Byte offset of chunk `(zone, chunk_offset)` in the backing device.
    pub fn byte_offset(&self, zone: ZoneId, chunk_offset: ChunkOffset) -> u64 {
        zone as u64 * self.zone_size_bytes + chunk_offset as u64 * self.chunk_size_bytes
    }
}
