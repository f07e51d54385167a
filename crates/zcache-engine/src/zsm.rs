//! Zone State Manager (C3): owns the pool of zones, their lifecycle states,
//! and sequential write-pointer enforcement. `get_active_zone` is wait-free
//! from the caller's perspective — it never blocks on I/O; the subsequent
//! device write always happens outside the ZSM lock.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use zcache_core::{
    BlockDevice, CacheError, Geometry, Location, NoActiveZoneReason, ZoneId, ZoneState,
};

struct ZoneRecord {
    state: ZoneState,
    write_pointer: u32,
    chunks_in_use: u32,
    valid: Vec<bool>,
}

impl ZoneRecord {
    fn new(chunks_per_zone: u32) -> Self {
        Self {
            state: ZoneState::Free,
            write_pointer: 0,
            chunks_in_use: 0,
            valid: vec![false; chunks_per_zone as usize],
        }
    }
}

/// Outcome of [`ZoneStateManager::get_active_zone`].
pub enum ActiveZone {
    Success(Location),
    NoActiveZone(NoActiveZoneReason),
}

struct Inner {
    zones: Vec<ZoneRecord>,
    free: VecDeque<ZoneId>,
    active: Vec<ZoneId>,
    max_active_zones: u32,
}

/// Zone pool plus per-zone write-pointer and validity bookkeeping.
///
/// The active-reader counters live outside the ZSM lock (spec §5: "the
/// per-zone active-reader count ... MUST be a lock-free atomic counter"),
/// since they are shared with the cache map and hot on the read path.
///
/// Holds the same device handle the cache core writes through: resetting a
/// zone's bookkeeping back to empty is only half of "reset-to-rewrite" —
/// the backend's own write pointer has to be reset to match, or its next
/// write into the zone looks out-of-order to it.
pub struct ZoneStateManager {
    geometry: Geometry,
    inner: Mutex<Inner>,
    pub active_readers: Vec<AtomicUsize>,
    device: Arc<dyn BlockDevice>,
}

impl ZoneStateManager {
    pub fn new(geometry: Geometry, max_active_zones: u32, device: Arc<dyn BlockDevice>) -> Arc<Self> {
        let chunks_per_zone = geometry.chunks_per_zone();
        let zones: Vec<ZoneRecord> = (0..geometry.num_zones)
            .map(|_| ZoneRecord::new(chunks_per_zone))
            .collect();
        let free: VecDeque<ZoneId> = (0..geometry.num_zones).collect();
        let active_readers = (0..geometry.num_zones).map(|_| AtomicUsize::new(0)).collect();

        Arc::new(Self {
            geometry,
            inner: Mutex::new(Inner {
                zones,
                free,
                active: Vec::new(),
                max_active_zones,
            }),
            active_readers,
            device,
        })
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    /// Reserve the next chunk slot in some Active zone, promoting a Free
    /// zone to Active if budget allows (spec §4.3).
    pub fn get_active_zone(&self) -> ActiveZone {
        let chunks_per_zone = self.geometry.chunks_per_zone();
        let mut inner = self.inner.lock();

        if let Some(&zone) = inner.active.iter().find(|&&z| {
            let rec = &inner.zones[z as usize];
            matches!(rec.state, ZoneState::Active) && rec.write_pointer < chunks_per_zone
        }) {
            let rec = &mut inner.zones[zone as usize];
            let wp = rec.write_pointer;
            rec.write_pointer += 1;
            return ActiveZone::Success(Location::new(zone, wp, 0));
        }

        if inner.max_active_zones == 0 {
            // No active-zone budget at all: no amount of eviction can ever
            // produce room, so this configuration can never serve a miss.
            return ActiveZone::NoActiveZone(NoActiveZoneReason::Fatal);
        }

        if (inner.active.len() as u32) < inner.max_active_zones {
            if let Some(zone) = inner.free.pop_front() {
                inner.active.push(zone);
                let rec = &mut inner.zones[zone as usize];
                rec.state = ZoneState::Active;
                rec.write_pointer = 1;
                return ActiveZone::Success(Location::new(zone, 0, 0));
            }
            // No free zone, but there's room in the active budget: eviction
            // would free one up.
            return ActiveZone::NoActiveZone(NoActiveZoneReason::Evict);
        }

        // Active budget is saturated; caller should evict.
        ActiveZone::NoActiveZone(NoActiveZoneReason::Evict)
    }

    /// Reserve the next write-pointer slot specifically within `zone`,
    /// which must already be Active. Used by GC compaction, which (unlike
    /// the general `get_active_zone` dispatch) needs writes to land back
    /// in the same zone it just reset rather than whichever Active zone
    /// has room.
    pub fn reserve_in_zone(&self, zone: ZoneId) -> Result<Location, CacheError> {
        let chunks_per_zone = self.geometry.chunks_per_zone();
        let mut inner = self.inner.lock();
        let rec = &mut inner.zones[zone as usize];
        if !matches!(rec.state, ZoneState::Active) || rec.write_pointer >= chunks_per_zone {
            return Err(CacheError::precondition(format!(
                "reserve_in_zone({}) called on a zone that is not an open Active zone",
                zone
            )));
        }
        let wp = rec.write_pointer;
        rec.write_pointer += 1;
        Ok(Location::new(zone, wp, 0))
    }

    /// Called after the write at `loc` lands. Promotes the zone to Full
    /// once its write pointer reaches capacity, which also frees its slot
    /// in the active-zone budget (a Full zone accepts no more writes, so
    /// it no longer competes for `max_active_zones`).
    pub fn return_active_zone(&self, loc: Location) {
        let chunks_per_zone = self.geometry.chunks_per_zone();
        let mut inner = self.inner.lock();
        let rec = &mut inner.zones[loc.zone as usize];
        rec.valid[loc.chunk_offset as usize] = true;
        rec.chunks_in_use += 1;
        if loc.chunk_offset + 1 == chunks_per_zone {
            rec.state = ZoneState::Full;
            inner.active.retain(|&z| z != loc.zone);
        }
    }

    /// Roll back a reservation whose write failed. Per spec §9's resolved
    /// open question, writes within a zone are serialized by the caller
    /// (the cache core holds the write attempt for `loc` to completion
    /// before any other writer can reserve past it), so the failing
    /// offset is always still the tail and a rewind is always safe.
    pub fn failed_to_write(&self, loc: Location) -> Result<(), CacheError> {
        let mut inner = self.inner.lock();
        let rec = &mut inner.zones[loc.zone as usize];
        if rec.write_pointer == 0 || rec.write_pointer - 1 != loc.chunk_offset {
            return Err(CacheError::precondition(format!(
                "failed_to_write at zone {} offset {} is not the current tail ({})",
                loc.zone, loc.chunk_offset, rec.write_pointer
            )));
        }
        rec.write_pointer -= 1;
        Ok(())
    }

    /// Clear a chunk's validity bit (spec §4.3 `mark_chunk_invalid`).
    pub fn mark_chunk_invalid(&self, loc: Location) -> Result<(), CacheError> {
        let mut inner = self.inner.lock();
        let rec = &mut inner.zones[loc.zone as usize];
        if !rec.valid[loc.chunk_offset as usize] {
            return Err(CacheError::precondition(format!(
                "invalidating already-invalid chunk at zone {} offset {}",
                loc.zone, loc.chunk_offset
            )));
        }
        rec.valid[loc.chunk_offset as usize] = false;
        rec.chunks_in_use -= 1;
        Ok(())
    }

    /// Precondition: `zone` is Full and has no active readers. Transitions
    /// Full → Invalidating → Free, resetting the backend's own write
    /// pointer to match — otherwise the device still believes the zone's
    /// tail sits at capacity and rejects the next write into it as
    /// out-of-order.
    pub fn evict(&self, zone: ZoneId) -> Result<(), CacheError> {
        if self.active_readers[zone as usize].load(Ordering::Acquire) != 0 {
            return Err(CacheError::precondition(format!(
                "evict called on zone {} with active readers",
                zone
            )));
        }
        {
            let mut inner = self.inner.lock();
            let rec = &mut inner.zones[zone as usize];
            if !matches!(rec.state, ZoneState::Full) {
                return Err(CacheError::precondition(format!(
                    "evict called on zone {} not in Full state",
                    zone
                )));
            }
            rec.state = ZoneState::Invalidating;
        }

        self.device.reset_zone(zone)?;

        let mut inner = self.inner.lock();
        self.reset_locked(&mut inner, zone);
        inner.zones[zone as usize].state = ZoneState::Free;
        inner.active.retain(|&z| z != zone);
        inner.free.push_back(zone);
        trace!(zone, "zone evicted and returned to free pool");
        Ok(())
    }

    /// GC compaction fallback: reset `zone` on both the backend device and
    /// this manager's own bookkeeping, then transition it directly back to
    /// Active with `wp = 0`, skipping Free (spec §4.3/§4.6).
    pub fn evict_and_write(&self, zone: ZoneId) -> Result<(), CacheError> {
        if self.active_readers[zone as usize].load(Ordering::Acquire) != 0 {
            return Err(CacheError::precondition(format!(
                "evict_and_write called on zone {} with active readers",
                zone
            )));
        }
        self.device.reset_zone(zone)?;

        let mut inner = self.inner.lock();
        self.reset_locked(&mut inner, zone);
        let rec = &mut inner.zones[zone as usize];
        rec.state = ZoneState::Active;
        rec.write_pointer = 0;
        Ok(())
    }

    fn reset_locked(&self, inner: &mut Inner, zone: ZoneId) {
        let rec = &mut inner.zones[zone as usize];
        rec.valid.iter_mut().for_each(|v| *v = false);
        rec.chunks_in_use = 0;
        rec.write_pointer = 0;
    }

    pub fn get_num_free_zones(&self) -> u32 {
        self.inner.lock().free.len() as u32
    }

    pub fn get_num_free_chunks(&self) -> u32 {
        let inner = self.inner.lock();
        let chunks_per_zone = self.geometry.chunks_per_zone();
        inner
            .zones
            .iter()
            .map(|z| match z.state {
                ZoneState::Free => chunks_per_zone,
                _ => chunks_per_zone - z.chunks_in_use,
            })
            .sum()
    }

    pub fn chunks_in_use(&self, zone: ZoneId) -> u32 {
        self.inner.lock().zones[zone as usize].chunks_in_use
    }

    pub fn state_of(&self, zone: ZoneId) -> ZoneState {
        self.inner.lock().zones[zone as usize].state
    }
}
