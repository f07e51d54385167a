//! Chunk-granularity policy: LRU over individual chunks plus GC with
//! in-place zone compaction. Grounded in `eviction/chunk.c`'s
//! `zn_policy_chunk_update` / `_evict` / `_gc`; the in-place-compaction
//! fallback on "no zones available" goes beyond the original's bare
//! `assert(!"TODO")` and implements spec-described behavior instead.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};
use zcache_core::{BlockDevice, CacheError, Geometry, Location};

use crate::cache_map::CacheMap;
use crate::chunk_queue::ChunkQueue;
use crate::zsm::{ActiveZone, ZoneStateManager};

use super::{EvictionPolicy, EvictOutcome, IoType};

/// Watermarks driving [`ChunkPolicy::do_evict`] (spec §6 tunables).
#[derive(Clone, Copy, Debug)]
pub struct ChunkThresholds {
    pub low_thresh_chunks: u32,
    pub high_thresh_chunks: u32,
    pub high_thresh_zones: u32,
}

pub struct ChunkPolicy {
    geometry: Geometry,
    thresholds: ChunkThresholds,
    queue: Mutex<ChunkQueue>,
    zsm: Arc<ZoneStateManager>,
    cache_map: Arc<CacheMap>,
    device: Arc<dyn BlockDevice>,
    evicting: AtomicBool,
}

impl ChunkPolicy {
    pub fn new(
        geometry: Geometry,
        thresholds: ChunkThresholds,
        zsm: Arc<ZoneStateManager>,
        cache_map: Arc<CacheMap>,
        device: Arc<dyn BlockDevice>,
    ) -> Self {
        Self {
            geometry,
            thresholds,
            queue: Mutex::new(ChunkQueue::new(geometry)),
            zsm,
            cache_map,
            device,
            evicting: AtomicBool::new(false),
        }
    }

    fn total_chunks(&self) -> u32 {
        self.geometry.num_zones * self.geometry.chunks_per_zone()
    }

    fn spin_until_drained(&self, zone: u32) {
        while self.zsm.active_readers[zone as usize].load(Ordering::Acquire) != 0 {
            std::hint::spin_loop();
        }
    }

    /// One GC iteration: pick the Full zone with fewest live chunks,
    /// migrate its valid chunks elsewhere, or compact them in place if no
    /// other zone has room. Returns `false` if there was no Full zone to
    /// reclaim.
    fn gc_iteration(&self) -> Result<bool, CacheError> {
        let (old_zone, mut valid) = match self.queue.lock().zone_dequeue() {
            Some(v) => v,
            None => return Ok(false),
        };

        for loc in &valid {
            self.cache_map.clear_chunk(*loc)?;
        }

        let chunk_size = self.geometry.chunk_size_bytes as usize;
        let zone_capacity = self.geometry.zone_capacity_bytes as usize;
        let mut scratch = vec![0u8; zone_capacity];
        self.device
            .read(self.geometry.byte_offset(old_zone, 0), &mut scratch)?;

        let mut idx = 0;
        while idx < valid.len() {
            let old_loc = valid[idx];
            let chunk_data =
                &scratch[old_loc.chunk_offset as usize * chunk_size..][..chunk_size];

            match self.zsm.get_active_zone() {
                ActiveZone::Success(dest) => {
                    let new_loc = Location::new(dest.zone, dest.chunk_offset, old_loc.id);
                    self.device
                        .write(self.geometry.byte_offset(new_loc.zone, new_loc.chunk_offset), chunk_data)?;
                    self.zsm.mark_chunk_invalid(old_loc)?;
                    self.zsm.return_active_zone(new_loc);
                    self.cache_map.migrate(new_loc.id, new_loc);
                    let chunks_in_use = self.zsm.chunks_in_use(new_loc.zone);
                    self.queue.lock().add_chunk_to_lru(new_loc, chunks_in_use);
                    idx += 1;
                }
                ActiveZone::NoActiveZone(_) => {
                    debug!(old_zone, "no zone available for GC migration, compacting in place");
                    self.compact_in_place(old_zone, &mut valid[idx..], &scratch, chunk_size)?;
                    return Ok(true);
                }
            }
        }

        // All valid chunks migrated elsewhere: old_zone is now empty.
        if !self.cache_map.zone_is_empty(old_zone) {
            return Err(CacheError::precondition(format!(
                "zone {} still has live cache-map entries after GC migration",
                old_zone
            )));
        }
        self.spin_until_drained(old_zone);
        self.zsm.evict(old_zone)?;
        trace!(old_zone, "GC reclaimed zone via migration");
        Ok(true)
    }

    /// Spec §4.6 compaction tie-break: `remaining` MUST be sorted by
    /// ascending `chunk_offset` before rewriting, so moving a later
    /// offset down cannot clobber a chunk still awaiting its own move.
    fn compact_in_place(
        &self,
        old_zone: u32,
        remaining: &mut [Location],
        scratch: &[u8],
        chunk_size: usize,
    ) -> Result<(), CacheError> {
        remaining.sort_by_key(|l| l.chunk_offset);

        self.spin_until_drained(old_zone);
        self.zsm.evict_and_write(old_zone)?;

        for old_loc in remaining.iter() {
            let chunk_data = &scratch[old_loc.chunk_offset as usize * chunk_size..][..chunk_size];
            let dest = self.zsm.reserve_in_zone(old_zone)?;
            let new_loc = Location::new(dest.zone, dest.chunk_offset, old_loc.id);
            self.device
                .write(self.geometry.byte_offset(new_loc.zone, new_loc.chunk_offset), chunk_data)?;
            self.zsm.return_active_zone(new_loc);
            self.cache_map.migrate(new_loc.id, new_loc);
            let chunks_in_use = self.zsm.chunks_in_use(new_loc.zone);
            self.queue.lock().add_chunk_to_lru(new_loc, chunks_in_use);
        }
        Ok(())
    }
}

impl EvictionPolicy for ChunkPolicy {
    fn update(&self, loc: Location, io: IoType) -> Result<(), CacheError> {
        let mut queue = self.queue.lock();
        match io {
            IoType::Write => {
                let chunks_in_use = self.zsm.chunks_in_use(loc.zone);
                queue.add_chunk_to_lru(loc, chunks_in_use);
            }
            IoType::Read => queue.update_chunk_in_lru(loc),
        }
        Ok(())
    }
}

impl ChunkPolicy {
    /// Spec §4.6 `do_evict`, guarded by a `trylock`-equivalent atomic
    /// flag: a concurrent call that finds eviction already in progress
    /// returns immediately rather than blocking.
    pub fn do_evict(&self) -> Result<EvictOutcome, CacheError> {
        if self
            .evicting
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return Ok(EvictOutcome::NoOp);
        }
        let result = self.do_evict_locked();
        self.evicting.store(false, Ordering::Release);
        result
    }

    fn do_evict_locked(&self) -> Result<EvictOutcome, CacheError> {
        let total_chunks = self.total_chunks();
        let in_lru = self.queue.lock().len() as u32;
        let free_chunks = total_chunks.saturating_sub(in_lru);

        if in_lru == 0 || free_chunks > self.thresholds.high_thresh_chunks {
            return Ok(EvictOutcome::NoOp);
        }

        let target = self.thresholds.low_thresh_chunks.saturating_sub(free_chunks);
        for _ in 0..target {
            let popped = self.queue.lock().invalidate_latest_chunk();
            let (loc, _) = match popped {
                Some(v) => v,
                None => break,
            };
            self.zsm.mark_chunk_invalid(loc)?;
            self.cache_map.clear_chunk(loc)?;
        }

        loop {
            if self.zsm.get_num_free_zones() >= self.thresholds.high_thresh_zones {
                break;
            }
            if self.queue.lock().invalid_heap_is_empty() {
                break;
            }
            if !self.gc_iteration()? {
                break;
            }
        }

        warn_if_still_pressured(self);
        Ok(EvictOutcome::Evicted)
    }
}

fn warn_if_still_pressured(policy: &ChunkPolicy) {
    if policy.zsm.get_num_free_zones() == 0 {
        warn!("chunk policy eviction pass left zero free zones");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zcache_core::MockZonedBackend;

    fn geometry() -> Geometry {
        Geometry {
            num_zones: 4,
            zone_size_bytes: 16384,
            zone_capacity_bytes: 16384,
            chunk_size_bytes: 4096,
        }
    }

    fn thresholds() -> ChunkThresholds {
        ChunkThresholds {
            low_thresh_chunks: 4,
            high_thresh_chunks: 8,
            high_thresh_zones: 1,
        }
    }

    fn setup() -> (Arc<ZoneStateManager>, Arc<CacheMap>, Arc<dyn BlockDevice>, ChunkPolicy) {
        let geometry = geometry();
        let device: Arc<dyn BlockDevice> = Arc::new(MockZonedBackend::new(geometry));
        let zsm = ZoneStateManager::new(geometry, 1, device.clone());
        let cache_map = Arc::new(CacheMap::new(zsm.clone()));
        let policy = ChunkPolicy::new(geometry, thresholds(), zsm.clone(), cache_map.clone(), device.clone());
        (zsm, cache_map, device, policy)
    }

    fn fill_zone(
        zsm: &Arc<ZoneStateManager>,
        cache_map: &Arc<CacheMap>,
        device: &Arc<dyn BlockDevice>,
        policy: &ChunkPolicy,
        ids: &[u32],
    ) {
        fill_zone_with_geometry(geometry(), zsm, cache_map, device, policy, ids);
    }

    fn fill_zone_with_geometry(
        geometry: Geometry,
        zsm: &Arc<ZoneStateManager>,
        cache_map: &Arc<CacheMap>,
        device: &Arc<dyn BlockDevice>,
        policy: &ChunkPolicy,
        ids: &[u32],
    ) {
        for &id in ids {
            cache_map.find(id);
            let loc = match zsm.get_active_zone() {
                ActiveZone::Success(l) => Location::new(l.zone, l.chunk_offset, id),
                _ => panic!("expected a free slot"),
            };
            // Payload byte equals the id (ids stay within u8 range across
            // these tests) so a later read can confirm a chunk moved by GC
            // still carries the right data, not just the right mapping.
            device
                .write(geometry.byte_offset(loc.zone, loc.chunk_offset), &vec![id as u8; 4096])
                .unwrap();
            zsm.return_active_zone(loc);
            policy.update(loc, IoType::Write).unwrap();
            cache_map.insert(id, loc).unwrap();
        }
    }

    #[test]
    fn update_then_evict_below_high_thresh_is_a_noop() {
        let (zsm, cache_map, device, policy) = setup();
        fill_zone(&zsm, &cache_map, &device, &policy, &[1, 2]);
        assert!(matches!(policy.do_evict().unwrap(), EvictOutcome::NoOp));
    }

    #[test]
    fn evict_reclaims_chunks_and_zones_under_tight_budget() {
        let thresholds = ChunkThresholds {
            low_thresh_chunks: 4,
            high_thresh_chunks: 8,
            high_thresh_zones: 1,
        };
        let geometry = geometry();
        let device: Arc<dyn BlockDevice> = Arc::new(MockZonedBackend::new(geometry));
        let zsm = ZoneStateManager::new(geometry, 1, device.clone());
        let cache_map = Arc::new(CacheMap::new(zsm.clone()));
        let policy = ChunkPolicy::new(geometry, thresholds, zsm.clone(), cache_map.clone(), device.clone());

        // Fill all 4 zones completely: 16 chunks in_lru, 0 zones free.
        fill_zone(&zsm, &cache_map, &device, &policy, &(1..=16).collect::<Vec<_>>());
        let free_zones_before = zsm.get_num_free_zones();
        assert_eq!(free_zones_before, 0);

        let outcome = policy.do_evict().unwrap();
        assert!(matches!(outcome, EvictOutcome::Evicted));

        // The watermark pass invalidates exactly the oldest 4 ids (the
        // whole of the zone that filled first), which GC then reclaims
        // as an entirely empty zone, bringing the free-zone count up to
        // the high watermark.
        assert!(zsm.get_num_free_zones() >= 1);
        assert!(zsm.get_num_free_zones() >= free_zones_before);

        // The very first id written (the global LRU head) can no longer
        // be a hit: it was invalidated outright by the watermark pass.
        assert!(!matches!(cache_map.find(1), crate::cache_map::FindResult::Hit(_)));
    }

    /// Spec §8 scenario 5: GC under a single-zone budget has nowhere to
    /// migrate a partially-invalidated zone's survivors, so it must fall
    /// back to `compact_in_place` rather than full-zone migration. This
    /// drives that path directly instead of hoping `do_evict` reaches it.
    #[test]
    fn gc_under_single_zone_budget_compacts_in_place() {
        let geometry = Geometry {
            num_zones: 1,
            zone_size_bytes: 16384,
            zone_capacity_bytes: 16384,
            chunk_size_bytes: 4096,
        };
        let device: Arc<dyn BlockDevice> = Arc::new(MockZonedBackend::new(geometry));
        let zsm = ZoneStateManager::new(geometry, 1, device.clone());
        let cache_map = Arc::new(CacheMap::new(zsm.clone()));
        let policy = ChunkPolicy::new(geometry, thresholds(), zsm.clone(), cache_map.clone(), device.clone());

        fill_zone_with_geometry(geometry, &zsm, &cache_map, &device, &policy, &[1, 2, 3, 4]);
        assert_eq!(zsm.get_num_free_zones(), 0);

        // Invalidate the two oldest chunks (ids 1 and 2) by hand, the way
        // do_evict's watermark pass would, leaving zone 0 Full but only
        // half live.
        for _ in 0..2 {
            let (loc, _) = policy.queue.lock().invalidate_latest_chunk().unwrap();
            zsm.mark_chunk_invalid(loc).unwrap();
            cache_map.clear_chunk(loc).unwrap();
        }

        // The only zone in existence is Full, so get_active_zone can't
        // offer GC anywhere else to migrate the survivors: gc_iteration
        // must take the compact_in_place branch.
        assert!(policy.gc_iteration().unwrap());

        assert!(matches!(zsm.state_of(0), zcache_core::ZoneState::Active));
        assert_eq!(zsm.chunks_in_use(0), 2);
        assert_eq!(device.report_wp(0).unwrap(), 2 * geometry.chunk_size_bytes as u64);

        // Survivors land at the front of the zone, in ascending original
        // offset order, each still carrying its own payload.
        let mut scratch = [0u8; 4096];
        for (expected_id, expected_offset) in [(3u32, 0u32), (4u32, 1u32)] {
            match cache_map.find(expected_id) {
                crate::cache_map::FindResult::Hit(loc) => {
                    assert_eq!(loc.chunk_offset, expected_offset);
                    device
                        .read(geometry.byte_offset(loc.zone, loc.chunk_offset), &mut scratch)
                        .unwrap();
                    assert!(scratch.iter().all(|&b| b == expected_id as u8));
                }
                crate::cache_map::FindResult::Writer => panic!("id {} should still be live", expected_id),
            }
        }

        // The invalidated ids never got relocated; they stay tombstoned.
        assert!(matches!(cache_map.find(1), crate::cache_map::FindResult::Writer));
        assert!(matches!(cache_map.find(2), crate::cache_map::FindResult::Writer));
    }
}
