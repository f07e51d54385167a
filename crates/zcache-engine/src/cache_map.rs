//! Cache Map (C4): data-id → physical-location index with in-flight miss
//! rendezvous and per-zone reverse lookup, grounded directly in
//! `cachemap.c`'s `RESULT_LOC` / `RESULT_COND` / `RESULT_EMPTY` states.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::trace;

use zcache_core::{CacheError, ChunkOffset, DataId, Location, ZoneId};

use crate::zsm::ZoneStateManager;

enum Entry {
    /// Durable on disk.
    Loc(Location),
    /// A writer is fetching; waiters block on the shared condvar.
    Pending,
    /// Tombstone: a prior writer failed, or the slot was cleared.
    Empty,
}

/// Outcome of [`CacheMap::find`].
pub enum FindResult {
    /// Caller is a reader; the active-reader count for `Location::zone` has
    /// already been incremented.
    Hit(Location),
    /// Caller is the elected writer for this id.
    Writer,
}

struct Inner {
    entries: HashMap<DataId, Entry>,
    /// zone -> chunk_offset -> data id, to translate "clear zone" into
    /// "invalidate all ids in it".
    reverse: HashMap<ZoneId, HashMap<ChunkOffset, DataId>>,
}

/// Id-keyed index plus in-flight coordination. One lock covers the map, the
/// reverse index, and reader-counter increments on hit; the zone counters
/// themselves are atomics shared with the [`ZoneStateManager`].
pub struct CacheMap {
    inner: Mutex<Inner>,
    condvar: Condvar,
    zsm: Arc<ZoneStateManager>,
}

impl CacheMap {
    pub fn new(zsm: Arc<ZoneStateManager>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                reverse: HashMap::new(),
            }),
            condvar: Condvar::new(),
            zsm,
        }
    }

    /// Spec §4.4 `find`: on hit, increments the zone's active-reader count
    /// before releasing the lock, so the count is always consistent with
    /// "someone holds a `Loc` returned by `find`".
    pub fn find(&self, id: DataId) -> FindResult {
        let mut inner = self.inner.lock();
        loop {
            match inner.entries.get(&id) {
                None => {
                    inner.entries.insert(id, Entry::Pending);
                    trace!(id, "find: installed pending, caller elected writer");
                    return FindResult::Writer;
                }
                Some(Entry::Loc(loc)) => {
                    let loc = *loc;
                    self.zsm.active_readers[loc.zone as usize]
                        .fetch_add(1, std::sync::atomic::Ordering::AcqRel);
                    return FindResult::Hit(loc);
                }
                Some(Entry::Pending) => {
                    self.condvar.wait(&mut inner);
                    // restart loop: spurious wakeups and state flips both possible
                }
                Some(Entry::Empty) => {
                    inner.entries.insert(id, Entry::Pending);
                    trace!(id, "find: tombstone revived, caller elected writer");
                    return FindResult::Writer;
                }
            }
        }
    }

    /// Commit a successful write. Precondition: entry is `Pending`.
    pub fn insert(&self, id: DataId, loc: Location) -> Result<(), CacheError> {
        let mut inner = self.inner.lock();
        match inner.entries.get(&id) {
            Some(Entry::Pending) => {}
            _ => {
                return Err(CacheError::precondition(format!(
                    "insert({}) called without a pending reservation",
                    id
                )))
            }
        }
        inner.entries.insert(id, Entry::Loc(loc));
        inner
            .reverse
            .entry(loc.zone)
            .or_default()
            .insert(loc.chunk_offset, id);
        self.condvar.notify_all();
        Ok(())
    }

    /// GC relocates a chunk's payload to `new_loc` without the `Pending`
    /// handshake `insert` requires: the entry was already tombstoned by
    /// `clear_chunk` earlier in the same GC pass, outside of any writer's
    /// election. If a concurrent finder raced in during the migration
    /// window and became the new elected writer, its own `insert`/`fail`
    /// may subsequently observe a `Loc` it didn't expect — a known brief
    /// miss-window in the chunk-GC design, traded deliberately for a
    /// short critical section rather than fixed.
    pub fn migrate(&self, id: DataId, new_loc: Location) {
        let mut inner = self.inner.lock();
        inner.entries.insert(id, Entry::Loc(new_loc));
        inner
            .reverse
            .entry(new_loc.zone)
            .or_default()
            .insert(new_loc.chunk_offset, id);
        self.condvar.notify_all();
    }

    /// The elected writer failed; wake waiters and leave a tombstone so the
    /// next finder becomes the new writer.
    pub fn fail(&self, id: DataId) -> Result<(), CacheError> {
        let mut inner = self.inner.lock();
        match inner.entries.get(&id) {
            Some(Entry::Pending) => {}
            _ => {
                return Err(CacheError::precondition(format!(
                    "fail({}) called without a pending reservation",
                    id
                )))
            }
        }
        self.condvar.notify_all();
        inner.entries.insert(id, Entry::Empty);
        Ok(())
    }

    /// Invalidate whichever id currently occupies `loc` (GC/compaction and
    /// chunk-eviction both clear single chunks this way).
    pub fn clear_chunk(&self, loc: Location) -> Result<(), CacheError> {
        let mut inner = self.inner.lock();
        let id = inner
            .reverse
            .get_mut(&loc.zone)
            .and_then(|zone_map| zone_map.remove(&loc.chunk_offset))
            .ok_or_else(|| {
                CacheError::precondition(format!(
                    "clear_chunk at zone {} offset {} has no mapped id",
                    loc.zone, loc.chunk_offset
                ))
            })?;
        inner.entries.insert(id, Entry::Empty);
        Ok(())
    }

    /// Invalidate every id currently mapped into `zone` (used before a
    /// zone reset).
    pub fn clear_zone(&self, zone: ZoneId) {
        let mut inner = self.inner.lock();
        if let Some(zone_map) = inner.reverse.remove(&zone) {
            for id in zone_map.into_values() {
                inner.entries.insert(id, Entry::Empty);
            }
        }
    }

    /// True if `zone` has no remaining entries in the reverse index.
    pub fn zone_is_empty(&self, zone: ZoneId) -> bool {
        let inner = self.inner.lock();
        inner
            .reverse
            .get(&zone)
            .map(|m| m.is_empty())
            .unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zcache_core::{BlockDevice, Geometry, MockZonedBackend};

    fn geometry() -> Geometry {
        Geometry {
            num_zones: 4,
            zone_size_bytes: 16384,
            zone_capacity_bytes: 16384,
            chunk_size_bytes: 4096,
        }
    }

    fn device() -> Arc<dyn BlockDevice> {
        Arc::new(MockZonedBackend::new(geometry()))
    }

    #[test]
    fn first_finder_is_elected_writer() {
        let zsm = ZoneStateManager::new(geometry(), 1, device());
        let map = CacheMap::new(zsm);
        assert!(matches!(map.find(7), FindResult::Writer));
    }

    #[test]
    fn insert_then_find_is_a_hit_and_increments_reader_count() {
        let zsm = ZoneStateManager::new(geometry(), 1, device());
        let map = CacheMap::new(zsm.clone());
        map.find(7);
        let loc = Location::new(0, 0, 7);
        map.insert(7, loc).unwrap();

        match map.find(7) {
            FindResult::Hit(l) => assert_eq!(l, loc),
            _ => panic!("expected hit"),
        }
        assert_eq!(
            zsm.active_readers[0].load(std::sync::atomic::Ordering::Acquire),
            1
        );
    }

    #[test]
    fn fail_leaves_a_tombstone_that_elects_a_new_writer() {
        let zsm = ZoneStateManager::new(geometry(), 1, device());
        let map = CacheMap::new(zsm);
        map.find(7);
        map.fail(7).unwrap();
        assert!(matches!(map.find(7), FindResult::Writer));
    }

    #[test]
    fn insert_without_pending_is_a_precondition_violation() {
        let zsm = ZoneStateManager::new(geometry(), 1, device());
        let map = CacheMap::new(zsm);
        let err = map.insert(1, Location::new(0, 0, 1));
        assert!(matches!(err, Err(CacheError::PreconditionViolation(_))));
    }

    #[test]
    fn clear_zone_tombstones_every_id_in_it() {
        let zsm = ZoneStateManager::new(geometry(), 1, device());
        let map = CacheMap::new(zsm);
        map.find(1);
        map.insert(1, Location::new(0, 0, 1)).unwrap();
        map.find(2);
        map.insert(2, Location::new(0, 1, 2)).unwrap();

        map.clear_zone(0);
        assert!(map.zone_is_empty(0));
        assert!(matches!(map.find(1), FindResult::Writer));
        assert!(matches!(map.find(2), FindResult::Writer));
    }

    #[test]
    fn clear_chunk_tombstones_only_that_id() {
        let zsm = ZoneStateManager::new(geometry(), 1, device());
        let map = CacheMap::new(zsm);
        map.find(1);
        map.insert(1, Location::new(0, 0, 1)).unwrap();
        map.find(2);
        map.insert(2, Location::new(0, 1, 2)).unwrap();

        map.clear_chunk(Location::new(0, 0, 1)).unwrap();
        assert!(matches!(map.find(1), FindResult::Writer));
        assert!(matches!(map.find(2), FindResult::Hit(_)));
    }
}
