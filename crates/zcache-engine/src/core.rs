//! Cache Core (C7): the `get` state machine, stitching the cache map, ZSM,
//! and eviction policy together. Mirrors `zn_cache_get` in `cache.c` almost
//! line for line.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

use tracing::{trace, warn};
use zcache_core::{
    BlockDevice, CacheError, Config, DataId, Location, NoActiveZoneReason, PolicyKind,
};

use crate::cache_map::{CacheMap, FindResult};
use crate::policy::chunk::{ChunkPolicy, ChunkThresholds};
use crate::policy::promote_zone::ZoneLruPolicy;
use crate::policy::{EvictionPolicy, EvictOutcome, IoType};
use crate::stats::Stats;
use crate::zsm::{ActiveZone, ZoneStateManager};

/// Dispatches to whichever concrete eviction strategy the cache was
/// configured with (spec §6 policy selector `ZONE | PROMOTE_ZONE | CHUNK`).
enum Policy {
    ZoneLru(ZoneLruPolicy),
    Chunk(ChunkPolicy),
}

impl Policy {
    fn update(&self, loc: Location, io: IoType) -> Result<(), CacheError> {
        match self {
            Policy::ZoneLru(p) => p.update(loc, io),
            Policy::Chunk(p) => p.update(loc, io),
        }
    }
}

/// The cache control plane: ties the block I/O adapter, ZSM, cache map,
/// and eviction policy into the `get` request path.
pub struct Cache {
    device: Arc<dyn BlockDevice>,
    zsm: Arc<ZoneStateManager>,
    cache_map: Arc<CacheMap>,
    policy: Policy,
    evict_low_thresh_zones: u32,
    stats: Stats,
}

impl Cache {
    /// Spec §6 `init`: device/backend, geometry, and policy selection.
    /// Workload generation, the CLI, and telemetry sinks are external
    /// collaborators (spec §1 Non-goals) and are not parameters here; the
    /// metrics sink is wired up separately via [`crate::stats::Stats`]
    /// from `config.tunables.metrics_path` if the caller wants one.
    pub fn init(config: &Config, device: Arc<dyn BlockDevice>) -> Self {
        let geometry = config.device.geometry();
        let zsm = ZoneStateManager::new(geometry, config.tunables.max_open_zones, device.clone());
        let cache_map = Arc::new(CacheMap::new(zsm.clone()));

        let policy = match config.tunables.policy {
            PolicyKind::Zone => Policy::ZoneLru(ZoneLruPolicy::new(false)),
            PolicyKind::PromoteZone => Policy::ZoneLru(ZoneLruPolicy::new(true)),
            PolicyKind::Chunk => Policy::Chunk(ChunkPolicy::new(
                geometry,
                ChunkThresholds {
                    low_thresh_chunks: config.tunables.evict_low_thresh_chunks,
                    high_thresh_chunks: config.tunables.evict_high_thresh_chunks,
                    high_thresh_zones: config.tunables.evict_high_thresh_zones,
                },
                zsm.clone(),
                cache_map.clone(),
                device.clone(),
            )),
        };

        Cache {
            device,
            zsm,
            cache_map,
            policy,
            evict_low_thresh_zones: config.tunables.evict_low_thresh_zones,
            stats: Stats::new(),
        }
    }

    fn chunk_size(&self) -> usize {
        self.zsm.geometry().chunk_size_bytes as usize
    }

    fn offset_of(&self, loc: Location) -> u64 {
        self.zsm.geometry().byte_offset(loc.zone, loc.chunk_offset)
    }

    /// Spec §4.7 `get`.
    pub fn get(&self, id: DataId, random_buf: &[u8]) -> Result<Vec<u8>, CacheError> {
        match self.cache_map.find(id) {
            FindResult::Hit(loc) => self.get_hit(id, loc),
            FindResult::Writer => self.get_miss(id, random_buf),
        }
    }

    fn get_hit(&self, id: DataId, loc: Location) -> Result<Vec<u8>, CacheError> {
        let mut buf = vec![0u8; self.chunk_size()];
        let read_result = self.device.read(self.offset_of(loc), &mut buf);
        // The reader-count increment happened inside `find`; it must be
        // released whether or not the read itself succeeded (spec §7:
        // "the reader counter is — once acquired, it must be released").
        self.zsm.active_readers[loc.zone as usize].fetch_sub(1, Ordering::AcqRel);
        read_result?;
        self.policy.update(loc, IoType::Read)?;
        self.stats.record_hit();
        trace!(id, zone = loc.zone, "get: hit");
        Ok(buf)
    }

    fn get_miss(&self, id: DataId, random_buf: &[u8]) -> Result<Vec<u8>, CacheError> {
        let reservation = loop {
            match self.zsm.get_active_zone() {
                ActiveZone::Success(loc) => break loc,
                ActiveZone::NoActiveZone(NoActiveZoneReason::Retry) => {
                    thread::yield_now();
                    continue;
                }
                ActiveZone::NoActiveZone(NoActiveZoneReason::Evict) => {
                    self.foreground_evict()?;
                    continue;
                }
                ActiveZone::NoActiveZone(NoActiveZoneReason::Fatal) => {
                    self.cache_map.fail(id)?;
                    return Err(CacheError::NoActiveZone(NoActiveZoneReason::Fatal));
                }
            }
        };

        let data = zcache_core::payload::generate(id, random_buf, self.chunk_size());

        if let Err(e) = self.device.write(self.offset_of(reservation), &data) {
            // UNDO_ZONE_GET, then UNDO_MAP.
            self.zsm.failed_to_write(reservation)?;
            self.cache_map.fail(id)?;
            return Err(e.into());
        }

        let loc = Location::new(reservation.zone, reservation.chunk_offset, id);
        self.zsm.return_active_zone(loc);
        self.policy.update(loc, IoType::Write)?;
        self.cache_map.insert(id, loc)?;
        self.stats.record_miss();
        trace!(id, zone = loc.zone, "get: miss, wrote and committed");
        Ok(data)
    }

    /// Spec §4.7 "foreground eviction": branches on policy kind.
    fn foreground_evict(&self) -> Result<(), CacheError> {
        match &self.policy {
            Policy::ZoneLru(zone_policy) => {
                while self.zsm.get_num_free_zones() < self.evict_low_thresh_zones {
                    let zone = match zone_policy.pop_victim() {
                        Some(z) => z,
                        None => break,
                    };
                    self.cache_map.clear_zone(zone);
                    while self.zsm.active_readers[zone as usize].load(Ordering::Acquire) != 0 {
                        std::hint::spin_loop();
                    }
                    self.zsm.evict(zone)?;
                }
                Ok(())
            }
            Policy::Chunk(chunk_policy) => match chunk_policy.do_evict()? {
                EvictOutcome::Evicted | EvictOutcome::NoOp => Ok(()),
            },
        }
    }

    pub fn hit_ratio(&self) -> f64 {
        self.stats.hit_ratio()
    }

    /// No persistent state outlives the process (spec §1 Non-goals:
    /// "durability across restarts"); destroy is a no-op retained for API
    /// symmetry with the original cache-core contract.
    pub fn destroy(&self) {
        warn!(
            hits = self.stats.hits(),
            misses = self.stats.misses(),
            "cache destroyed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zcache_core::{DeviceConfig, MockZonedBackend, Tunables};

    fn config(policy: PolicyKind) -> Config {
        Config {
            device: DeviceConfig {
                path: None,
                num_zones: 4,
                zone_size_bytes: 16384,
                zone_capacity_bytes: 16384,
                chunk_size_bytes: 4096,
            },
            tunables: Tunables {
                policy,
                max_open_zones: 1,
                ..Tunables::default()
            },
        }
    }

    fn cache(policy: PolicyKind) -> Cache {
        let cfg = config(policy);
        let device = Arc::new(MockZonedBackend::new(cfg.device.geometry()));
        Cache::init(&cfg, device)
    }

    #[test]
    fn cold_miss_then_hit_matches_scenario_one() {
        let cache = cache(PolicyKind::Chunk);
        let random = zcache_core::payload::random_buffer(4096);

        let first = cache.get(7, &random).unwrap();
        assert!(zcache_core::payload::validate(&first, 7));

        let second = cache.get(7, &random).unwrap();
        assert_eq!(first, second);
        assert_eq!(cache.hit_ratio(), 0.5);
    }

    #[test]
    fn elected_writer_failure_is_reported_and_next_caller_retries() {
        let cfg = config(PolicyKind::Chunk);
        let device = Arc::new(MockZonedBackend::new(cfg.device.geometry()));
        device.inject_write_failure_at(0);
        let cache = Cache::init(&cfg, device);
        let random = zcache_core::payload::random_buffer(4096);

        assert!(cache.get(99, &random).is_err());
        // The tombstone left by `fail` lets a subsequent caller retry.
        let data = cache.get(99, &random).unwrap();
        assert!(zcache_core::payload::validate(&data, 99));
    }

    #[test]
    fn zone_policy_hits_and_misses_track_distinct_ids() {
        let cache = cache(PolicyKind::Zone);
        let random = zcache_core::payload::random_buffer(4096);
        cache.get(1, &random).unwrap();
        cache.get(2, &random).unwrap();
        cache.get(1, &random).unwrap();
        assert!((cache.hit_ratio() - (1.0 / 3.0)).abs() < 1e-9);
    }

    #[test]
    fn in_flight_coalescing_issues_exactly_one_write() {
        let cfg = config(PolicyKind::Chunk);
        let device = Arc::new(MockZonedBackend::new(cfg.device.geometry()));
        let cache = Arc::new(Cache::init(&cfg, device));

        let results: Vec<Vec<u8>> = thread::scope(|scope| {
            let handles: Vec<_> = (0..10)
                .map(|_| {
                    let cache = cache.clone();
                    scope.spawn(move || {
                        let random = zcache_core::payload::random_buffer(4096);
                        cache.get(42, &random).unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let first = &results[0];
        assert!(results.iter().all(|r| r == first));
        assert!(zcache_core::payload::validate(first, 42));
        assert_eq!(cache.hit_ratio(), 9.0 / 10.0);
    }

    #[test]
    fn fill_and_evict_under_chunk_policy_evicts_only_unread_ids() {
        let cfg = Config {
            device: DeviceConfig {
                path: None,
                num_zones: 4,
                zone_size_bytes: 16384,
                zone_capacity_bytes: 16384,
                chunk_size_bytes: 4096,
            },
            tunables: Tunables {
                policy: PolicyKind::Chunk,
                max_open_zones: 1,
                evict_low_thresh_chunks: 8,
                evict_high_thresh_chunks: 12,
                evict_low_thresh_zones: 1,
                evict_high_thresh_zones: 2,
                ..Tunables::default()
            },
        };
        let device = Arc::new(MockZonedBackend::new(cfg.device.geometry()));
        let cache = Cache::init(&cfg, device);
        let random = zcache_core::payload::random_buffer(4096);

        for id in 0..16u32 {
            cache.get(id, &random).unwrap();
        }
        // Promote 8..15 to most-recently-used so 0..7 are the eviction
        // candidates (spec §8 scenario 4).
        for id in 8..16u32 {
            cache.get(id, &random).unwrap();
        }

        for id in 16..20u32 {
            cache.get(id, &random).unwrap();
        }

        for id in 8..16u32 {
            match cache.cache_map.find(id) {
                FindResult::Hit(loc) => {
                    cache.zsm.active_readers[loc.zone as usize].fetch_sub(1, Ordering::AcqRel);
                }
                FindResult::Writer => panic!("id {} should still be cached", id),
            }
        }
    }

    #[test]
    fn zone_eviction_waits_for_readers_before_resetting() {
        let cache = cache(PolicyKind::Zone);
        let random = zcache_core::payload::random_buffer(4096);
        // Fill the only zone budget permits (max_open_zones = 1) to
        // capacity so it becomes Full.
        for id in 0..4u32 {
            cache.get(id, &random).unwrap();
        }

        let hold = match cache.cache_map.find(0) {
            FindResult::Hit(loc) => loc,
            _ => panic!("expected a hit"),
        };
        assert_eq!(
            cache.zsm.active_readers[hold.zone as usize].load(Ordering::Acquire),
            1
        );

        // A zone can't be evicted while a reader holds it.
        assert!(cache.zsm.evict(hold.zone).is_err());

        cache.zsm.active_readers[hold.zone as usize].fetch_sub(1, Ordering::AcqRel);
        assert!(cache.zsm.evict(hold.zone).is_ok());

        // A previously cached id in the reset zone is now a fresh miss.
        assert!(matches!(cache.cache_map.find(1), FindResult::Writer));
    }
}
