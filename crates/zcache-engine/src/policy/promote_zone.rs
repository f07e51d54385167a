//! Zone-granularity policies: plain FIFO (`ZONE`, no promotion on read) and
//! promote-zone (`PROMOTE_ZONE`, promoted to MRU on every read), sharing one
//! LRU-over-zones implementation that differs only in whether reads move a
//! zone to the tail. Grounded in `eviction_policy.h`'s zone-granularity
//! variant.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use zcache_core::{CacheError, Location, ZoneId};

use super::{EvictionPolicy, IoType};

struct State {
    /// front = LRU head (next victim), back = MRU.
    order: VecDeque<ZoneId>,
    /// zone -> position is not tracked precisely (VecDeque has no O(1)
    /// arbitrary removal); zones are looked up linearly, which is fine at
    /// `num_zones` scale (tens to low hundreds).
    present: HashMap<ZoneId, ()>,
}

/// LRU over zones. `promote_on_read = false` gives plain FIFO zone
/// eviction; `true` gives the promote-zone policy (spec §4.6).
pub struct ZoneLruPolicy {
    promote_on_read: bool,
    state: Mutex<State>,
}

impl ZoneLruPolicy {
    pub fn new(promote_on_read: bool) -> Self {
        Self {
            promote_on_read,
            state: Mutex::new(State {
                order: VecDeque::new(),
                present: HashMap::new(),
            }),
        }
    }

    fn promote(state: &mut State, zone: ZoneId) {
        state.order.retain(|&z| z != zone);
        state.order.push_back(zone);
    }

    /// Pop the LRU head (spec §4.6: "`do_evict` pops the head zone from
    /// the LRU and returns its id; the caller is responsible for waiting
    /// out readers and asking ZSM to evict").
    pub fn pop_victim(&self) -> Option<ZoneId> {
        let mut state = self.state.lock();
        let zone = state.order.pop_front()?;
        state.present.remove(&zone);
        Some(zone)
    }
}

impl EvictionPolicy for ZoneLruPolicy {
    fn update(&self, loc: Location, io: IoType) -> Result<(), CacheError> {
        let mut state = self.state.lock();
        match io {
            IoType::Read => {
                if self.promote_on_read && state.present.contains_key(&loc.zone) {
                    Self::promote(&mut state, loc.zone);
                }
            }
            IoType::Write => {
                // Joins the LRU tail when the zone's last chunk is
                // written (spec §4.6); for intermediate writes this is a
                // harmless no-op re-promotion that keeps an in-progress
                // zone from being picked as a victim.
                if !state.present.contains_key(&loc.zone) {
                    state.present.insert(loc.zone, ());
                }
                Self::promote(&mut state, loc.zone);
            }
        }
        Ok(())
    }
}
