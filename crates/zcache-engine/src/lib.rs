//! zcache-engine — the concurrent control plane of a zoned-storage block
//! cache: zone state manager, cache map, chunk queue, eviction policies,
//! and the `get` request path that stitches them together.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Cache Core (get)                       │
//! │  hit: read + policy.update(READ) + reader-count release     │
//! │  miss: reserve zone, write, policy.update(WRITE), commit     │
//! └───────────┬─────────────────────────────────┬───────────────┘
//!             │                                  │
//!             ▼                                  ▼
//! ┌───────────────────────┐         ┌─────────────────────────────┐
//! │       Cache Map       │         │      Eviction Policies       │
//! │ id -> Loc/Pending/Empty│        │ zone-LRU  |  chunk-LRU + GC   │
//! └───────────┬───────────┘         └──────────────┬───────────────┘
//!             │                                     │
//!             ▼                                     ▼
//! ┌───────────────────────┐         ┌─────────────────────────────┐
//! │  Zone State Manager   │◄────────┤         Chunk Queue           │
//! │ zones, wp, validity   │         │  LRU + invalid-zone min-heap  │
//! └───────────────────────┘         └─────────────────────────────┘
//! ```
//!
//! Lock order (outermost first, never reacquired): cache map, policy,
//! ZSM. The per-zone active-reader counters are lock-free atomics shared
//! between the cache map and the ZSM.

pub mod cache_map;
pub mod chunk_queue;
pub mod core;
pub mod heap;
pub mod policy;
pub mod stats;
pub mod zsm;

pub use cache_map::{CacheMap, FindResult};
pub use chunk_queue::ChunkQueue;
pub use core::Cache;
pub use policy::chunk::{ChunkPolicy, ChunkThresholds};
pub use policy::promote_zone::ZoneLruPolicy;
pub use policy::{EvictionPolicy, EvictOutcome, IoType};
pub use stats::Stats;
pub use zsm::{ActiveZone, ZoneStateManager};
