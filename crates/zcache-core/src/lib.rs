//! zcache-core - Shared types, configuration, and the block-device contract.
//!
//! This crate has no concurrency policy of its own; it is the vocabulary
//! the concurrent control plane in `zcache-engine` speaks.

pub mod config;
pub mod device;
pub mod error;
pub mod payload;
pub mod types;

pub use config::{Config, DeviceConfig, PolicyKind, Tunables};
pub use device::{BlockDevice, FileBackend, MockZonedBackend};
pub use error::{CacheError, DeviceError, NoActiveZoneReason};
pub use types::{ChunkOffset, DataId, Geometry, Location, ZoneId, ZoneState};
