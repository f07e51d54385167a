//! Error taxonomy for the block-device contract and the cache control plane.

use thiserror::Error;

use crate::types::ZoneId;

/// Errors surfaced by the block I/O adapter (C1).
#[derive(Error, Debug, Clone)]
pub enum DeviceError {
    #[error("offset {offset} or length {len} is not a multiple of the device alignment ({align})")]
    Alignment { offset: u64, len: u64, align: u64 },

    #[error("short I/O at offset {offset}: wanted {wanted} bytes, got {got} after retries")]
    ShortIo { offset: u64, wanted: usize, got: usize },

    #[error("zone {0} is unknown to this device")]
    UnknownZone(ZoneId),

    #[error("I/O error: {0}")]
    Io(String),
}

/// ZSM's classification of "no active zone available" (spec C3 `get_active_zone`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoActiveZoneReason {
    /// Transient contention; caller should yield and retry.
    Retry,
    /// All active zones are saturated; caller should evict and retry.
    Evict,
    /// No zone is reclaimable at all; fatal for this request.
    Fatal,
}

/// Errors from the concurrent control plane (cache map, ZSM, policies, core).
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("no active zone available: {0:?}")]
    NoActiveZone(NoActiveZoneReason),

    #[error("write failed after retries at zone {zone} offset {chunk_offset}")]
    WriteFailed { zone: ZoneId, chunk_offset: u32 },

    /// An invariant was found broken (wrong-offset write, invalidating an
    /// absent chunk, etc). These are bugs, not recoverable conditions: the
    /// caller decides whether to abort the process.
    #[error("precondition violated: {0}")]
    PreconditionViolation(String),
}

impl CacheError {
    pub fn precondition(msg: impl Into<String>) -> Self {
        CacheError::PreconditionViolation(msg.into())
    }
}
