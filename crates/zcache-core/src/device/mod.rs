//! Block I/O adapter (C1): aligned positional read/write, zone reset/finish,
//! hiding conventional-file vs. sequential-zone-device backends.

mod file;
mod mock;

pub use file::FileBackend;
pub use mock::MockZonedBackend;

use std::thread;
use std::time::Duration;

use tracing::warn;

use crate::error::DeviceError;
use crate::types::ZoneId;

/// Typical sequential-zone device alignment.
pub const DEFAULT_ALIGNMENT: u64 = 4096;

/// I/O retry schedule (spec §4.1, §6): 5 attempts, starting at 100ms, doubling.
pub const BACKOFF_US_START: u64 = 100_000;
pub const BACKOFF_RETRIES: u32 = 5;

/// The block I/O adapter contract every backend implements.
pub trait BlockDevice: Send + Sync {
    /// Read `buf.len()` bytes starting at `offset`. Both MUST be multiples
    /// of `alignment()`.
    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<(), DeviceError>;

    /// Append-write `data` at `offset`. The caller guarantees `offset` is
    /// the zone's current write pointer. Retries internally with
    /// exponential backoff before reporting failure.
    fn write(&self, offset: u64, data: &[u8]) -> Result<(), DeviceError>;

    /// Return a zone to empty. Valid only when the zone has no outstanding I/O.
    fn reset_zone(&self, zone: ZoneId) -> Result<(), DeviceError>;

    /// Mark a zone finished (no further writes will land in it before reset).
    fn finish_zone(&self, zone: ZoneId) -> Result<(), DeviceError>;

    /// Current hardware write pointer for `zone`, in bytes from the zone's start.
    /// Used to reconcile after a partial write on sequential-zone devices.
    fn report_wp(&self, zone: ZoneId) -> Result<u64, DeviceError>;

    /// Alignment required of all offsets and lengths.
    fn alignment(&self) -> u64 {
        DEFAULT_ALIGNMENT
    }
}

pub(crate) fn check_alignment(offset: u64, len: u64, align: u64) -> Result<(), DeviceError> {
    if offset % align != 0 || len % align != 0 {
        return Err(DeviceError::Alignment { offset, len, align });
    }
    Ok(())
}

/// Runs `attempt` up to `BACKOFF_RETRIES` times, sleeping
/// `BACKOFF_US_START * 2^n` microseconds between tries. Returns the last
/// error if every attempt fails.
pub(crate) fn with_backoff<T, E>(
    mut attempt: impl FnMut(u32) -> Result<T, E>,
) -> Result<T, E> {
    let mut wait_us = BACKOFF_US_START;
    let mut last_err = None;
    for try_num in 0..BACKOFF_RETRIES {
        match attempt(try_num) {
            Ok(v) => return Ok(v),
            Err(e) => {
                if try_num + 1 < BACKOFF_RETRIES {
                    warn!(attempt = try_num, wait_us, "I/O attempt failed, retrying");
                    thread::sleep(Duration::from_micros(wait_us));
                    wait_us *= 2;
                }
                last_err = Some(e);
            }
        }
    }
    Err(last_err.expect("loop runs at least once"))
}
