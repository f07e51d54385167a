//! In-memory backend for tests: can inject write failures on specific
//! offsets/zones and override the reported hardware write pointer.

use std::sync::Mutex;

use crate::error::DeviceError;
use crate::types::{Geometry, ZoneId};

use super::{check_alignment, BlockDevice};

struct State {
    bytes: Vec<u8>,
    write_pointers: Vec<u64>,
    /// Offsets whose next write attempt should fail (consumed on use).
    fail_offsets: std::collections::HashSet<u64>,
}

/// An in-memory zoned backend for unit and property tests.
pub struct MockZonedBackend {
    geometry: Geometry,
    state: Mutex<State>,
}

impl MockZonedBackend {
    pub fn new(geometry: Geometry) -> Self {
        let total = geometry.num_zones as usize * geometry.zone_size_bytes as usize;
        Self {
            geometry,
            state: Mutex::new(State {
                bytes: vec![0u8; total],
                write_pointers: vec![0u64; geometry.num_zones as usize],
                fail_offsets: std::collections::HashSet::new(),
            }),
        }
    }

    /// The next write landing at `offset` will fail (once), simulating the
    /// "elected-writer failure" scenario (spec §8 scenario 3).
    pub fn inject_write_failure_at(&self, offset: u64) {
        self.state.lock().unwrap().fail_offsets.insert(offset);
    }

    fn zone_of(&self, offset: u64) -> ZoneId {
        (offset / self.geometry.zone_size_bytes) as ZoneId
    }
}

impl BlockDevice for MockZonedBackend {
    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<(), DeviceError> {
        check_alignment(offset, buf.len() as u64, self.alignment())?;
        let state = self.state.lock().unwrap();
        let start = offset as usize;
        let end = start + buf.len();
        if end > state.bytes.len() {
            return Err(DeviceError::Io("read past end of device".into()));
        }
        buf.copy_from_slice(&state.bytes[start..end]);
        Ok(())
    }

    fn write(&self, offset: u64, data: &[u8]) -> Result<(), DeviceError> {
        check_alignment(offset, data.len() as u64, self.alignment())?;

        let zone = self.zone_of(offset);
        let mut state = self.state.lock().unwrap();

        if state.fail_offsets.remove(&offset) {
            return Err(DeviceError::Io(format!("injected write failure at offset {}", offset)));
        }

        let expected = *state
            .write_pointers
            .get(zone as usize)
            .ok_or(DeviceError::UnknownZone(zone))?;
        let zone_start = self.geometry.byte_offset(zone, 0);
        if offset != zone_start + expected {
            return Err(DeviceError::Io(format!(
                "out-of-order write: zone {} expected offset {}, got {}",
                zone,
                zone_start + expected,
                offset
            )));
        }

        let start = offset as usize;
        let end = start + data.len();
        state.bytes[start..end].copy_from_slice(data);
        state.write_pointers[zone as usize] += data.len() as u64;
        Ok(())
    }

    fn reset_zone(&self, zone: ZoneId) -> Result<(), DeviceError> {
        let mut state = self.state.lock().unwrap();
        let wp = state
            .write_pointers
            .get_mut(zone as usize)
            .ok_or(DeviceError::UnknownZone(zone))?;
        *wp = 0;
        Ok(())
    }

    fn finish_zone(&self, zone: ZoneId) -> Result<(), DeviceError> {
        let state = self.state.lock().unwrap();
        if zone as usize >= state.write_pointers.len() {
            return Err(DeviceError::UnknownZone(zone));
        }
        Ok(())
    }

    fn report_wp(&self, zone: ZoneId) -> Result<u64, DeviceError> {
        let state = self.state.lock().unwrap();
        state
            .write_pointers
            .get(zone as usize)
            .copied()
            .ok_or(DeviceError::UnknownZone(zone))
    }

    fn alignment(&self) -> u64 {
        super::DEFAULT_ALIGNMENT.min(self.geometry.chunk_size_bytes)
    }
}
