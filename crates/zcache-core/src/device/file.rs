//! Conventional-file backend: emulates a sequential-zone device over a
//! regular file, for development and tests.

use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::sync::Mutex;

use crate::error::DeviceError;
use crate::types::{Geometry, ZoneId};

use super::{check_alignment, with_backoff, BlockDevice};

/// A regular file, sized to hold `geometry.num_zones` zones, used as a
/// sequential-zone device stand-in. Enforces the same
/// write-must-land-at-the-tail discipline a real device would, so tests
/// exercise the same invariant violations (spec §6: "the adapter also
/// checks it on conventional-file backends for symmetry").
pub struct FileBackend {
    file: File,
    geometry: Geometry,
    write_pointers: Mutex<Vec<u64>>,
}

impl FileBackend {
    pub fn create(path: &Path, geometry: Geometry) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        let total_bytes = geometry.num_zones as u64 * geometry.zone_size_bytes;
        file.set_len(total_bytes)?;

        Ok(Self {
            file,
            write_pointers: Mutex::new(vec![0u64; geometry.num_zones as usize]),
            geometry,
        })
    }

    fn zone_of(&self, offset: u64) -> ZoneId {
        (offset / self.geometry.zone_size_bytes) as ZoneId
    }
}

impl BlockDevice for FileBackend {
    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<(), DeviceError> {
        check_alignment(offset, buf.len() as u64, self.alignment())?;

        let fd = self.file.as_raw_fd();
        let n = unsafe {
            libc::pread(
                fd,
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
                offset as libc::off_t,
            )
        };
        if n < 0 {
            return Err(DeviceError::Io(std::io::Error::last_os_error().to_string()));
        }
        if n as usize != buf.len() {
            return Err(DeviceError::ShortIo {
                offset,
                wanted: buf.len(),
                got: n as usize,
            });
        }
        Ok(())
    }

    fn write(&self, offset: u64, data: &[u8]) -> Result<(), DeviceError> {
        check_alignment(offset, data.len() as u64, self.alignment())?;

        let zone = self.zone_of(offset);
        {
            let wps = self.write_pointers.lock().unwrap();
            let expected = wps
                .get(zone as usize)
                .copied()
                .ok_or(DeviceError::UnknownZone(zone))?;
            if offset != self.geometry.byte_offset(zone, 0) + expected {
                return Err(DeviceError::Io(format!(
                    "out-of-order write: zone {} expected offset {}, got {}",
                    zone,
                    self.geometry.byte_offset(zone, 0) + expected,
                    offset
                )));
            }
        }

        let fd = self.file.as_raw_fd();
        let result = with_backoff(|_attempt| -> Result<(), DeviceError> {
            let n = unsafe {
                libc::pwrite(
                    fd,
                    data.as_ptr() as *const libc::c_void,
                    data.len(),
                    offset as libc::off_t,
                )
            };
            if n < 0 {
                return Err(DeviceError::Io(std::io::Error::last_os_error().to_string()));
            }
            if n as usize != data.len() {
                return Err(DeviceError::ShortIo {
                    offset,
                    wanted: data.len(),
                    got: n as usize,
                });
            }
            Ok(())
        });

        if result.is_ok() {
            let mut wps = self.write_pointers.lock().unwrap();
            wps[zone as usize] += data.len() as u64;
        }
        result
    }

    fn reset_zone(&self, zone: ZoneId) -> Result<(), DeviceError> {
        let mut wps = self.write_pointers.lock().unwrap();
        let wp = wps.get_mut(zone as usize).ok_or(DeviceError::UnknownZone(zone))?;
        *wp = 0;
        Ok(())
    }

    fn finish_zone(&self, zone: ZoneId) -> Result<(), DeviceError> {
        let wps = self.write_pointers.lock().unwrap();
        if zone as usize >= wps.len() {
            return Err(DeviceError::UnknownZone(zone));
        }
        Ok(())
    }

    fn report_wp(&self, zone: ZoneId) -> Result<u64, DeviceError> {
        let wps = self.write_pointers.lock().unwrap();
        wps.get(zone as usize).copied().ok_or(DeviceError::UnknownZone(zone))
    }

    fn alignment(&self) -> u64 {
        super::DEFAULT_ALIGNMENT.min(self.geometry.chunk_size_bytes)
    }
}
