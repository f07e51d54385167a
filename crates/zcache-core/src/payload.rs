//! Payload wire format (spec §6): the first 4 bytes of a chunk carry the
//! data id as a little-endian u32; the rest is opaque workload data.

use rand::RngCore;

use crate::types::DataId;

/// Stands in for the out-of-scope "remote fetch" / payload generator: fills
/// `chunk_size` bytes with the id header followed by pseudo-random data,
/// mirroring the original's `gen_write_buffer` (copy caller-provided random
/// bytes, then stamp the id over the first 4 bytes).
pub fn generate(id: DataId, random_buf: &[u8], chunk_size: usize) -> Vec<u8> {
    let mut data = vec![0u8; chunk_size];
    let copy_len = random_buf.len().min(chunk_size);
    data[..copy_len].copy_from_slice(&random_buf[..copy_len]);
    data[..4].copy_from_slice(&id.to_le_bytes());
    data
}

/// Fills a buffer with random bytes for use as `generate`'s `random_buf`
/// argument (the workload generator this cache sits behind is out of scope;
/// this is the minimal stand-in the core API still needs for `get`).
pub fn random_buffer(chunk_size: usize) -> Vec<u8> {
    let mut buf = vec![0u8; chunk_size];
    rand::thread_rng().fill_bytes(&mut buf);
    buf
}

/// Re-reads a chunk's header and confirms it matches the expected id
/// (spec §6: "the validator re-reads a chunk and compares both").
pub fn validate(data: &[u8], expected_id: DataId) -> bool {
    if data.len() < 4 {
        return false;
    }
    let mut id_bytes = [0u8; 4];
    id_bytes.copy_from_slice(&data[..4]);
    u32::from_le_bytes(id_bytes) == expected_id
}
