//! Record framing and the rolling checksum shared by the write and read paths.
//!
//! A framed record is `[Size:4][Checksum:4][Data:Size]`, integers big-endian i32.

use byteorder::{BigEndian, ByteOrder};

/// Multiplier of the rolling checksum.
pub const SEED: i32 = 13331;

/// Offset of the size field within a framed record.
pub const OF_SIZE: usize = 0;
/// Offset of the checksum field within a framed record.
pub const OF_CHECKSUM: usize = OF_SIZE + 4;
/// Offset of the payload within a framed record.
pub const OF_DATA: usize = OF_CHECKSUM + 4;

/// Folds `bytes` into `acc`: `acc = acc * SEED + b` for every byte.
///
/// Bytes are taken as signed 8-bit values and the arithmetic wraps at 32 bits,
/// so the result is identical on every platform and build profile.
pub fn fold(acc: i32, bytes: &[u8]) -> i32 {
    bytes.iter().fold(acc, |acc, &b| {
        acc.wrapping_mul(SEED).wrapping_add(i32::from(b as i8))
    })
}

/// Frames `data` as a log record.
pub fn wrap(data: &[u8]) -> Vec<u8> {
    let mut record = vec![0u8; OF_DATA + data.len()];
    BigEndian::write_i32(&mut record[OF_SIZE..OF_CHECKSUM], data.len() as i32);
    BigEndian::write_i32(&mut record[OF_CHECKSUM..OF_DATA], fold(0, data));
    record[OF_DATA..].copy_from_slice(data);
    record
}

/// Checks a framed record against its stored checksum.
pub fn verify(record: &[u8]) -> bool {
    if record.len() < OF_DATA {
        return false;
    }
    let stored = BigEndian::read_i32(&record[OF_CHECKSUM..OF_DATA]);
    fold(0, &record[OF_DATA..]) == stored
}
