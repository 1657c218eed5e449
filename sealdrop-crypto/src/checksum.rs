//! POSIX `cksum`.
//!
//! CRC-32 (polynomial 0x04C11DB7, MSB first, zero init) over the data,
//! then over the data length encoded least significant byte first with no
//! trailing zero bytes, then complemented.

use crc::{Crc, Digest, CRC_32_CKSUM};

static CKSUM: Crc<u32> = Crc::<u32>::new(&CRC_32_CKSUM);

/// Streaming `cksum` state.
pub struct Cksum {
    digest: Digest<'static, u32>,
    len: u64,
}

impl Cksum {
    pub fn new() -> Self {
        Self {
            digest: CKSUM.digest(),
            len: 0,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.digest.update(data);
        self.len += data.len() as u64;
    }

    pub fn finalize(mut self) -> u32 {
        let mut n = self.len;
        while n > 0 {
            self.digest.update(&[(n & 0xff) as u8]);
            n >>= 8;
        }
        self.digest.finalize()
    }
}

impl Default for Cksum {
    fn default() -> Self {
        Self::new()
    }
}

/// Computes the `cksum` value of `data`.
pub fn checksum(data: &[u8]) -> u32 {
    let mut cksum = Cksum::new();
    cksum.update(data);
    cksum.finalize()
}
