//! CRC-32 (ISO 3309) as used by PNG chunk trailers.
//!
//! A PNG chunk CRC covers the 4-byte chunk name followed by the chunk
//! payload; the length field is not included. Rewritten chunks always get a
//! freshly computed CRC, so the calculator is incremental: name, frame index
//! and payload fragments can be fed as they are written.

/// CRC-32 lookup table (polynomial 0xEDB88320, reflected).
const CRC32_TABLE: [u32; 256] = {
    let mut table = [0u32; 256];
    let mut i = 0usize;
    while i < 256 {
        let mut crc = i as u32;
        let mut j = 0;
        while j < 8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xEDB88320;
            } else {
                crc >>= 1;
            }
            j += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
};

/// Incremental CRC-32 calculator.
///
/// - Polynomial: 0x04C11DB7 (reflected: 0xEDB88320)
/// - Initial value: 0xFFFFFFFF
/// - Final XOR: 0xFFFFFFFF
///
/// # Example
///
/// ```
/// use zopng_core::crc::Crc32;
///
/// let mut crc = Crc32::new();
/// crc.update(b"IEND");
/// assert_eq!(crc.finalize(), 0xAE426082);
/// ```
#[derive(Debug, Clone)]
pub struct Crc32 {
    state: u32,
}

impl Crc32 {
    /// Create a new calculator.
    pub fn new() -> Self {
        Self { state: 0xFFFFFFFF }
    }

    /// Reset to the initial state.
    pub fn reset(&mut self) {
        self.state = 0xFFFFFFFF;
    }

    /// Feed more bytes.
    pub fn update(&mut self, data: &[u8]) {
        let mut crc = self.state;
        for &byte in data {
            crc = CRC32_TABLE[((crc ^ byte as u32) & 0xFF) as usize] ^ (crc >> 8);
        }
        self.state = crc;
    }

    /// Current value without consuming the calculator.
    pub fn value(&self) -> u32 {
        self.state ^ 0xFFFFFFFF
    }

    /// Finish and return the checksum.
    pub fn finalize(self) -> u32 {
        self.value()
    }

    /// One-shot CRC-32 of a buffer.
    pub fn compute(data: &[u8]) -> u32 {
        let mut crc = Self::new();
        crc.update(data);
        crc.finalize()
    }
}

impl Default for Crc32 {
    fn default() -> Self {
        Self::new()
    }
}
