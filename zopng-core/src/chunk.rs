//! PNG chunk names and their classification.
//!
//! A chunk on the wire is `[length: u32 BE][name: 4 ASCII letters][payload][crc: u32 BE]`.
//! zopng only distinguishes three kinds of chunk:
//!
//! - image data (`IDAT`, `fdAT`): recompressed, and merged when consecutive,
//! - frame ordered (`fcTL`, `fdAT`): payload starts with a 4-byte sequence number,
//! - everything else: passed through untouched.

use std::fmt;

/// The 8-byte PNG file signature.
pub const PNG_SIGNATURE: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

/// Largest chunk length allowed by the PNG specification (2^31 - 1).
pub const MAX_CHUNK_LENGTH: u32 = 0x7FFF_FFFF;

/// Size of the frame sequence number that prefixes frame-ordered payloads.
pub const FRAME_INDEX_SIZE: usize = 4;

/// A 4-byte chunk type code.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkName(pub [u8; 4]);

impl ChunkName {
    /// Image header.
    pub const IHDR: Self = Self(*b"IHDR");
    /// Static image data.
    pub const IDAT: Self = Self(*b"IDAT");
    /// Image trailer.
    pub const IEND: Self = Self(*b"IEND");
    /// APNG frame control.
    pub const FCTL: Self = Self(*b"fcTL");
    /// APNG frame data.
    pub const FDAT: Self = Self(*b"fdAT");

    /// Raw bytes of the name.
    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }

    /// PNG requires chunk names to be four ASCII letters.
    pub fn is_valid(&self) -> bool {
        self.0.iter().all(u8::is_ascii_alphabetic)
    }

    /// True for chunks that carry compressed pixel data.
    pub fn is_image_data(&self) -> bool {
        *self == Self::IDAT || *self == Self::FDAT
    }

    /// True for chunks whose payload starts with a frame sequence number.
    pub fn is_frame_ordered(&self) -> bool {
        *self == Self::FCTL || *self == Self::FDAT
    }
}

impl From<[u8; 4]> for ChunkName {
    fn from(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for ChunkName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in &self.0 {
            if b.is_ascii_graphic() {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{:02x}", b)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ChunkName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkName({})", self)
    }
}

/// Header of one wire-level chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    /// Chunk type code.
    pub name: ChunkName,
    /// Declared payload length.
    pub length: u32,
}

impl ChunkHeader {
    /// Encode as the 8 bytes that precede a payload on the wire.
    pub fn to_bytes(&self) -> [u8; 8] {
        let mut bytes = [0u8; 8];
        bytes[..4].copy_from_slice(&self.length.to_be_bytes());
        bytes[4..].copy_from_slice(&self.name.0);
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(ChunkName::IDAT.is_image_data());
        assert!(!ChunkName::IDAT.is_frame_ordered());
        assert!(ChunkName::FDAT.is_image_data());
        assert!(ChunkName::FDAT.is_frame_ordered());
        assert!(!ChunkName::FCTL.is_image_data());
        assert!(ChunkName::FCTL.is_frame_ordered());
        assert!(!ChunkName(*b"tEXt").is_image_data());
        assert!(!ChunkName(*b"tEXt").is_frame_ordered());
    }

    #[test]
    fn test_validity() {
        assert!(ChunkName(*b"tEXt").is_valid());
        assert!(!ChunkName(*b"tE1t").is_valid());
        assert!(!ChunkName([0x00, b'A', b'B', b'C']).is_valid());
    }

    #[test]
    fn test_display() {
        assert_eq!(ChunkName::IHDR.to_string(), "IHDR");
        assert_eq!(ChunkName([0x01, b'A', b'B', b'C']).to_string(), "\\x01ABC");
    }

    #[test]
    fn test_header_bytes() {
        let header = ChunkHeader {
            name: ChunkName::IDAT,
            length: 0x0102,
        };
        assert_eq!(header.to_bytes(), [0, 0, 1, 2, b'I', b'D', b'A', b'T']);
    }
}
