//! Structural listing of a PNG byte buffer.

use crate::chunk::{ChunkName, FRAME_INDEX_SIZE};
use crate::crc::Crc32;
use crate::error::Result;
use crate::stream::{ChunkTokenizer, Event};

/// One wire-level chunk as found in a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkInfo {
    /// Chunk type code.
    pub name: ChunkName,
    /// Declared payload length.
    pub length: u32,
    /// CRC stored in the file.
    pub stored_crc: u32,
    /// CRC computed over name and payload.
    pub computed_crc: u32,
    /// Frame sequence number for `fcTL`/`fdAT` chunks.
    pub frame_index: Option<u32>,
}

impl ChunkInfo {
    /// True if the stored CRC matches the contents.
    pub fn crc_ok(&self) -> bool {
        self.stored_crc == self.computed_crc
    }
}

/// Decode a complete PNG buffer into its chunk list.
pub fn list_chunks(data: &[u8]) -> Result<Vec<ChunkInfo>> {
    let mut tokenizer = ChunkTokenizer::new();
    let mut chunks = Vec::new();
    let mut current: Option<(ChunkName, u32, Crc32, Vec<u8>)> = None;

    for event in tokenizer.events(data) {
        match event? {
            Event::Signature(_) => {}
            Event::ChunkHeader(header) => {
                let mut crc = Crc32::new();
                crc.update(header.name.as_bytes());
                current = Some((header.name, header.length, crc, Vec::new()));
            }
            Event::ChunkBody(body) => {
                if let Some((name, _, crc, prefix)) = current.as_mut() {
                    crc.update(body);
                    if name.is_frame_ordered() && prefix.len() < FRAME_INDEX_SIZE {
                        let take = body.len().min(FRAME_INDEX_SIZE - prefix.len());
                        prefix.extend_from_slice(&body[..take]);
                    }
                }
            }
            Event::ChunkCrc(stored) => {
                if let Some((name, length, crc, prefix)) = current.take() {
                    let frame_index = (name.is_frame_ordered()
                        && prefix.len() == FRAME_INDEX_SIZE)
                        .then(|| u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]));
                    chunks.push(ChunkInfo {
                        name,
                        length,
                        stored_crc: u32::from_be_bytes(stored),
                        computed_crc: crc.finalize(),
                        frame_index,
                    });
                }
            }
        }
    }
    tokenizer.finish()?;

    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::PNG_SIGNATURE;

    fn chunk(name: &[u8; 4], payload: &[u8], crc: Option<u32>) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        out.extend_from_slice(name);
        out.extend_from_slice(payload);
        let mut full = name.to_vec();
        full.extend_from_slice(payload);
        out.extend_from_slice(&crc.unwrap_or_else(|| Crc32::compute(&full)).to_be_bytes());
        out
    }

    #[test]
    fn test_list_apng_chunks() {
        let mut fctl = 0u32.to_be_bytes().to_vec();
        fctl.extend_from_slice(&[0; 22]);
        let mut fdat = 1u32.to_be_bytes().to_vec();
        fdat.extend_from_slice(b"zz");

        let mut png = PNG_SIGNATURE.to_vec();
        png.extend(chunk(b"IHDR", &[0; 13], None));
        png.extend(chunk(b"fcTL", &fctl, None));
        png.extend(chunk(b"fdAT", &fdat, Some(0xDEADBEEF)));
        png.extend(chunk(b"IEND", b"", None));

        let chunks = list_chunks(&png).unwrap();
        let names: Vec<_> = chunks.iter().map(|c| c.name.to_string()).collect();
        assert_eq!(names, vec!["IHDR", "fcTL", "fdAT", "IEND"]);
        assert_eq!(chunks[0].frame_index, None);
        assert_eq!(chunks[1].frame_index, Some(0));
        assert_eq!(chunks[2].frame_index, Some(1));
        assert!(chunks[1].crc_ok());
        assert!(!chunks[2].crc_ok());
        assert_eq!(chunks[2].length, 6);
    }

    #[test]
    fn test_list_rejects_truncated() {
        let mut png = PNG_SIGNATURE.to_vec();
        png.extend(chunk(b"IHDR", &[0; 13], None));
        assert!(list_chunks(&png).is_err());
    }
}
