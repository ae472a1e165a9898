//! Chunk groups: the logical units of a rewritten file.
//!
//! A group is either exactly one non-image-data chunk, or a run of
//! consecutive same-named image-data chunks merged into one. Frame-ordered
//! chunks (`fcTL`, `fdAT`) have their 4-byte sequence number split off the
//! payload at parse time and put back in front of it at write time.

use zopng_core::chunk::{ChunkName, FRAME_INDEX_SIZE};

/// Index of a recompression task within its job's task set.
pub type TaskSlot = usize;

/// Image-data payload shared by `IDAT` and `fdAT` groups.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageData {
    /// Concatenated wire-level bodies, frame index stripped.
    pub original: Vec<u8>,
    /// Recompression task, absent when the group had no payload bytes.
    pub task: Option<TaskSlot>,
}

impl ImageData {
    /// Size of the original compressed payload.
    pub fn original_len(&self) -> u64 {
        self.original.len() as u64
    }
}

/// One logical unit of the output file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkGroup {
    /// Any chunk passed through verbatim.
    Plain {
        /// Chunk type code.
        name: ChunkName,
        /// Payload bytes.
        payload: Vec<u8>,
    },
    /// `fcTL`: frame-ordered but not image data.
    FrameControl {
        /// Chunk type code.
        name: ChunkName,
        /// Sequence number stripped from the payload.
        frame_index: u32,
        /// Payload bytes after the sequence number.
        payload: Vec<u8>,
    },
    /// `IDAT` run.
    ImageData {
        /// Chunk type code.
        name: ChunkName,
        /// Payload and task.
        data: ImageData,
    },
    /// `fdAT` run.
    FrameImageData {
        /// Chunk type code.
        name: ChunkName,
        /// Sequence number of the first merged chunk.
        frame_index: u32,
        /// Payload and task.
        data: ImageData,
    },
}

impl ChunkGroup {
    /// Chunk type code.
    pub fn name(&self) -> ChunkName {
        match self {
            Self::Plain { name, .. }
            | Self::FrameControl { name, .. }
            | Self::ImageData { name, .. }
            | Self::FrameImageData { name, .. } => *name,
        }
    }

    /// Frame sequence number, for frame-ordered groups.
    pub fn frame_index(&self) -> Option<u32> {
        match self {
            Self::FrameControl { frame_index, .. } | Self::FrameImageData { frame_index, .. } => {
                Some(*frame_index)
            }
            Self::Plain { .. } | Self::ImageData { .. } => None,
        }
    }

    /// Image-data payload, for `IDAT`/`fdAT` groups.
    pub fn image_data(&self) -> Option<&ImageData> {
        match self {
            Self::ImageData { data, .. } | Self::FrameImageData { data, .. } => Some(data),
            Self::Plain { .. } | Self::FrameControl { .. } => None,
        }
    }

    /// Payload of a non-image group.
    pub fn plain_payload(&self) -> Option<&[u8]> {
        match self {
            Self::Plain { payload, .. } | Self::FrameControl { payload, .. } => Some(payload),
            Self::ImageData { .. } | Self::FrameImageData { .. } => None,
        }
    }
}

/// Collects the 4-byte frame index at the head of a frame-ordered payload.
///
/// Bytes may arrive in fragments of any size. The index is produced exactly
/// once; everything after it is handed back as payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameIndexAccumulator {
    buf: [u8; FRAME_INDEX_SIZE],
    filled: usize,
}

impl FrameIndexAccumulator {
    /// Create an empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of index bytes collected so far.
    pub fn filled(&self) -> usize {
        self.filled
    }

    /// Take what is needed from `fragment`.
    ///
    /// Returns the index once it is complete, together with the unconsumed
    /// remainder of `fragment`. Before completion the remainder is empty.
    pub fn push<'a>(&mut self, fragment: &'a [u8]) -> (Option<u32>, &'a [u8]) {
        let take = fragment.len().min(FRAME_INDEX_SIZE - self.filled);
        self.buf[self.filled..self.filled + take].copy_from_slice(&fragment[..take]);
        self.filled += take;
        if self.filled == FRAME_INDEX_SIZE {
            (Some(u32::from_be_bytes(self.buf)), &fragment[take..])
        } else {
            (None, &[])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_in_one_fragment() {
        let mut acc = FrameIndexAccumulator::new();
        let (index, rest) = acc.push(&[0, 0, 1, 2, 0xAA, 0xBB]);
        assert_eq!(index, Some(0x0102));
        assert_eq!(rest, &[0xAA, 0xBB]);
    }

    #[test]
    fn test_index_split_one_and_three() {
        let mut acc = FrameIndexAccumulator::new();
        assert_eq!(acc.push(&[0]), (None, &[][..]));
        assert_eq!(acc.filled(), 1);
        let (index, rest) = acc.push(&[0, 1, 2]);
        assert_eq!(index, Some(0x0102));
        assert!(rest.is_empty());
    }

    #[test]
    fn test_index_byte_by_byte_with_payload() {
        let mut acc = FrameIndexAccumulator::new();
        for b in [0u8, 0, 0] {
            assert_eq!(acc.push(&[b]).0, None);
        }
        let (index, rest) = acc.push(&[9, 7, 7]);
        assert_eq!(index, Some(9));
        assert_eq!(rest, &[7, 7]);
    }

    #[test]
    fn test_group_accessors() {
        let group = ChunkGroup::FrameImageData {
            name: ChunkName::FDAT,
            frame_index: 3,
            data: ImageData {
                original: vec![1, 2, 3],
                task: Some(0),
            },
        };
        assert_eq!(group.name(), ChunkName::FDAT);
        assert_eq!(group.frame_index(), Some(3));
        assert_eq!(group.image_data().unwrap().original_len(), 3);
        assert!(group.plain_payload().is_none());

        let plain = ChunkGroup::Plain {
            name: ChunkName(*b"tEXt"),
            payload: b"a\0b".to_vec(),
        };
        assert_eq!(plain.frame_index(), None);
        assert_eq!(plain.plain_payload(), Some(&b"a\0b"[..]));
    }
}
