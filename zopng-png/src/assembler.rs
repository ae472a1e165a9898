//! Turns tokenizer events into chunk groups.
//!
//! Consecutive chunks merge into one group only when they share a name and
//! that name is an image-data tag (`IDAT`, `fdAT`); every other chunk is its
//! own group, even when an identical chunk follows it. Frame-ordered groups
//! (`fcTL`, `fdAT`) lose their leading 4-byte sequence number, which may be
//! split across several body events.
//!
//! Image-data bytes are teed: the compressed bytes are kept for the size
//! comparison and possible verbatim reuse, and they are inflated straight to
//! the group's scratch file. A group is sealed, and its task submitted, when
//! a chunk that does not merge into it begins or the stream closes.

use crate::group::{ChunkGroup, FrameIndexAccumulator, ImageData, TaskSlot};
use crate::scratch::ScratchInflater;
use crate::task::TaskSet;
use tracing::trace;
use zopng_core::chunk::{ChunkName, MAX_CHUNK_LENGTH};
use zopng_core::error::{Result, ZopngError};
use zopng_core::stream::Event;

/// The group still receiving bytes.
#[derive(Debug)]
struct OpenGroup {
    name: ChunkName,
    start: u64,
    strip: Option<FrameIndexAccumulator>,
    frame_index: Option<u32>,
    payload: Vec<u8>,
    inflater: Option<(TaskSlot, ScratchInflater)>,
}

impl OpenGroup {
    fn new(name: ChunkName, start: u64) -> Self {
        Self {
            name,
            start,
            strip: name.is_frame_ordered().then(FrameIndexAccumulator::new),
            frame_index: None,
            payload: Vec::new(),
            inflater: None,
        }
    }
}

/// Builds the ordered list of chunk groups for one file.
#[derive(Debug, Default)]
pub struct ChunkGroupAssembler {
    signature: Option<[u8; 8]>,
    groups: Vec<ChunkGroup>,
    open: Option<OpenGroup>,
    offset: u64,
}

impl ChunkGroupAssembler {
    /// Create an empty assembler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one tokenizer event.
    pub async fn feed(&mut self, event: Event<'_>, tasks: &mut TaskSet) -> Result<()> {
        match event {
            Event::Signature(signature) => {
                self.signature = Some(signature);
                self.offset += signature.len() as u64;
            }
            Event::ChunkHeader(header) => {
                let merges = matches!(
                    &self.open,
                    Some(open) if open.name == header.name && header.name.is_image_data()
                );
                if merges {
                    trace!(chunk = %header.name, length = header.length, "merging chunk");
                } else {
                    if let Some(open) = self.open.take() {
                        self.seal(open, tasks).await?;
                    }
                    self.open = Some(OpenGroup::new(header.name, self.offset));
                }
                self.offset += 8;
            }
            Event::ChunkBody(bytes) => {
                self.append(bytes, tasks).await?;
                self.offset += bytes.len() as u64;
            }
            Event::ChunkCrc(_) => self.offset += 4,
        }
        Ok(())
    }

    async fn append(&mut self, mut bytes: &[u8], tasks: &mut TaskSet) -> Result<()> {
        let offset = self.offset;
        let Some(open) = self.open.as_mut() else {
            return Err(ZopngError::format(offset, "chunk body outside of a chunk"));
        };

        if let Some(strip) = open.strip.as_mut() {
            let (index, rest) = strip.push(bytes);
            if let Some(index) = index {
                open.frame_index = Some(index);
                open.strip = None;
            }
            bytes = rest;
        }
        if bytes.is_empty() {
            return Ok(());
        }

        if open.payload.len() + bytes.len() > MAX_CHUNK_LENGTH as usize {
            return Err(ZopngError::format(
                offset,
                format!("merged {} payload exceeds the chunk length limit", open.name),
            ));
        }
        if open.name.is_image_data() {
            if open.inflater.is_none() {
                open.inflater = Some(tasks.open_scratch()?);
            }
            if let Some((_, inflater)) = open.inflater.as_mut() {
                inflater.write(bytes).await?;
            }
        }
        open.payload.extend_from_slice(bytes);
        Ok(())
    }

    async fn seal(&mut self, open: OpenGroup, tasks: &mut TaskSet) -> Result<()> {
        let OpenGroup {
            name,
            start,
            frame_index,
            payload,
            inflater,
            ..
        } = open;

        let frame_index = match (name.is_frame_ordered(), frame_index) {
            (true, None) => {
                return Err(ZopngError::format(
                    start,
                    format!("{} chunk is too short for its sequence number", name),
                ));
            }
            (_, index) => index,
        };

        let group = if name.is_image_data() {
            let task = match inflater {
                Some((slot, inflater)) => {
                    inflater.finish().await?;
                    tasks.submit(slot).await?;
                    Some(slot)
                }
                None => None,
            };
            let data = ImageData {
                original: payload,
                task,
            };
            match frame_index {
                Some(frame_index) => ChunkGroup::FrameImageData {
                    name,
                    frame_index,
                    data,
                },
                None => ChunkGroup::ImageData { name, data },
            }
        } else {
            match frame_index {
                Some(frame_index) => ChunkGroup::FrameControl {
                    name,
                    frame_index,
                    payload,
                },
                None => ChunkGroup::Plain { name, payload },
            }
        };
        trace!(chunk = %name, "sealed group");
        self.groups.push(group);
        Ok(())
    }

    /// Seal the last group and hand back the signature and every group.
    pub async fn close(mut self, tasks: &mut TaskSet) -> Result<([u8; 8], Vec<ChunkGroup>)> {
        if let Some(open) = self.open.take() {
            self.seal(open, tasks).await?;
        }
        let signature = self
            .signature
            .ok_or_else(|| ZopngError::unexpected_eof("missing PNG signature"))?;
        Ok((signature, self.groups))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::RecompressorConfig;
    use crate::serializer::{Invocation, LaunchFuture, LaunchSerializer, Launcher, ProcessExit};
    use flate2::Compression;
    use flate2::write::ZlibEncoder;
    use std::io::Write;
    use std::path::Path;
    use std::sync::Arc;
    use zopng_core::PNG_SIGNATURE;
    use zopng_core::crc::Crc32;
    use zopng_core::stream::ChunkTokenizer;

    struct NoopLauncher;

    impl Launcher for NoopLauncher {
        fn launch<'a>(&'a self, _invocation: &'a Invocation) -> LaunchFuture<'a> {
            Box::pin(async { Ok(ProcessExit { code: Some(0) }) })
        }
    }

    fn chunk(name: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut out = (payload.len() as u32).to_be_bytes().to_vec();
        out.extend_from_slice(name);
        out.extend_from_slice(payload);
        let mut crc = Crc32::new();
        crc.update(name);
        crc.update(payload);
        out.extend_from_slice(&crc.finalize().to_be_bytes());
        out
    }

    fn zlib(data: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::fast());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn tasks(dir: &Path) -> TaskSet {
        TaskSet::new(
            "a.png",
            dir,
            RecompressorConfig::default(),
            LaunchSerializer::new(Arc::new(NoopLauncher)),
        )
    }

    async fn assemble(
        png: &[u8],
        read_size: usize,
        tasks: &mut TaskSet,
    ) -> Result<Vec<ChunkGroup>> {
        let mut tokenizer = ChunkTokenizer::new();
        let mut assembler = ChunkGroupAssembler::new();
        for read in png.chunks(read_size) {
            for event in tokenizer.events(read) {
                assembler.feed(event?, tasks).await?;
            }
        }
        tokenizer.finish()?;
        Ok(assembler.close(tasks).await?.1)
    }

    #[tokio::test]
    async fn test_idat_chunks_merge_text_chunks_do_not() {
        let stream = zlib(&[7u8; 3000]);
        let (a, b) = stream.split_at(stream.len() / 2);

        let mut png = PNG_SIGNATURE.to_vec();
        png.extend(chunk(b"IHDR", &[0; 13]));
        png.extend(chunk(b"tEXt", b"k\0v"));
        png.extend(chunk(b"tEXt", b"k\0v"));
        png.extend(chunk(b"IDAT", a));
        png.extend(chunk(b"IDAT", b));
        png.extend(chunk(b"IEND", b""));

        let dir = tempfile::tempdir().unwrap();
        let mut set = tasks(dir.path());
        let groups = assemble(&png, 5, &mut set).await.unwrap();

        let names: Vec<_> = groups.iter().map(|g| g.name().to_string()).collect();
        assert_eq!(names, vec!["IHDR", "tEXt", "tEXt", "IDAT", "IEND"]);
        let data = groups[3].image_data().unwrap();
        assert_eq!(data.original, stream);
        assert_eq!(data.task, Some(0));
        assert_eq!(set.len(), 1);

        let scratch = set.get(0).unwrap().input().to_path_buf();
        assert_eq!(std::fs::read(scratch).unwrap(), vec![7u8; 3000]);
        set.destroy_all().await;
    }

    #[tokio::test]
    async fn test_frame_index_split_across_reads() {
        let stream = zlib(b"frame pixels");
        let mut fctl = 5u32.to_be_bytes().to_vec();
        fctl.extend_from_slice(&[1; 22]);
        let mut fdat = 6u32.to_be_bytes().to_vec();
        fdat.extend_from_slice(&stream);

        let mut png = PNG_SIGNATURE.to_vec();
        png.extend(chunk(b"IHDR", &[0; 13]));
        png.extend(chunk(b"fcTL", &fctl));
        png.extend(chunk(b"fdAT", &fdat));
        png.extend(chunk(b"IEND", b""));

        for read_size in [1, 3, 4096] {
            let dir = tempfile::tempdir().unwrap();
            let mut set = tasks(dir.path());
            let groups = assemble(&png, read_size, &mut set).await.unwrap();

            assert_eq!(groups[1].frame_index(), Some(5));
            assert_eq!(groups[1].plain_payload(), Some(&[1u8; 22][..]));
            assert_eq!(groups[2].frame_index(), Some(6));
            assert_eq!(groups[2].image_data().unwrap().original, stream);
            set.destroy_all().await;
        }
    }

    #[tokio::test]
    async fn test_short_frame_chunk_is_format_error() {
        let mut png = PNG_SIGNATURE.to_vec();
        png.extend(chunk(b"IHDR", &[0; 13]));
        png.extend(chunk(b"fcTL", &[0, 0]));
        png.extend(chunk(b"IEND", b""));

        let dir = tempfile::tempdir().unwrap();
        let mut set = tasks(dir.path());
        let err = assemble(&png, 64, &mut set).await.unwrap_err();
        assert!(err.is_format_error());
    }

    #[tokio::test]
    async fn test_empty_idat_has_no_task() {
        let mut png = PNG_SIGNATURE.to_vec();
        png.extend(chunk(b"IHDR", &[0; 13]));
        png.extend(chunk(b"IDAT", b""));
        png.extend(chunk(b"IEND", b""));

        let dir = tempfile::tempdir().unwrap();
        let mut set = tasks(dir.path());
        let groups = assemble(&png, 64, &mut set).await.unwrap();
        assert_eq!(groups[1].image_data().unwrap().task, None);
        assert!(set.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_image_data_fails() {
        let mut png = PNG_SIGNATURE.to_vec();
        png.extend(chunk(b"IHDR", &[0; 13]));
        png.extend(chunk(b"IDAT", b"not a zlib stream"));
        png.extend(chunk(b"IEND", b""));

        let dir = tempfile::tempdir().unwrap();
        let mut set = tasks(dir.path());
        let err = assemble(&png, 64, &mut set).await.unwrap_err();
        assert!(matches!(err, ZopngError::Inflate { .. }));
        set.destroy_all().await;
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
