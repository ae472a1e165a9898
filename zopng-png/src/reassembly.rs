//! Size decision and rewriting of the output file.
//!
//! The rewrite happens only if the recompressed image data is smaller in
//! total than the original (or the caller forces it). Each image-data group
//! then takes whichever payload is strictly smaller, so the output never
//! grows a group. Every chunk is written with a fresh length and CRC:
//!
//! ```text
//! ┌────────┬──────┬───────────────┬─────────┬───────┐
//! │ length │ name │ [frame index] │ payload │ CRC32 │
//! └────────┴──────┴───────────────┴─────────┴───────┘
//! ```
//!
//! Output goes to a sibling temporary file that replaces the target only once
//! it is complete, so a failure leaves the original untouched.

use crate::group::{ChunkGroup, ImageData};
use crate::task::TaskSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tracing::{debug, info};
use zopng_core::chunk::{ChunkHeader, ChunkName, FRAME_INDEX_SIZE, MAX_CHUNK_LENGTH};
use zopng_core::crc::Crc32;
use zopng_core::error::{Result, ZopngError};

/// Suffix of the temporary file written next to the target.
pub const TEMP_SUFFIX: &str = ".zopng-tmp";

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Whole-file size comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Sum of original image-data payload sizes.
    pub original_total: u64,
    /// Sum of the smaller payload of each image-data group.
    pub candidate_total: u64,
    /// Whether the file will be rewritten.
    pub rewrite: bool,
}

impl Decision {
    /// Bytes saved by the rewrite.
    pub fn savings(&self) -> u64 {
        self.original_total.saturating_sub(self.candidate_total)
    }
}

/// Payload chosen for one image-data group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Candidate<'a> {
    /// The original compressed bytes.
    Original(&'a [u8]),
    /// The recompressor output on disk.
    Recompressed {
        /// Output file.
        path: &'a Path,
        /// Its size.
        size: u64,
    },
}

impl Candidate<'_> {
    /// Payload length.
    pub fn len(&self) -> u64 {
        match self {
            Self::Original(bytes) => bytes.len() as u64,
            Self::Recompressed { size, .. } => *size,
        }
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Writes the final file from the sealed groups and settled tasks.
#[derive(Debug)]
pub struct ReassemblyEngine<'a> {
    signature: [u8; 8],
    groups: &'a [ChunkGroup],
    tasks: &'a TaskSet,
}

impl<'a> ReassemblyEngine<'a> {
    /// Create an engine over one job's results.
    pub fn new(signature: [u8; 8], groups: &'a [ChunkGroup], tasks: &'a TaskSet) -> Self {
        Self {
            signature,
            groups,
            tasks,
        }
    }

    /// Pick the payload for an image-data group: the recompressed one only
    /// if it is strictly smaller.
    pub fn candidate(&self, data: &'a ImageData) -> Candidate<'a> {
        let completed = data
            .task
            .and_then(|slot| self.tasks.get(slot))
            .and_then(|task| task.recompressed_size().map(|size| (task.output(), size)));
        match completed {
            Some((path, size)) if size < data.original_len() => {
                Candidate::Recompressed { path, size }
            }
            _ => Candidate::Original(&data.original),
        }
    }

    /// Compare totals. `force` only overrides the whole-file skip.
    pub fn decide(&self, force: bool) -> Decision {
        let (original_total, candidate_total) = self
            .groups
            .iter()
            .filter_map(ChunkGroup::image_data)
            .fold((0u64, 0u64), |(orig, cand), data| {
                (orig + data.original_len(), cand + self.candidate(data).len())
            });
        Decision {
            original_total,
            candidate_total,
            rewrite: force || candidate_total < original_total,
        }
    }

    /// Write the file and atomically replace `target` with it.
    ///
    /// Returns the new file size. On failure the temporary file is removed
    /// and `target` is left as it was.
    pub async fn write_to(&self, target: &Path) -> Result<u64> {
        let temp = temp_path(target);
        match self.write_temp(target, &temp).await {
            Ok(written) => {
                tokio::fs::rename(&temp, target)
                    .await
                    .map_err(|e| ZopngError::output(target, e))?;
                info!(path = %target.display(), size = written, "rewrote file");
                Ok(written)
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&temp).await;
                Err(e)
            }
        }
    }

    async fn write_temp(&self, target: &Path, temp: &Path) -> Result<u64> {
        let file = File::create(temp)
            .await
            .map_err(|e| ZopngError::output(temp, e))?;
        if let Ok(metadata) = tokio::fs::metadata(target).await {
            tokio::fs::set_permissions(temp, metadata.permissions())
                .await
                .map_err(|e| ZopngError::output(temp, e))?;
        }
        let mut out = BufWriter::new(file);
        let io_err = |e: std::io::Error| ZopngError::output(temp, e);

        out.write_all(&self.signature).await.map_err(io_err)?;
        let mut written = self.signature.len() as u64;
        for group in self.groups {
            written += self.write_group(&mut out, group, temp).await?;
            tokio::task::yield_now().await;
        }

        out.flush().await.map_err(io_err)?;
        out.into_inner().sync_all().await.map_err(io_err)?;
        Ok(written)
    }

    async fn write_group(
        &self,
        out: &mut BufWriter<File>,
        group: &'a ChunkGroup,
        temp: &Path,
    ) -> Result<u64> {
        let io_err = |e: std::io::Error| ZopngError::output(temp, e);
        let name = group.name();
        let index = group.frame_index().map(u32::to_be_bytes);
        let payload = match group {
            ChunkGroup::Plain { payload, .. } | ChunkGroup::FrameControl { payload, .. } => {
                Candidate::Original(payload)
            }
            ChunkGroup::ImageData { data, .. } | ChunkGroup::FrameImageData { data, .. } => {
                self.candidate(data)
            }
        };

        let length = chunk_length(name, index.is_some(), payload.len())?;

        let mut crc = Crc32::new();
        crc.update(name.as_bytes());
        out.write_all(&ChunkHeader { name, length }.to_bytes())
            .await
            .map_err(io_err)?;
        if let Some(index) = index {
            crc.update(&index);
            out.write_all(&index).await.map_err(io_err)?;
        }

        match payload {
            Candidate::Original(bytes) => {
                crc.update(bytes);
                out.write_all(bytes).await.map_err(io_err)?;
            }
            Candidate::Recompressed { path, size } => {
                debug!(chunk = %name, path = %path.display(), size, "using recompressed payload");
                let copied = copy_payload(path, out, &mut crc, temp).await?;
                if copied != size {
                    return Err(ZopngError::recompression(format!(
                        "{} changed size from {} to {} bytes",
                        path.display(),
                        size,
                        copied
                    )));
                }
            }
        }

        out.write_all(&crc.finalize().to_be_bytes())
            .await
            .map_err(io_err)?;
        Ok(12 + u64::from(length))
    }
}

/// Wire length of a chunk with an optional frame index before `payload_len`
/// bytes of payload.
fn chunk_length(name: ChunkName, framed: bool, payload_len: u64) -> Result<u32> {
    let prefix = if framed { FRAME_INDEX_SIZE as u64 } else { 0 };
    let length = prefix + payload_len;
    u32::try_from(length)
        .ok()
        .filter(|&l| l <= MAX_CHUNK_LENGTH)
        .ok_or_else(|| ZopngError::chunk_too_large(name.to_string(), length))
}

/// Stream a recompressed payload into the output, updating the CRC.
async fn copy_payload(
    path: &Path,
    out: &mut BufWriter<File>,
    crc: &mut Crc32,
    temp: &Path,
) -> Result<u64> {
    let unreadable = |what: &str, e: std::io::Error| {
        ZopngError::recompression(format!("cannot {} {}: {}", what, path.display(), e))
    };
    let mut input = File::open(path).await.map_err(|e| unreadable("open", e))?;
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut copied = 0u64;
    loop {
        let n = input
            .read(&mut buf)
            .await
            .map_err(|e| unreadable("read", e))?;
        if n == 0 {
            return Ok(copied);
        }
        crc.update(&buf[..n]);
        out.write_all(&buf[..n])
            .await
            .map_err(|e| ZopngError::output(temp, e))?;
        copied += n as u64;
    }
}

/// `<target><TEMP_SUFFIX>`, next to the target so the rename stays on one
/// filesystem.
pub fn temp_path(target: &Path) -> PathBuf {
    let mut name = OsString::from(target.as_os_str());
    name.push(TEMP_SUFFIX);
    PathBuf::from(name)
}
