//! Scratch file allocation and the streaming inflater that fills them.
//!
//! Each image-data group inflates into its own scratch file, which becomes
//! the input of one recompressor invocation. Names are derived from the
//! source file name and disambiguated with a numeric suffix:
//!
//! ```text
//! <scratch dir>/image.png.raw
//! <scratch dir>/image.png[1].raw
//! <scratch dir>/image.png[2].raw
//! ```
//!
//! Allocation is synchronous; no other job can observe a name between the
//! existence test and the file's creation.

use flate2::{Decompress, FlushDecompress, Status};
use std::ffi::OsStr;
use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use zopng_core::error::{Result, ZopngError};

/// Output buffer size for each inflate step.
const INFLATE_CHUNK_SIZE: usize = 32 * 1024;

/// Candidate name for attempt `index`.
fn scratch_name(base: &OsStr, index: usize) -> std::ffi::OsString {
    let mut name = base.to_owned();
    if index != 0 {
        name.push(format!("[{}]", index));
    }
    name.push(".raw");
    name
}

/// Create a fresh, uniquely named scratch file in `dir`.
pub fn allocate_scratch_file(dir: &Path, source: &Path) -> Result<(PathBuf, std::fs::File)> {
    std::fs::create_dir_all(dir).map_err(|e| ZopngError::temp_file(dir, e))?;
    let base = source
        .file_name()
        .unwrap_or_else(|| OsStr::new("image"));

    for index in 0..usize::MAX {
        let path = dir.join(scratch_name(base, index));
        if path.exists() {
            continue;
        }
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(ZopngError::temp_file(path, e)),
        }
    }
    Err(ZopngError::temp_file(
        dir,
        io::Error::other("scratch name space exhausted"),
    ))
}

/// Streams compressed bytes through zlib inflate into a scratch file.
///
/// Only one inflate step of output is held in memory at a time.
#[derive(Debug)]
pub struct ScratchInflater {
    path: PathBuf,
    file: BufWriter<File>,
    decompress: Decompress,
    buf: Vec<u8>,
    finished: bool,
}

impl ScratchInflater {
    /// Wrap a freshly allocated scratch file.
    pub fn new(path: PathBuf, file: std::fs::File) -> Self {
        Self {
            path,
            file: BufWriter::new(File::from_std(file)),
            decompress: Decompress::new(true),
            buf: Vec::with_capacity(INFLATE_CHUNK_SIZE),
            finished: false,
        }
    }

    /// Scratch file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes of inflated output written so far.
    pub fn inflated_len(&self) -> u64 {
        self.decompress.total_out()
    }

    /// Feed the next fragment of the zlib stream.
    pub async fn write(&mut self, mut input: &[u8]) -> Result<()> {
        if input.is_empty() {
            return Ok(());
        }
        if self.finished {
            return Err(ZopngError::inflate("data after end of zlib stream"));
        }
        loop {
            self.buf.clear();
            let before = self.decompress.total_in();
            let status = self
                .decompress
                .decompress_vec(input, &mut self.buf, FlushDecompress::None)
                .map_err(|e| ZopngError::inflate(e.to_string()))?;
            let consumed = (self.decompress.total_in() - before) as usize;
            input = &input[consumed..];
            let output_full = self.buf.len() == self.buf.capacity();
            self.flush_buf().await?;

            match status {
                Status::StreamEnd => {
                    self.finished = true;
                    if !input.is_empty() {
                        return Err(ZopngError::inflate("data after end of zlib stream"));
                    }
                    return Ok(());
                }
                Status::Ok | Status::BufError => {
                    if input.is_empty() && !output_full {
                        return Ok(());
                    }
                    if consumed == 0 && !output_full {
                        return Err(ZopngError::inflate("inflate made no progress"));
                    }
                }
            }
        }
    }

    /// Drain pending output, close the file, and return its path.
    ///
    /// Fails if the zlib stream was truncated.
    pub async fn finish(mut self) -> Result<PathBuf> {
        while !self.finished {
            self.buf.clear();
            let status = self
                .decompress
                .decompress_vec(&[], &mut self.buf, FlushDecompress::Finish)
                .map_err(|e| ZopngError::inflate(e.to_string()))?;
            let produced = !self.buf.is_empty();
            self.flush_buf().await?;
            if status == Status::StreamEnd {
                self.finished = true;
            } else if !produced {
                return Err(ZopngError::inflate("truncated zlib stream"));
            }
        }
        self.file
            .flush()
            .await
            .map_err(|e| ZopngError::temp_file(&self.path, e))?;
        Ok(self.path)
    }

    async fn flush_buf(&mut self) -> Result<()> {
        if !self.buf.is_empty() {
            self.file
                .write_all(&self.buf)
                .await
                .map_err(|e| ZopngError::temp_file(&self.path, e))?;
        }
        Ok(())
    }
}
