//! Error types for zopng operations.
//!
//! Every failure is fatal to the job (file) that produced it and to nothing
//! else. The variants fall into four families:
//!
//! - input I/O: the source file cannot be opened or read,
//! - format: the byte stream is not a well-formed PNG container, or an
//!   image-data payload is not a valid zlib stream,
//! - recompression: the external optimizer failed or left no output,
//! - scratch files: allocating or writing a temporary file failed.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for zopng operations.
#[derive(Debug, Error)]
pub enum ZopngError {
    /// The source file could not be opened or read.
    #[error("Could not read {}: {source}", path.display())]
    Input {
        /// Path of the source file.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// The stream does not start with the PNG signature.
    #[error("Invalid PNG signature: found {found:02x?}")]
    InvalidSignature {
        /// Signature bytes actually found.
        found: Vec<u8>,
    },

    /// Malformed chunk framing.
    #[error("Malformed PNG at offset {offset}: {message}")]
    Format {
        /// Byte offset in the source stream where the problem was detected.
        offset: u64,
        /// Description of the problem.
        message: String,
    },

    /// Stored chunk CRC does not match the chunk contents.
    #[error("CRC mismatch in {chunk} chunk: stored {stored:#010x}, computed {computed:#010x}")]
    CrcMismatch {
        /// Name of the offending chunk.
        chunk: String,
        /// CRC stored in the file.
        stored: u32,
        /// CRC computed over name and payload.
        computed: u32,
    },

    /// The stream ended in the middle of a chunk.
    #[error("Unexpected end of PNG stream: {message}")]
    UnexpectedEof {
        /// What was still expected.
        message: String,
    },

    /// An image-data payload could not be inflated.
    #[error("Could not inflate image data: {message}")]
    Inflate {
        /// Description from the codec.
        message: String,
    },

    /// The external recompressor failed.
    #[error("Recompression failed: {message}")]
    Recompression {
        /// What went wrong.
        message: String,
    },

    /// A scratch file could not be allocated, written, or resolved.
    #[error("Scratch file error for {}: {source}", path.display())]
    TempFile {
        /// Scratch path involved.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// The rewritten file could not be written or moved into place.
    #[error("Could not write {}: {source}", path.display())]
    Output {
        /// Target path.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// A chunk to be written does not fit the 31-bit length field.
    #[error("{chunk} chunk of {length} bytes exceeds the chunk length limit")]
    ChunkTooLarge {
        /// Chunk type code.
        chunk: String,
        /// Payload length that was requested.
        length: u64,
    },

    /// A queued recompression was dropped because its job already failed.
    #[error("Recompression cancelled")]
    Cancelled,

    /// Any other I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result type alias for zopng operations.
pub type Result<T> = std::result::Result<T, ZopngError>;

impl ZopngError {
    /// Create an input error.
    pub fn input(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Input {
            path: path.into(),
            source,
        }
    }

    /// Create an invalid signature error.
    pub fn invalid_signature(found: impl Into<Vec<u8>>) -> Self {
        Self::InvalidSignature {
            found: found.into(),
        }
    }

    /// Create a format error.
    pub fn format(offset: u64, message: impl Into<String>) -> Self {
        Self::Format {
            offset,
            message: message.into(),
        }
    }

    /// Create a CRC mismatch error.
    pub fn crc_mismatch(chunk: impl Into<String>, stored: u32, computed: u32) -> Self {
        Self::CrcMismatch {
            chunk: chunk.into(),
            stored,
            computed,
        }
    }

    /// Create a chunk too large error.
    pub fn chunk_too_large(chunk: impl Into<String>, length: u64) -> Self {
        Self::ChunkTooLarge {
            chunk: chunk.into(),
            length,
        }
    }

    /// Create an unexpected EOF error.
    pub fn unexpected_eof(message: impl Into<String>) -> Self {
        Self::UnexpectedEof {
            message: message.into(),
        }
    }

    /// Create an inflate error.
    pub fn inflate(message: impl Into<String>) -> Self {
        Self::Inflate {
            message: message.into(),
        }
    }

    /// Create a recompression error.
    pub fn recompression(message: impl Into<String>) -> Self {
        Self::Recompression {
            message: message.into(),
        }
    }

    /// Create a scratch file error.
    pub fn temp_file(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::TempFile {
            path: path.into(),
            source,
        }
    }

    /// Create an output error.
    pub fn output(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Output {
            path: path.into(),
            source,
        }
    }

    /// True for errors caused by the input bytes rather than the environment.
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidSignature { .. }
                | Self::Format { .. }
                | Self::CrcMismatch { .. }
                | Self::UnexpectedEof { .. }
                | Self::Inflate { .. }
        )
    }
}
