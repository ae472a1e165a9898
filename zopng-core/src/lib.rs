//! # zopng Core
//!
//! Core components for zopng, the PNG image-data recompressor.
//!
//! This crate provides the synchronous building blocks shared by the
//! recompression pipeline and the command-line tool:
//!
//! - [`chunk`]: chunk names, classification, and wire constants
//! - [`stream`]: incremental chunk tokenizer
//! - [`inspect`]: whole-buffer chunk listing
//! - [`crc`]: CRC-32 for chunk trailers
//! - [`error`]: Error types
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ L3: CLI                                                 │
//! │     zopng optimize / zopng chunks                       │
//! ├─────────────────────────────────────────────────────────┤
//! │ L2: Pipeline (zopng-png)                                │
//! │     chunk groups, recompression tasks, reassembly       │
//! ├─────────────────────────────────────────────────────────┤
//! │ L1: Container (this crate)                              │
//! │     tokenizer, chunk names, CRC-32                      │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use zopng_core::ChunkName;
//! use zopng_core::crc::Crc32;
//!
//! assert!(ChunkName::IDAT.is_image_data());
//! assert_eq!(Crc32::compute(b"IEND"), 0xAE426082);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod chunk;
pub mod crc;
pub mod error;
pub mod inspect;
pub mod stream;

// Re-exports for convenience
pub use chunk::{ChunkHeader, ChunkName, FRAME_INDEX_SIZE, MAX_CHUNK_LENGTH, PNG_SIGNATURE};
pub use crc::Crc32;
pub use error::{Result, ZopngError};
pub use inspect::{ChunkInfo, list_chunks};
pub use stream::{ChunkTokenizer, Event};
