//! # zopng PNG
//!
//! The recompression pipeline: re-deflates the image data of PNG and APNG
//! files with an external optimizer and rewrites a file only when it gets
//! smaller.
//!
//! - [`assembler`]: tokenizer events to chunk groups
//! - [`group`]: chunk groups and frame-index stripping
//! - [`scratch`]: scratch files and streaming inflate
//! - [`task`]: recompression tasks
//! - [`serializer`]: single-flight launch queue
//! - [`reassembly`]: size decision and output writing
//! - [`job`]: per-file state machine
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use zopng_png::{Job, JobOptions, LaunchSerializer};
//!
//! # async fn run() -> zopng_core::Result<()> {
//! let serializer = LaunchSerializer::with_process_launcher(false);
//! let options = Arc::new(JobOptions::default());
//! let report = Job::new("image.png", options, serializer).run().await?;
//! println!("{:?}: saved {} bytes", report.outcome, report.decision.savings());
//! # Ok(())
//! # }
//! ```
//!
//! Jobs for different files may run concurrently as long as they share one
//! [`LaunchSerializer`]; the external program then never runs twice at once.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod assembler;
pub mod group;
pub mod job;
pub mod options;
pub mod reassembly;
pub mod scratch;
pub mod serializer;
pub mod task;

// Re-exports
pub use assembler::ChunkGroupAssembler;
pub use group::{ChunkGroup, FrameIndexAccumulator, ImageData};
pub use job::{Job, JobOutcome, JobReport, JobState};
pub use options::{JobOptions, RecompressorConfig};
pub use reassembly::{Candidate, Decision, ReassemblyEngine};
pub use serializer::{
    CancelFlag, Invocation, LaunchFuture, LaunchSerializer, Launcher, ProcessExit, ProcessLauncher,
};
pub use task::{RecompressionTask, TaskSet, TaskState};
