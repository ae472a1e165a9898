//! One file's trip through the pipeline.
//!
//! ```text
//! Parsing ──▶ AwaitingTasks ──▶ Assembling ──▶ Done
//!    │              │                │      └─▶ Skipped
//!    └──────────────┴────────────────┴────────▶ Error
//! ```
//!
//! Scratch files are removed on every path out of [`Job::run`].

use crate::assembler::ChunkGroupAssembler;
use crate::options::JobOptions;
use crate::reassembly::{Decision, ReassemblyEngine};
use crate::serializer::LaunchSerializer;
use crate::task::TaskSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};
use zopng_core::error::{Result, ZopngError};
use zopng_core::stream::ChunkTokenizer;

/// Where a job is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Not started.
    Pending,
    /// Reading the source and streaming image data to scratch files.
    Parsing,
    /// Waiting for every recompression to settle.
    AwaitingTasks,
    /// Comparing sizes and writing the output.
    Assembling,
    /// File rewritten.
    Done,
    /// File left untouched because nothing would shrink.
    Skipped,
    /// Failed; file left untouched.
    Error,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Parsing => "parsing",
            Self::AwaitingTasks => "awaiting tasks",
            Self::Assembling => "assembling",
            Self::Done => "done",
            Self::Skipped => "skipped",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Successful end state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// File rewritten.
    Done,
    /// File left untouched.
    Skipped,
}

/// Summary of a finished job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    /// Processed file.
    pub path: PathBuf,
    /// Rewritten or skipped.
    pub outcome: JobOutcome,
    /// Number of chunk groups.
    pub groups: usize,
    /// Number of recompression tasks run.
    pub tasks: usize,
    /// Image-data size comparison.
    pub decision: Decision,
    /// File size before.
    pub size_before: u64,
    /// File size after (equal to `size_before` when skipped).
    pub size_after: u64,
}

/// Recompresses the image data of one PNG/APNG file in place.
#[derive(Debug)]
pub struct Job {
    path: PathBuf,
    options: Arc<JobOptions>,
    serializer: LaunchSerializer,
    state: JobState,
}

impl Job {
    /// Create a job for `path`. Nothing happens until [`run`](Self::run).
    pub fn new(
        path: impl Into<PathBuf>,
        options: Arc<JobOptions>,
        serializer: LaunchSerializer,
    ) -> Self {
        Self {
            path: path.into(),
            options,
            serializer,
            state: JobState::Pending,
        }
    }

    /// File being processed.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current state.
    pub fn state(&self) -> JobState {
        self.state
    }

    fn transition(&mut self, state: JobState) {
        debug!(path = %self.path.display(), from = %self.state, to = %state, "job state");
        self.state = state;
    }

    /// Run the job to completion.
    pub async fn run(&mut self) -> Result<JobReport> {
        let mut tasks = TaskSet::new(
            &self.path,
            &self.options.scratch_dir,
            self.options.recompressor.clone(),
            self.serializer.clone(),
        );
        let result = self.process(&mut tasks).await;
        tasks.destroy_all().await;

        match &result {
            Ok(report) => {
                let state = match report.outcome {
                    JobOutcome::Done => JobState::Done,
                    JobOutcome::Skipped => JobState::Skipped,
                };
                self.transition(state);
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "job failed");
                self.transition(JobState::Error);
            }
        }
        result
    }

    async fn process(&mut self, tasks: &mut TaskSet) -> Result<JobReport> {
        self.transition(JobState::Parsing);
        let mut file = File::open(&self.path)
            .await
            .map_err(|e| ZopngError::input(&self.path, e))?;
        let size_before = file
            .metadata()
            .await
            .map_err(|e| ZopngError::input(&self.path, e))?
            .len();

        let mut tokenizer = if self.options.verify_crc {
            ChunkTokenizer::with_crc_check()
        } else {
            ChunkTokenizer::new()
        };
        let mut assembler = ChunkGroupAssembler::new();
        let mut buf = vec![0u8; self.options.read_buffer_size];
        loop {
            let n = file
                .read(&mut buf)
                .await
                .map_err(|e| ZopngError::input(&self.path, e))?;
            if n == 0 {
                break;
            }
            for event in tokenizer.events(&buf[..n]) {
                assembler.feed(event?, tasks).await?;
            }
        }
        drop(file);
        tokenizer.finish()?;
        let (signature, groups) = assembler.close(tasks).await?;
        debug!(path = %self.path.display(), groups = groups.len(), tasks = tasks.len(), "parsed");

        self.transition(JobState::AwaitingTasks);
        tasks.join_all().await?;

        self.transition(JobState::Assembling);
        let engine = ReassemblyEngine::new(signature, &groups, tasks);
        let decision = engine.decide(self.options.force);
        let mut report = JobReport {
            path: self.path.clone(),
            outcome: JobOutcome::Skipped,
            groups: groups.len(),
            tasks: tasks.len(),
            decision,
            size_before,
            size_after: size_before,
        };

        if !decision.rewrite {
            info!(
                path = %self.path.display(),
                original = decision.original_total,
                recompressed = decision.candidate_total,
                "no savings, skipping"
            );
            return Ok(report);
        }

        report.size_after = engine.write_to(&self.path).await?;
        report.outcome = JobOutcome::Done;
        info!(
            path = %self.path.display(),
            saved = decision.savings(),
            "recompressed image data"
        );
        Ok(report)
    }
}
