//! Recompression tasks and the per-job set that owns them.
//!
//! A task is created lazily when its group receives the first payload byte.
//! It moves through:
//!
//! ```text
//! Streaming ──submit──▶ Queued ──exit 0, output present──▶ Completed { size }
//!                          │
//!                          └──nonzero exit / missing output / skipped──▶ Failed
//! ```
//!
//! Both the scratch input and the recompressor output are removed by
//! [`TaskSet::destroy_all`], whatever the job's outcome.

use crate::group::TaskSlot;
use crate::options::RecompressorConfig;
use crate::scratch::{ScratchInflater, allocate_scratch_file};
use crate::serializer::{CancelFlag, Invocation, LaunchSerializer};
use std::io;
use std::path::{Path, PathBuf};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use zopng_core::error::{Result, ZopngError};

/// Lifecycle of one recompression task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    /// Inflated bytes are still being written to the scratch file.
    Streaming,
    /// Handed to the launch queue.
    Queued,
    /// Recompressor exited 0 and produced an output of `size` bytes.
    Completed {
        /// Recompressed zlib stream length.
        size: u64,
    },
    /// Launch failed, exited nonzero, produced no output, or was skipped.
    Failed(String),
}

/// One scratch file and its pending recompression.
#[derive(Debug)]
pub struct RecompressionTask {
    input: PathBuf,
    output: PathBuf,
    state: TaskState,
    handle: Option<JoinHandle<Result<u64>>>,
}

impl RecompressionTask {
    /// Scratch file holding the inflated image data.
    pub fn input(&self) -> &Path {
        &self.input
    }

    /// File the recompressor writes its zlib stream to.
    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Current state.
    pub fn state(&self) -> &TaskState {
        &self.state
    }

    /// Size of the recompressed stream; only known once completed.
    pub fn recompressed_size(&self) -> Option<u64> {
        match self.state {
            TaskState::Completed { size } => Some(size),
            _ => None,
        }
    }

    /// Whether the task has settled.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.state,
            TaskState::Completed { .. } | TaskState::Failed(_)
        )
    }

    /// Remove the scratch input and the output, ignoring files that are gone.
    pub async fn destroy(&self) {
        for path in [&self.input, &self.output] {
            match tokio::fs::remove_file(path).await {
                Ok(()) => debug!(path = %path.display(), "removed scratch file"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "could not remove scratch file")
                }
            }
        }
    }
}

/// Every recompression task of one job.
#[derive(Debug)]
pub struct TaskSet {
    tasks: Vec<RecompressionTask>,
    serializer: LaunchSerializer,
    recompressor: RecompressorConfig,
    scratch_dir: PathBuf,
    source: PathBuf,
    cancel: CancelFlag,
}

impl TaskSet {
    /// Create an empty set for the job processing `source`.
    pub fn new(
        source: impl Into<PathBuf>,
        scratch_dir: impl Into<PathBuf>,
        recompressor: RecompressorConfig,
        serializer: LaunchSerializer,
    ) -> Self {
        Self {
            tasks: Vec::new(),
            serializer,
            recompressor,
            scratch_dir: scratch_dir.into(),
            source: source.into(),
            cancel: CancelFlag::new(),
        }
    }

    /// Number of tasks created so far.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether no task was created.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Look up a task.
    pub fn get(&self, slot: TaskSlot) -> Option<&RecompressionTask> {
        self.tasks.get(slot)
    }

    /// Allocate a scratch file and start a task in the `Streaming` state.
    pub fn open_scratch(&mut self) -> Result<(TaskSlot, ScratchInflater)> {
        let (path, file) = allocate_scratch_file(&self.scratch_dir, &self.source)?;
        debug!(scratch = %path.display(), "allocated scratch file");
        let slot = self.tasks.len();
        self.tasks.push(RecompressionTask {
            output: self.recompressor.output_path(&path),
            input: path.clone(),
            state: TaskState::Streaming,
            handle: None,
        });
        Ok((slot, ScratchInflater::new(path, file)))
    }

    /// Queue the recompressor for a task whose scratch file is complete.
    pub async fn submit(&mut self, slot: TaskSlot) -> Result<()> {
        let task = self
            .tasks
            .get_mut(slot)
            .ok_or_else(|| ZopngError::recompression(format!("no task in slot {}", slot)))?;
        let canonical = tokio::fs::canonicalize(&task.input)
            .await
            .map_err(|e| ZopngError::temp_file(&task.input, e))?;
        task.output = self.recompressor.output_path(&canonical);

        let invocation = Invocation {
            program: self.recompressor.program.clone(),
            args: self.recompressor.args_for(&canonical),
        };
        let program = invocation.program.display().to_string();
        let cancel = self.cancel.clone();
        let pending = self.serializer.enqueue(invocation, cancel.clone())?;
        let output = task.output.clone();

        task.handle = Some(tokio::spawn(async move {
            let exit = pending.wait().await?;
            if !exit.success() {
                return Err(ZopngError::recompression(match exit.code {
                    Some(code) => format!("{} exited with status {}", program, code),
                    None => format!("{} was terminated by a signal", program),
                }));
            }
            let metadata = tokio::fs::metadata(&output).await.map_err(|e| {
                cancel.cancel();
                ZopngError::recompression(format!(
                    "{} produced no output at {}: {}",
                    program,
                    output.display(),
                    e
                ))
            })?;
            Ok(metadata.len())
        }));
        task.state = TaskState::Queued;
        Ok(())
    }

    /// Wait for every queued task to settle.
    ///
    /// On the first failure the remaining queued invocations are cancelled,
    /// but every handle is still awaited so no process outlives the job.
    pub async fn join_all(&mut self) -> Result<()> {
        let mut first_error = None;
        for task in &mut self.tasks {
            let Some(handle) = task.handle.take() else {
                if task.state == TaskState::Streaming {
                    task.state = TaskState::Failed("never submitted".to_string());
                    first_error.get_or_insert_with(|| {
                        ZopngError::recompression("task was never submitted")
                    });
                }
                continue;
            };
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(ZopngError::recompression(format!("task panicked: {}", e))),
            };
            match result {
                Ok(size) => {
                    debug!(input = %task.input.display(), size, "recompression completed");
                    task.state = TaskState::Completed { size };
                }
                Err(e) => {
                    task.state = TaskState::Failed(e.to_string());
                    if first_error.is_none() {
                        self.cancel.cancel();
                        first_error = Some(e);
                    }
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Skip every invocation of this job that has not started yet.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Cancel, wait for anything still in flight, and remove every file.
    pub async fn destroy_all(&mut self) {
        self.cancel();
        for task in &mut self.tasks {
            if let Some(handle) = task.handle.take() {
                let _ = handle.await;
            }
            if !task.is_terminal() {
                task.state = TaskState::Failed("cancelled".to_string());
            }
            task.destroy().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serializer::{LaunchFuture, Launcher, ProcessExit};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::AsyncWriteExt;

    /// Writes `size` bytes to `<input>.zlib`, or exits 1 when size is `None`.
    struct SizedOutput {
        size: Option<usize>,
        runs: AtomicUsize,
    }

    impl SizedOutput {
        fn new(size: Option<usize>) -> Arc<Self> {
            Arc::new(Self {
                size,
                runs: AtomicUsize::new(0),
            })
        }
    }

    impl Launcher for SizedOutput {
        fn launch<'a>(&'a self, invocation: &'a Invocation) -> LaunchFuture<'a> {
            Box::pin(async move {
                self.runs.fetch_add(1, Ordering::SeqCst);
                let Some(size) = self.size else {
                    return Ok(ProcessExit { code: Some(1) });
                };
                let mut output = invocation.args.last().cloned().unwrap_or_default();
                output.push(".zlib");
                tokio::fs::write(output, vec![0u8; size]).await?;
                Ok(ProcessExit { code: Some(0) })
            })
        }
    }

    fn task_set(dir: &Path, launcher: &Arc<SizedOutput>) -> TaskSet {
        TaskSet::new(
            "/images/a.png",
            dir,
            RecompressorConfig::default(),
            LaunchSerializer::new(launcher.clone()),
        )
    }

    async fn stream_one(set: &mut TaskSet) -> TaskSlot {
        let (slot, inflater) = set.open_scratch().unwrap();
        let path = inflater.path().to_path_buf();
        drop(inflater);
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .open(&path)
            .await
            .unwrap();
        file.write_all(b"raw").await.unwrap();
        set.submit(slot).await.unwrap();
        slot
    }

    #[tokio::test]
    async fn test_completed_size_and_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let mut set = task_set(dir.path(), &SizedOutput::new(Some(123)));
        let slot = stream_one(&mut set).await;
        assert_eq!(set.get(slot).unwrap().state(), &TaskState::Queued);

        set.join_all().await.unwrap();
        let task = set.get(slot).unwrap();
        assert_eq!(task.recompressed_size(), Some(123));
        assert!(task.is_terminal());
        assert!(task.output().exists());

        set.destroy_all().await;
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_nonzero_exit_fails() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = SizedOutput::new(None);
        let mut set = task_set(dir.path(), &launcher);
        let first = stream_one(&mut set).await;
        let second = stream_one(&mut set).await;

        let err = set.join_all().await.unwrap_err();
        assert!(matches!(err, ZopngError::Recompression { .. }));
        assert!(matches!(set.get(first).unwrap().state(), TaskState::Failed(_)));
        assert!(matches!(set.get(second).unwrap().state(), TaskState::Failed(_)));
        assert_eq!(set.get(first).unwrap().recompressed_size(), None);
        assert_eq!(launcher.runs.load(Ordering::SeqCst), 1);

        set.destroy_all().await;
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_destroy_tolerates_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut set = task_set(dir.path(), &SizedOutput::new(Some(1)));
        let (_slot, inflater) = set.open_scratch().unwrap();
        std::fs::remove_file(inflater.path()).unwrap();
        set.destroy_all().await;
        set.destroy_all().await;
    }
}
