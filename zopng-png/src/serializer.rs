//! Single-flight launch queue for the external recompressor.
//!
//! The optimizer is CPU and memory heavy, so at most one invocation runs at
//! any instant across every job sharing a [`LaunchSerializer`]. Requests run
//! strictly in the order [`LaunchSerializer::enqueue`] was called.
//!
//! The serializer is an explicit value handed to each job rather than global
//! state; the [`Launcher`] trait is the seam for the real process spawner and
//! for fakes in tests.

use std::ffi::OsString;
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use zopng_core::error::{Result, ZopngError};

/// One external process invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Program to run.
    pub program: PathBuf,
    /// Arguments, in order.
    pub args: Vec<OsString>,
}

/// How a launched process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    /// Exit code, or `None` if the process was killed by a signal.
    pub code: Option<i32>,
}

impl ProcessExit {
    /// True for a zero exit code.
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Boxed future returned by [`Launcher::launch`].
pub type LaunchFuture<'a> = Pin<Box<dyn Future<Output = io::Result<ProcessExit>> + Send + 'a>>;

/// Runs one invocation to completion.
pub trait Launcher: Send + Sync + 'static {
    /// Start the process and resolve once it has exited.
    fn launch<'a>(&'a self, invocation: &'a Invocation) -> LaunchFuture<'a>;
}

/// Launcher that spawns real processes.
#[derive(Debug, Clone, Default)]
pub struct ProcessLauncher {
    show_output: bool,
}

impl ProcessLauncher {
    /// Create a launcher that discards the child's stdout and stderr.
    pub fn new() -> Self {
        Self::default()
    }

    /// Forward the child's stdout and stderr to ours.
    pub fn with_output(mut self, show_output: bool) -> Self {
        self.show_output = show_output;
        self
    }
}

impl Launcher for ProcessLauncher {
    fn launch<'a>(&'a self, invocation: &'a Invocation) -> LaunchFuture<'a> {
        Box::pin(async move {
            let mut command = Command::new(&invocation.program);
            command.args(&invocation.args).stdin(Stdio::null());
            if !self.show_output {
                command.stdout(Stdio::null()).stderr(Stdio::null());
            }
            let status = command.status().await?;
            Ok(ProcessExit {
                code: status.code(),
            })
        })
    }
}

/// Shared flag marking every queued invocation of a job as abandoned.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Create an unset flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark as cancelled.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether [`cancel`](Self::cancel) was called.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

struct LaunchRequest {
    invocation: Invocation,
    cancel: CancelFlag,
    reply: oneshot::Sender<Result<ProcessExit>>,
}

impl std::fmt::Debug for LaunchRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaunchRequest")
            .field("invocation", &self.invocation)
            .finish_non_exhaustive()
    }
}

/// Handle to an enqueued invocation.
#[derive(Debug)]
pub struct PendingLaunch {
    reply: oneshot::Receiver<Result<ProcessExit>>,
}

impl PendingLaunch {
    /// Wait until the invocation has run (or was skipped).
    pub async fn wait(self) -> Result<ProcessExit> {
        self.reply
            .await
            .map_err(|_| ZopngError::recompression("launch queue shut down"))?
    }
}

/// FIFO queue admitting one running invocation at a time.
///
/// Cloning the serializer shares the same queue.
#[derive(Debug, Clone)]
pub struct LaunchSerializer {
    queue: mpsc::UnboundedSender<LaunchRequest>,
}

impl LaunchSerializer {
    /// Start the queue worker. Must be called within a Tokio runtime.
    pub fn new(launcher: Arc<dyn Launcher>) -> Self {
        let (queue, requests) = mpsc::unbounded_channel();
        tokio::spawn(run_queue(launcher, requests));
        Self { queue }
    }

    /// Serializer backed by [`ProcessLauncher`].
    pub fn with_process_launcher(show_output: bool) -> Self {
        Self::new(Arc::new(ProcessLauncher::new().with_output(show_output)))
    }

    /// Append an invocation to the queue.
    ///
    /// It starts immediately if nothing is running, otherwise once every
    /// earlier invocation has exited. If `cancel` is set before it starts, it
    /// is skipped and resolves to [`ZopngError::Cancelled`]; a running process
    /// is never interrupted. An invocation that cannot be launched or exits
    /// nonzero sets `cancel` itself, so later requests sharing the flag are
    /// skipped.
    pub fn enqueue(&self, invocation: Invocation, cancel: CancelFlag) -> Result<PendingLaunch> {
        let (reply, receiver) = oneshot::channel();
        self.queue
            .send(LaunchRequest {
                invocation,
                cancel,
                reply,
            })
            .map_err(|_| ZopngError::recompression("launch queue shut down"))?;
        Ok(PendingLaunch { reply: receiver })
    }
}

async fn run_queue(
    launcher: Arc<dyn Launcher>,
    mut requests: mpsc::UnboundedReceiver<LaunchRequest>,
) {
    while let Some(request) = requests.recv().await {
        if request.cancel.is_cancelled() || request.reply.is_closed() {
            debug!(
                program = %request.invocation.program.display(),
                "skipping cancelled invocation"
            );
            let _ = request.reply.send(Err(ZopngError::Cancelled));
            continue;
        }

        debug!(
            program = %request.invocation.program.display(),
            args = ?request.invocation.args,
            "launching recompressor"
        );
        let result = launcher.launch(&request.invocation).await.map_err(|e| {
            warn!(program = %request.invocation.program.display(), error = %e, "could not launch");
            ZopngError::recompression(format!(
                "could not run {}: {}",
                request.invocation.program.display(),
                e
            ))
        });
        if !matches!(&result, Ok(exit) if exit.success()) {
            request.cancel.cancel();
        }
        let _ = request.reply.send(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records (label, start, end) and sleeps while "running".
    #[derive(Default)]
    struct SleepyLauncher {
        log: Mutex<Vec<(String, tokio::time::Instant, tokio::time::Instant)>>,
    }

    impl Launcher for SleepyLauncher {
        fn launch<'a>(&'a self, invocation: &'a Invocation) -> LaunchFuture<'a> {
            Box::pin(async move {
                let start = tokio::time::Instant::now();
                tokio::time::sleep(Duration::from_millis(20)).await;
                let end = tokio::time::Instant::now();
                let label = invocation.args[0].to_string_lossy().into_owned();
                let code = if label == "fail" { 1 } else { 0 };
                self.log.lock().unwrap().push((label, start, end));
                Ok(ProcessExit { code: Some(code) })
            })
        }
    }

    fn invocation(label: &str) -> Invocation {
        Invocation {
            program: PathBuf::from("fake"),
            args: vec![OsString::from(label)],
        }
    }

    #[tokio::test]
    async fn test_fifo_and_no_overlap() {
        let launcher = Arc::new(SleepyLauncher::default());
        let serializer = LaunchSerializer::new(launcher.clone());

        let pending: Vec<_> = ["a", "b", "c"]
            .iter()
            .map(|l| serializer.enqueue(invocation(l), CancelFlag::new()).unwrap())
            .collect();
        for p in pending {
            assert!(p.wait().await.unwrap().success());
        }

        let log = launcher.log.lock().unwrap();
        let order: Vec<_> = log.iter().map(|(l, _, _)| l.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
        for pair in log.windows(2) {
            assert!(pair[0].2 <= pair[1].1, "invocations overlapped");
        }
    }

    #[tokio::test]
    async fn test_cancelled_request_is_skipped() {
        let launcher = Arc::new(SleepyLauncher::default());
        let serializer = LaunchSerializer::new(launcher.clone());
        let cancel = CancelFlag::new();

        let first = serializer.enqueue(invocation("first"), CancelFlag::new()).unwrap();
        let second = serializer.enqueue(invocation("second"), cancel.clone()).unwrap();
        cancel.cancel();

        assert!(first.wait().await.is_ok());
        assert!(matches!(second.wait().await, Err(ZopngError::Cancelled)));
        assert_eq!(launcher.log.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failure_exit_code_is_reported() {
        let serializer = LaunchSerializer::new(Arc::new(SleepyLauncher::default()));
        let exit = serializer
            .enqueue(invocation("fail"), CancelFlag::new())
            .unwrap()
            .wait()
            .await
            .unwrap();
        assert!(!exit.success());
        assert_eq!(exit.code, Some(1));
    }

    #[tokio::test]
    async fn test_failure_skips_rest_of_same_job() {
        let launcher = Arc::new(SleepyLauncher::default());
        let serializer = LaunchSerializer::new(launcher.clone());
        let job = CancelFlag::new();

        let failing = serializer.enqueue(invocation("fail"), job.clone()).unwrap();
        let same_job = serializer.enqueue(invocation("same"), job.clone()).unwrap();
        let other_job = serializer.enqueue(invocation("other"), CancelFlag::new()).unwrap();

        assert!(!failing.wait().await.unwrap().success());
        assert!(job.is_cancelled());
        assert!(matches!(same_job.wait().await, Err(ZopngError::Cancelled)));
        assert!(other_job.wait().await.unwrap().success());

        let log = launcher.log.lock().unwrap();
        let order: Vec<_> = log.iter().map(|(l, _, _)| l.as_str()).collect();
        assert_eq!(order, vec!["fail", "other"]);
    }
}
