//! Optimize command implementation.

use crate::utils::{create_progress_bar, format_size, savings_percent};
use filetime::FileTime;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};
use zopng_core::ZopngError;
use zopng_png::{Job, JobOptions, JobOutcome, JobReport, LaunchSerializer, RecompressorConfig};

/// Options for the optimize command.
pub struct OptimizeOptions {
    pub modifiers: Vec<String>,
    pub force: bool,
    pub recompressor: PathBuf,
    pub scratch_dir: Option<PathBuf>,
    pub jobs: usize,
    pub strict: bool,
    pub keep_mtime: bool,
    pub json: bool,
    pub show_output: bool,
}

impl OptimizeOptions {
    fn job_options(&self) -> JobOptions {
        let recompressor = RecompressorConfig::default()
            .with_program(&self.recompressor)
            .with_modifiers(&self.modifiers);
        let options = JobOptions::default()
            .with_force(self.force)
            .with_verify_crc(self.strict)
            .with_recompressor(recompressor);
        match &self.scratch_dir {
            Some(dir) => options.with_scratch_dir(dir),
            None => options,
        }
    }
}

/// JSON serializable per-file result.
#[derive(Debug, Serialize)]
struct FileJson {
    path: String,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_data_before: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_data_after: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    size_before: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    size_after: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl FileJson {
    fn from_result(path: &Path, result: &Result<JobReport, ZopngError>) -> Self {
        match result {
            Ok(report) => {
                let rewritten = report.outcome == JobOutcome::Done;
                Self {
                    path: path.display().to_string(),
                    status: if rewritten { "done" } else { "skipped" },
                    image_data_before: Some(report.decision.original_total),
                    image_data_after: Some(if rewritten {
                        report.decision.candidate_total
                    } else {
                        report.decision.original_total
                    }),
                    size_before: Some(report.size_before),
                    size_after: Some(report.size_after),
                    error: None,
                }
            }
            Err(e) => Self {
                path: path.display().to_string(),
                status: "error",
                image_data_before: None,
                image_data_after: None,
                size_before: None,
                size_after: None,
                error: Some(e.to_string()),
            },
        }
    }
}

/// JSON output for an optimize run.
#[derive(Debug, Serialize)]
struct RunJson {
    files: Vec<FileJson>,
    done: usize,
    skipped: usize,
    errors: usize,
    saved: u64,
}

/// One line of the human-readable report.
fn describe(path: &Path, result: &Result<JobReport, ZopngError>) -> String {
    match result {
        Ok(report) if report.outcome == JobOutcome::Done => format!(
            "done     {}  {} -> {} ({:.1}% smaller)",
            path.display(),
            format_size(report.size_before),
            format_size(report.size_after),
            savings_percent(report.size_before, report.size_after)
        ),
        Ok(_) => format!("skipped  {}", path.display()),
        Err(e) => format!("error    {}: {}", path.display(), e),
    }
}

/// Run the optimizer over `files`. Returns `false` if any file failed.
pub fn cmd_optimize(
    files: &[PathBuf],
    options: &OptimizeOptions,
) -> Result<bool, Box<dyn std::error::Error>> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(optimize_all(files, options))
}

async fn optimize_all(
    files: &[PathBuf],
    options: &OptimizeOptions,
) -> Result<bool, Box<dyn std::error::Error>> {
    let serializer = LaunchSerializer::with_process_launcher(options.show_output);
    let job_options = Arc::new(options.job_options());
    let slots = Arc::new(Semaphore::new(options.jobs.max(1)));
    let pb = create_progress_bar(files.len() as u64, !options.json && files.len() > 1);

    let mut running = JoinSet::new();
    for (index, file) in files.iter().enumerate() {
        let path = std::fs::canonicalize(file).unwrap_or_else(|_| file.clone());
        let slots = Arc::clone(&slots);
        let job_options = Arc::clone(&job_options);
        let serializer = serializer.clone();
        let keep_mtime = options.keep_mtime;

        running.spawn(async move {
            let _permit = slots.acquire_owned().await;
            let mtime = keep_mtime
                .then(|| std::fs::metadata(&path).ok())
                .flatten()
                .map(|m| FileTime::from_last_modification_time(&m));

            let result = Job::new(&path, job_options, serializer).run().await;
            if let (Ok(report), Some(mtime)) = (&result, mtime) {
                if report.outcome == JobOutcome::Done {
                    if let Err(e) = filetime::set_file_mtime(&path, mtime) {
                        warn!(path = %path.display(), error = %e, "could not restore mtime");
                    }
                }
            }
            (index, path, result)
        });
    }

    let mut results = Vec::with_capacity(files.len());
    while let Some(joined) = running.join_next().await {
        let (index, path, result) = joined?;
        debug!(path = %path.display(), ok = result.is_ok(), "file finished");
        if !options.json {
            pb.suspend(|| println!("{}", describe(&path, &result)));
        }
        pb.inc(1);
        results.push((index, path, result));
    }
    pb.finish_and_clear();
    results.sort_by_key(|(index, _, _)| *index);

    let mut summary = RunJson {
        files: Vec::with_capacity(results.len()),
        done: 0,
        skipped: 0,
        errors: 0,
        saved: 0,
    };
    for (_, path, result) in &results {
        match result {
            Ok(report) if report.outcome == JobOutcome::Done => {
                summary.done += 1;
                summary.saved += report.size_before.saturating_sub(report.size_after);
            }
            Ok(_) => summary.skipped += 1,
            Err(_) => summary.errors += 1,
        }
        summary.files.push(FileJson::from_result(path, result));
    }

    if options.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else if results.len() > 1 {
        println!(
            "{} done, {} skipped, {} failed, {} saved",
            summary.done,
            summary.skipped,
            summary.errors,
            format_size(summary.saved)
        );
    }
    Ok(summary.errors == 0)
}
