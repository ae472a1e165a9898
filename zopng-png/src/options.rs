//! Job and recompressor configuration.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Default read size when streaming the source file.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 64 * 1024;

/// Name of the scratch subdirectory created under the system temp dir.
pub const SCRATCH_DIR_NAME: &str = "zopng";

/// How the external recompressor is invoked.
///
/// The command line is `<program> <modifiers...> <zlib_flag> <scratch input>`,
/// and the program is expected to write `<scratch input><output_suffix>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecompressorConfig {
    /// Program to run.
    pub program: PathBuf,
    /// Intensity modifiers passed before the input path (e.g. `--i50`).
    pub modifiers: Vec<OsString>,
    /// Flag selecting zlib-wrapped output.
    pub zlib_flag: OsString,
    /// Suffix the program appends to the input path for its output.
    pub output_suffix: String,
}

impl Default for RecompressorConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("zopfli"),
            modifiers: Vec::new(),
            zlib_flag: OsString::from("--zlib"),
            output_suffix: ".zlib".to_string(),
        }
    }
}

impl RecompressorConfig {
    /// Use a different program.
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Set the intensity modifiers.
    pub fn with_modifiers<I, S>(mut self, modifiers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.modifiers = modifiers.into_iter().map(Into::into).collect();
        self
    }

    /// Output path the program produces for `input`.
    pub fn output_path(&self, input: &Path) -> PathBuf {
        let mut name = input.as_os_str().to_owned();
        name.push(&self.output_suffix);
        PathBuf::from(name)
    }

    /// Full argument list for one invocation.
    pub fn args_for(&self, input: &Path) -> Vec<OsString> {
        let mut args = self.modifiers.clone();
        args.push(self.zlib_flag.clone());
        args.push(input.as_os_str().to_owned());
        args
    }
}

/// Per-file options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOptions {
    /// Rewrite even when the recompressed total is not smaller.
    pub force: bool,
    /// Reject chunks whose stored CRC does not match.
    pub verify_crc: bool,
    /// Size of each read from the source file.
    pub read_buffer_size: usize,
    /// Directory holding scratch files.
    pub scratch_dir: PathBuf,
    /// Recompressor invocation.
    pub recompressor: RecompressorConfig,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            force: false,
            verify_crc: false,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            scratch_dir: std::env::temp_dir().join(SCRATCH_DIR_NAME),
            recompressor: RecompressorConfig::default(),
        }
    }
}

impl JobOptions {
    /// Set the force flag.
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Enable or disable stored CRC verification.
    pub fn with_verify_crc(mut self, verify: bool) -> Self {
        self.verify_crc = verify;
        self
    }

    /// Set the scratch directory.
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    /// Set the read size. Zero is bumped to one byte.
    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(1);
        self
    }

    /// Set the recompressor invocation.
    pub fn with_recompressor(mut self, recompressor: RecompressorConfig) -> Self {
        self.recompressor = recompressor;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_invocation() {
        let config = RecompressorConfig::default().with_modifiers(["--i50"]);
        let args = config.args_for(Path::new("/tmp/zopng/a.png.raw"));
        assert_eq!(args, vec!["--i50", "--zlib", "/tmp/zopng/a.png.raw"]);
        assert_eq!(
            config.output_path(Path::new("/tmp/zopng/a.png.raw")),
            PathBuf::from("/tmp/zopng/a.png.raw.zlib")
        );
    }

    #[test]
    fn test_job_defaults() {
        let options = JobOptions::default();
        assert!(!options.force);
        assert!(options.scratch_dir.ends_with(SCRATCH_DIR_NAME));
        assert_eq!(options.with_read_buffer_size(0).read_buffer_size, 1);
    }
}
