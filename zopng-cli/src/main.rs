//! zopng CLI - PNG image-data recompressor
//!
//! Re-deflates the IDAT/fdAT streams of PNG and APNG files with an external
//! optimizer (zopfli by default) and rewrites each file only if it shrinks.

mod commands;
mod utils;

use clap::{ArgAction, Parser, Subcommand};
use commands::{OptimizeOptions, cmd_chunks, cmd_optimize};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "zopng")]
#[command(
    author,
    version,
    about = "Recompress PNG/APNG image data with an external optimizer"
)]
#[command(long_about = "
zopng inflates the image data of PNG and APNG files, runs an external
recompressor over it, and rewrites a file only when the result is smaller.
All other chunks are preserved byte for byte.

Examples:
  zopng optimize image.png
  zopng optimize -m --i50 *.png
  zopng optimize --jobs 4 --json sprites/*.png
  zopng optimize --force --recompressor /opt/zopfli/zopfli anim.png
  zopng chunks anim.png
")]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Recompress the image data of one or more files in place
    #[command(alias = "o")]
    Optimize {
        /// Files to optimize
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Flag passed to the recompressor before the input path (repeatable)
        #[arg(short, long = "modifier", allow_hyphen_values = true)]
        modifiers: Vec<String>,

        /// Rewrite even when the image data does not shrink
        #[arg(short, long)]
        force: bool,

        /// Recompressor program
        #[arg(long, default_value = "zopfli")]
        recompressor: PathBuf,

        /// Directory for scratch files
        #[arg(long)]
        scratch_dir: Option<PathBuf>,

        /// Number of files processed at once
        #[arg(short, long, default_value_t = 1)]
        jobs: usize,

        /// Reject chunks with a wrong stored CRC
        #[arg(long)]
        strict: bool,

        /// Keep the original modification time of rewritten files
        #[arg(long)]
        keep_mtime: bool,

        /// Output as JSON (machine-readable)
        #[arg(long)]
        json: bool,
    },

    /// List the chunks of a PNG file
    #[command(alias = "l")]
    Chunks {
        /// File to inspect
        file: PathBuf,

        /// Output as JSON (machine-readable)
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    utils::init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Optimize {
            files,
            modifiers,
            force,
            recompressor,
            scratch_dir,
            jobs,
            strict,
            keep_mtime,
            json,
        } => cmd_optimize(
            &files,
            &OptimizeOptions {
                modifiers,
                force,
                recompressor,
                scratch_dir,
                jobs,
                strict,
                keep_mtime,
                json,
                show_output: cli.verbose > 1,
            },
        ),
        Commands::Chunks { file, json } => cmd_chunks(&file, json).map(|()| true),
    };

    match result {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
