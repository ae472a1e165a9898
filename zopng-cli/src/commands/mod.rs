//! Command implementations for the zopng CLI.

pub mod chunks;
pub mod optimize;

pub use chunks::cmd_chunks;
pub use optimize::{OptimizeOptions, cmd_optimize};
