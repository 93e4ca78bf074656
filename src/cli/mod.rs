//! CLI module for blobcast
//!
//! Provides command-line interface for:
//! - init: Create the data directory (and a default config)
//! - start: Recover and serve
//! - dump: Decode the log to JSON lines
//! - publish: Send one blob to a running broker
//! - tail: Stream pushed payloads to stdout

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command};
pub use commands::{dump, init, load_config, publish, run, run_command, start, tail};
pub use errors::{CliError, CliErrorCode, CliResult};
