//! CLI argument definitions using clap
//!
//! Commands:
//! - blobcast init --config <path> [--data-dir <dir>]
//! - blobcast start --config <path>
//! - blobcast dump --config <path>
//! - blobcast publish --config <path> [--message <text>]
//! - blobcast tail --config <path>

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// blobcast - A durable publish/subscribe broker over a single append-only log
#[derive(Parser, Debug)]
#[command(name = "blobcast")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Initialize a data directory, writing a default config if none exists
    Init {
        /// Path to configuration file
        #[arg(long, default_value = "./blobcast.json")]
        config: PathBuf,

        /// Data directory for a newly written config
        #[arg(long, default_value = "./blobcast-data")]
        data_dir: PathBuf,
    },

    /// Recover and serve until Ctrl-C
    Start {
        /// Path to configuration file
        #[arg(long, default_value = "./blobcast.json")]
        config: PathBuf,
    },

    /// Print every log record as a JSON line
    Dump {
        /// Path to configuration file
        #[arg(long, default_value = "./blobcast.json")]
        config: PathBuf,
    },

    /// Publish one blob to a running broker
    Publish {
        /// Path to configuration file
        #[arg(long, default_value = "./blobcast.json")]
        config: PathBuf,

        /// Payload to send; stdin is read when omitted
        #[arg(long)]
        message: Option<String>,
    },

    /// Subscribe and copy every pushed payload to stdout
    Tail {
        /// Path to configuration file
        #[arg(long, default_value = "./blobcast.json")]
        config: PathBuf,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
