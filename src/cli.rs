//! Command-line interface definition.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "prismcast", about = "Re-publish browser-captured video as HLS channels")]
pub struct Cli {
    /// Path to the JSON configuration file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose (trace-level) logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP server and stream supervisor.
    Serve {
        /// Override the configured bind host.
        #[arg(long)]
        host: Option<String>,
        /// Override the configured bind port.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Validate a configuration file and print a summary.
    Validate {
        /// Config file to validate (defaults to --config).
        file: Option<PathBuf>,
    },
    /// Print the version.
    Version,
}
