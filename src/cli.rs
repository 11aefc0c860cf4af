use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "dropconvert")]
#[command(author, version, about = "Batch conversion queue for dropped media files")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Convert files through the queue and wait until all are finished
    Convert {
        /// Files to convert
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Print events as JSON lines
        #[arg(long)]
        json: bool,

        /// Override the number of concurrent conversions
        #[arg(long)]
        concurrency: Option<usize>,
    },

    /// Render a thumbnail for a file
    Thumbnail {
        /// Source file
        #[arg(required = true)]
        file: PathBuf,

        /// Where to write the JPEG
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Check that required external tools are available
    CheckTools,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}
