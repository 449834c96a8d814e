use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "reelforge")]
#[command(author, version, about = "Media acquisition and byte-range streaming service")]
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
    /// Start the streaming server
    Start {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Resolve a mirror link to its final download URL
    Resolve {
        /// Mirror page link
        #[arg(required = true)]
        link: String,
    },

    /// Split a local file into the chunk store
    Upload {
        /// Source key to store the file under
        source_key: String,

        /// File to upload
        file: PathBuf,
    },

    /// Reassemble a stored source into a local file
    Fetch {
        /// Source key to fetch
        source_key: String,

        /// Output path
        out: PathBuf,
    },

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}
