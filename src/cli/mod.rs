use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "filecast")]
#[command(author, version, about = "Stream file tree and content diffs over SSE")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Directory to watch (defaults to the current directory)
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a default configuration to .filecast/config.toml
    Init,

    /// Serve the event stream and file endpoints over HTTP
    Serve {
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Address to bind (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Per-path debounce window in milliseconds (overrides config)
        #[arg(short, long)]
        debounce_ms: Option<u64>,
    },

    /// Print the current file tree as JSON
    Tree,

    /// Print framed events to stdout as files change
    Watch {
        /// Per-path debounce window in milliseconds (overrides config)
        #[arg(short, long)]
        debounce_ms: Option<u64>,
    },
}
