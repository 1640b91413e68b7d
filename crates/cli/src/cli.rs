use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "soundconv")]
#[command(author, version, about = "Convert audio files between formats")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, env = "SOUNDCONV_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print conversion metrics when done
    #[arg(long, global = true)]
    pub metrics: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Convert files one after another
    Convert {
        /// Profile id (uses the configured default if not specified)
        #[arg(short, long)]
        profile: Option<String>,

        /// Directory for converted files (next to each source by default)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Files to convert
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// List profiles and whether the installed engine can use them
    Profiles,

    /// Report which optional codecs are installed
    Probe {
        /// Pretty-print the JSON output
        #[arg(long)]
        pretty: bool,
    },
}
