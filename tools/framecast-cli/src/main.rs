//! Framecast CLI: inspect sources and plan renders.
//!
//! Usage:
//!   framecast probe <LOCATOR>              Show source size and chunk plan
//!   framecast fetch <LOCATOR> -o <FILE>    Download a source chunk by chunk
//!   framecast plan --duration <SECS>       Show the tick and keyframe plan
//!   framecast config                       Print the effective configuration

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use framecast_common::config::AppConfig;

mod commands;

#[derive(Parser)]
#[command(
    name = "framecast",
    about = "Progressive video decode, composite and encode",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to the user config location)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Probe a source and show how it would be fetched
    Probe {
        /// URL, file:// locator or local path
        locator: String,

        /// Range request size in bytes
        #[arg(long)]
        chunk_size: Option<u64>,
    },

    /// Download a source through ranged chunk requests
    Fetch {
        locator: String,

        /// Output file path
        #[arg(short, long)]
        output: PathBuf,

        #[arg(long)]
        chunk_size: Option<u64>,
    },

    /// Show the output timeline for a render
    Plan {
        /// Output duration in seconds
        #[arg(long)]
        duration: f64,

        /// Output frame rate
        #[arg(long)]
        fps: Option<u32>,

        /// Print every tick instead of a summary
        #[arg(long)]
        ticks: bool,
    },

    /// Print the effective configuration as JSON
    Config {
        /// Write the effective configuration to the user config file
        #[arg(long)]
        save: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    };

    let mut logging = config.logging.clone();
    if cli.verbose {
        logging.level = "debug".to_string();
    }
    framecast_common::logging::init_logging(&logging);

    match cli.command {
        Commands::Probe {
            locator,
            chunk_size,
        } => commands::probe::run(&config, locator, chunk_size).await,
        Commands::Fetch {
            locator,
            output,
            chunk_size,
        } => commands::fetch::run(&config, locator, output, chunk_size).await,
        Commands::Plan {
            duration,
            fps,
            ticks,
        } => commands::plan::run(&config, duration, fps, ticks),
        Commands::Config { save } => commands::config::run(&config, save),
    }
}
