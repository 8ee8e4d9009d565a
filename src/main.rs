// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};
use retroflash::HighlighterMode;
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "retroflash")]
#[command(about = "Detect retro-reflective goals by frame differencing under a flashing IR LED")]
#[command(version = env!("GIT_VERSION"))]
struct Cli {
    /// Configuration file (default: $XDG_CONFIG_HOME/retroflash/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run live detection with the camera and IR LED
    Detect {
        /// V4L2 device (overrides the configuration)
        #[arg(short, long)]
        device: Option<String>,

        /// Highlighter mode: two-frame, two-step, motion-masked, super-slow
        #[arg(short, long)]
        mode: Option<HighlighterMode>,

        /// Stop after this many detections
        #[arg(short = 'n', long)]
        frames: Option<u64>,

        /// Print detections as JSON lines
        #[arg(long)]
        json: bool,

        /// Save annotated highlights to this directory
        #[arg(short, long)]
        save_dir: Option<PathBuf>,
    },

    /// Difference two stills and detect goals in the result
    Diff {
        /// Frame taken with the LED off
        #[arg(long)]
        unlit: PathBuf,

        /// Frame taken with the LED on
        #[arg(long)]
        lit: PathBuf,

        /// Write the annotated highlight here
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print the detection as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run the detector over a directory of recorded frames
    Replay {
        /// Directory of image files, played in name order
        #[arg(short, long)]
        dir: PathBuf,

        #[arg(short, long)]
        mode: Option<HighlighterMode>,

        #[arg(short = 'n', long)]
        frames: Option<u64>,

        #[arg(long)]
        json: bool,
    },

    /// Run the detector against a simulated camera and LED
    Simulate {
        #[arg(short = 'n', long, default_value = "10")]
        frames: u64,

        #[arg(short, long)]
        mode: Option<HighlighterMode>,

        #[arg(long)]
        json: bool,
    },

    /// List V4L2 capture devices
    List,

    /// List LED class devices
    Leds,

    /// Print the effective configuration
    Config {
        /// Write it to the configuration file
        #[arg(long)]
        write: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    // Set RUST_LOG environment variable to control log level
    // Examples: RUST_LOG=debug, RUST_LOG=retroflash=debug, RUST_LOG=info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = cli.config;

    match cli.command {
        Commands::Detect {
            device,
            mode,
            frames,
            json,
            save_dir,
        } => cli::detect(config_path, device, mode, frames, json, save_dir),
        Commands::Diff {
            unlit,
            lit,
            output,
            json,
        } => cli::diff(config_path, &unlit, &lit, output, json),
        Commands::Replay {
            dir,
            mode,
            frames,
            json,
        } => cli::replay(config_path, &dir, mode, frames, json),
        Commands::Simulate { frames, mode, json } => cli::simulate(config_path, frames, mode, json),
        Commands::List => cli::list_cameras(),
        Commands::Leds => cli::list_leds(),
        Commands::Config { write } => cli::show_config(config_path, write),
    }
}
