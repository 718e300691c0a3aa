//! # camfx
//!
//! Command-line front end for the camfx filter pipeline.
//!
//! ## Usage
//! ```bash
//! # Filter a photo with a preset and a couple of overrides
//! camfx filter in.jpg out.jpg --params warm.json --set red=0.3 --set saturation=1.4
//!
//! # Print the default parameter set (or save it as a preset)
//! camfx defaults --output defaults.json
//!
//! # Push synthetic frames through the live-preview path
//! RUST_LOG=camfx=debug camfx bench --width 1920 --height 1080 --frames 120 --hold 3
//! ```

use std::io;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

mod cli;

#[derive(Parser)]
#[command(name = "camfx")]
#[command(about = "Real-time camera frame filter pipeline")]
#[command(version)]
struct Cli {
    /// Engine config file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Filter a still photo
    Filter {
        /// Input image (any format the `image` crate decodes)
        input: PathBuf,

        /// Output image; format follows the extension
        output: PathBuf,

        /// Parameter preset (JSON)
        #[arg(short, long)]
        params: Option<PathBuf>,

        /// Override one parameter, e.g. `--set saturation=1.4` (repeatable)
        #[arg(short, long = "set", value_name = "NAME=VALUE")]
        set: Vec<String>,

        /// JPEG quality (1-100)
        #[arg(short, long, default_value = "90")]
        quality: u8,
    },

    /// Print the default parameters as JSON
    Defaults {
        /// Write the preset to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Render synthetic frames through the live-preview path
    Bench {
        #[arg(long, default_value = "1280")]
        width: u32,

        #[arg(long, default_value = "720")]
        height: u32,

        #[arg(short, long, default_value = "60")]
        frames: u32,

        /// Output buffers a simulated sink keeps hold of
        #[arg(long, default_value = "0")]
        hold: usize,

        /// Parameter preset (JSON)
        #[arg(short, long)]
        params: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("camfx=info".parse()?)
                .add_directive("camfx_core=info".parse()?),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    info!("camfx v{} (core {})", env!("CARGO_PKG_VERSION"), camfx_core::VERSION);

    let config = cli::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Filter {
            input,
            output,
            params,
            set,
            quality,
        } => cli::filter(&config, &input, &output, params.as_deref(), &set, quality),
        Commands::Defaults { output } => cli::defaults(output.as_deref()),
        Commands::Bench {
            width,
            height,
            frames,
            hold,
            params,
        } => cli::bench(&config, width, height, frames, hold, params.as_deref()),
    }
}
