// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # kpu-rt
//!
//! Command-line tools for kmodel artifacts.
//!
//! ## Usage
//! ```bash
//! # Inspect an artifact: header, layer stream, output table
//! kpu-rt inspect --model mobilenet.kmodel
//!
//! # Run an artifact on the software device model
//! kpu-rt run --model mobilenet.kmodel --input image.bin --output-dir out/
//! ```

mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "kpu-rt",
    about = "Inspect and execute kmodel artifacts for the KPU inference runtime",
    version
)]
struct Cli {
    /// Enable verbose logging (repeat for more: -v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect a kmodel: print header fields, the layer stream and the
    /// output table.
    Inspect {
        /// Path to the kmodel file.
        #[arg(short, long)]
        model: std::path::PathBuf,
    },

    /// Run a kmodel on the software device model.
    ///
    /// Hardware layers are driven through the full register/DMA/interrupt
    /// machinery of the runtime but no convolution arithmetic is
    /// performed, so their output bytes are zero. Useful for validating
    /// artifacts and exercising the CPU layer path off-target.
    Run {
        /// Path to the kmodel file.
        #[arg(short, long)]
        model: std::path::PathBuf,

        /// Raw input tensor bytes for the first layer.
        #[arg(short, long)]
        input: std::path::PathBuf,

        /// Directory to write output regions into (`output_<i>.bin`).
        /// Prints a hex digest instead when omitted.
        #[arg(short, long)]
        output_dir: Option<std::path::PathBuf>,

        /// Print the per-layer timing summary as JSON.
        #[arg(long)]
        profile_json: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    commands::init_tracing(cli.verbose);

    match cli.command {
        Commands::Inspect { model } => commands::inspect::execute(model),
        Commands::Run {
            model,
            input,
            output_dir,
            profile_json,
        } => commands::run::execute(model, input, output_dir, profile_json),
    }
}
