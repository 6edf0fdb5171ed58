#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the moose map toolchain.
//!
//! Reads the survey inputs, runs the pipeline, and writes one `GeoJSON`
//! file per output layer. Uses `indicatif-log-bridge` (via
//! [`moose_map_cli_utils::init_logger`]) so log lines and progress bars
//! share the terminal.

mod commands;
mod load;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "moose_map", about = "Moose survey map layer builder")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the units, grid, sightings, and region layers
    Run {
        /// TOML run configuration. Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Management unit boundaries (`GeoJSON`)
        #[arg(long)]
        units: PathBuf,
        /// Abundance grid cells (`GeoJSON`)
        #[arg(long)]
        grid: PathBuf,
        /// Survey observations (CSV)
        #[arg(long)]
        observations: PathBuf,
        /// Density per unit (CSV)
        #[arg(long)]
        densities: PathBuf,
        /// Abundance prediction per grid cell (CSV)
        #[arg(long)]
        predictions: PathBuf,
        /// Region outline (`GeoJSON`). Dissolved from the units when omitted.
        #[arg(long)]
        region: Option<PathBuf>,
        /// Directory the layer files are written to
        #[arg(long)]
        out_dir: PathBuf,
        /// Seed for sighting jitter, for reproducible output
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Check unit codes and boundaries without running the pipeline
    Validate {
        /// Management unit boundaries (`GeoJSON`)
        #[arg(long)]
        units: PathBuf,
        /// TOML run configuration, for code settings and field names
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print the quantile classification of one CSV column
    Classify {
        /// Input table
        #[arg(long)]
        csv: PathBuf,
        /// Numeric column to classify
        #[arg(long)]
        column: String,
        /// Number of classes
        #[arg(long, default_value = "10")]
        classes: u32,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = moose_map_cli_utils::init_logger("info");
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            units,
            grid,
            observations,
            densities,
            predictions,
            region,
            out_dir,
            seed,
        } => {
            let inputs = commands::InputPaths {
                units,
                grid,
                observations,
                densities,
                predictions,
                region,
            };
            commands::run(&multi, config.as_deref(), &inputs, &out_dir, seed)?;
        }
        Commands::Validate { units, config } => {
            commands::validate(&units, config.as_deref())?;
        }
        Commands::Classify {
            csv,
            column,
            classes,
        } => {
            commands::classify_column(&csv, &column, classes)?;
        }
    }

    Ok(())
}
