mod commands;
mod summary;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gsnap", about = "Chop/nod infrared imaging reduction tool")]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show FITS file structure and header info
    Info(commands::info::InfoArgs),
    /// Print or save a default configuration file
    Config(commands::config::ConfigArgs),
    /// Build the master dark from the raw dark sequence
    Dark(commands::dark::DarkArgs),
    /// Build the bad-pixel mask from the raw dark sequence
    Bpmask(commands::bpmask::BpmaskArgs),
    /// Build the flatfield from the raw flat sequence
    Flat(commands::flat::FlatArgs),
    /// Build all three calibration products in order
    Calibrate(commands::calibrate::CalibrateArgs),
    /// Demodulate the science sequence into reduced output
    Reduce(commands::reduce::ReduceArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match &cli.command {
        Commands::Info(args) => commands::info::run(args),
        Commands::Config(args) => commands::config::run(args),
        Commands::Dark(args) => commands::dark::run(args),
        Commands::Bpmask(args) => commands::bpmask::run(args),
        Commands::Flat(args) => commands::flat::run(args),
        Commands::Calibrate(args) => commands::calibrate::run(args),
        Commands::Reduce(args) => commands::reduce::run(args),
    }
}
