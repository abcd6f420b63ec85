use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use gsnap_core::pipeline::run_master_flat;

use super::load_config;

#[derive(Args)]
pub struct FlatArgs {
    /// Reduction config file (TOML)
    #[arg(short, long)]
    pub config: PathBuf,

    /// Override the first raw flat file number
    #[arg(long)]
    pub start: Option<usize>,

    /// Override the last raw flat file number
    #[arg(long)]
    pub end: Option<usize>,
}

pub fn run(args: &FlatArgs) -> Result<()> {
    let mut config = load_config(&args.config)?;
    if let Some(start) = args.start {
        config.calib.flat.start = start;
    }
    if let Some(end) = args.end {
        config.calib.flat.end = end;
    }

    println!(
        "Building flatfield from frames {}-{}...",
        config.calib.flat.start, config.calib.flat.end
    );
    let path = run_master_flat(&config)?;
    println!("Saved to {}", path.display());
    Ok(())
}
