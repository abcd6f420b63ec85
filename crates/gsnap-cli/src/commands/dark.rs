use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use gsnap_core::pipeline::run_master_dark;

use super::load_config;

#[derive(Args)]
pub struct DarkArgs {
    /// Reduction config file (TOML)
    #[arg(short, long)]
    pub config: PathBuf,

    /// Override the first raw dark file number
    #[arg(long)]
    pub start: Option<usize>,

    /// Override the last raw dark file number
    #[arg(long)]
    pub end: Option<usize>,
}

pub fn run(args: &DarkArgs) -> Result<()> {
    let mut config = load_config(&args.config)?;
    if let Some(start) = args.start {
        config.calib.dark.start = start;
    }
    if let Some(end) = args.end {
        config.calib.dark.end = end;
    }

    println!(
        "Combining dark frames {}-{}...",
        config.calib.dark.start, config.calib.dark.end
    );
    let path = run_master_dark(&config)?;
    println!("Saved to {}", path.display());
    Ok(())
}
