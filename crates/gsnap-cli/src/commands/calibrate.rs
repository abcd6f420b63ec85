use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use gsnap_core::pipeline::run_calibration;

use super::load_config;

#[derive(Args)]
pub struct CalibrateArgs {
    /// Reduction config file (TOML)
    #[arg(short, long)]
    pub config: PathBuf,
}

pub fn run(args: &CalibrateArgs) -> Result<()> {
    let config = load_config(&args.config)?;

    println!("Building calibration products (dark, bpmask, flatfield)...");
    let paths = run_calibration(&config)?;
    for path in paths {
        println!("Saved {}", path.display());
    }
    Ok(())
}
