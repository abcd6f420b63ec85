use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use gsnap_core::pipeline::run_bad_pixel_mask;

use super::load_config;

#[derive(Args)]
pub struct BpmaskArgs {
    /// Reduction config file (TOML)
    #[arg(short, long)]
    pub config: PathBuf,

    /// Override the bad-pixel threshold (in MADs)
    #[arg(long)]
    pub threshold: Option<f32>,
}

pub fn run(args: &BpmaskArgs) -> Result<()> {
    let mut config = load_config(&args.config)?;
    if let Some(threshold) = args.threshold {
        config.calib.bp_threshold = threshold;
    }

    println!(
        "Finding bad pixels in dark frames {}-{} (threshold {} MAD)...",
        config.calib.dark.start, config.calib.dark.end, config.calib.bp_threshold
    );
    let path = run_bad_pixel_mask(&config)?;
    println!("Saved to {}", path.display());
    Ok(())
}
