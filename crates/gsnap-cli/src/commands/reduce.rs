use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use gsnap_core::pipeline::config::OutputMode;
use gsnap_core::pipeline::run_reduce;
use indicatif::{ProgressBar, ProgressStyle};

use super::load_config;
use crate::summary::print_reduction_summary;

#[derive(Args)]
pub struct ReduceArgs {
    /// Reduction config file (TOML)
    #[arg(short, long)]
    pub config: PathBuf,

    /// Coadd all reduced frames into a single output
    #[arg(long)]
    pub coadd: bool,

    /// Write one output file per reduced frame
    #[arg(long, conflicts_with = "coadd")]
    pub frames: bool,
}

pub fn run(args: &ReduceArgs) -> Result<()> {
    let mut config = load_config(&args.config)?;
    if args.coadd {
        config.reduction.output = OutputMode::Coadd;
    } else if args.frames {
        config.reduction.output = OutputMode::Frames;
    }

    print_reduction_summary(&config);

    let total = config.reduction.data.count() as u64;
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("Reducing [{bar:40}] {pos}/{len} pairs")?
            .progress_chars("=> "),
    );

    let written = run_reduce(&config, |done| {
        pb.set_position(done as u64);
    })?;
    pb.finish_and_clear();

    match config.reduction.output {
        OutputMode::Coadd => println!("Coadd saved to {}", written[0].display()),
        OutputMode::Frames => println!("{} reduced frames written", written.len()),
    }
    Ok(())
}
