use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use gsnap_core::io::fits::FitsReader;

#[derive(Args)]
pub struct InfoArgs {
    /// Input FITS file
    pub file: PathBuf,
}

pub fn run(args: &InfoArgs) -> Result<()> {
    let reader = FitsReader::open(&args.file)?;

    println!("File:        {}", args.file.display());
    println!("Extensions:  {}", reader.hdu_count());

    for ext in 0..reader.hdu_count() {
        let hdu = reader.hdu(ext)?;
        let shape = match hdu.dims() {
            Some((rows, cols)) => format!("{}x{}", cols, rows),
            None => format!("NAXIS={}", hdu.naxes.len()),
        };
        println!("  [{}] BITPIX {:>3}  {}", ext, hdu.bitpix, shape);
    }

    let primary = reader.hdu(0)?;
    if let Some(rate) = primary.keyword_f64("FRMRATE") {
        println!("Frame rate:  {} frames/s", rate);
    }

    Ok(())
}
