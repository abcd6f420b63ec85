pub mod bpmask;
pub mod calibrate;
pub mod config;
pub mod dark;
pub mod flat;
pub mod info;
pub mod reduce;

use std::path::Path;

use anyhow::{Context, Result};
use gsnap_core::pipeline::config::ReductionConfig;

/// Read and parse a TOML reduction config file.
pub fn load_config(path: &Path) -> Result<ReductionConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    let config: ReductionConfig =
        toml::from_str(&text).with_context(|| format!("Failed to parse config {}", path.display()))?;
    Ok(config)
}
