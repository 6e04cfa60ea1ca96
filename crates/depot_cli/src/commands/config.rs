//! Configuration file commands.

use anyhow::{bail, Context, Result};
use console::style;
use depot_core::Config;
use std::path::Path;

/// Print the configuration as the other commands would see it.
pub fn show(path: &Path) -> Result<()> {
    let config = super::load_config(path)?;
    println!("# {} (gc mode: {})", path.display(), config.gc_mode());
    print!("{}", toml::to_string_pretty(&config).context("Failed to render configuration")?);
    Ok(())
}

/// Write the default configuration.
pub fn init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists, pass --force to overwrite it", path.display());
    }
    Config::default().save(path)?;
    println!("{} Wrote default configuration to {}", style("✓").green(), path.display());
    Ok(())
}
