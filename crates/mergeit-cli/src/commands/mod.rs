//! CLI command implementations.

mod run;

pub use run::run;

use anyhow::{Context, Result};
use mergeit_config::{load_bot_config, validate_config};
use std::path::Path;

pub fn validate(path: &Path) -> Result<()> {
    let config = load_bot_config(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    match validate_config(&config) {
        Ok(()) => {
            println!("Configuration is valid");
            Ok(())
        }
        Err(e) => {
            println!("Configuration error: {}", e);
            std::process::exit(1);
        }
    }
}
