//! Config command handlers.

use anyhow::{Context, Result};
use settle_core::config;

pub fn path() {
    println!("{}", config::paths::config_path().display());
}

pub fn init() -> Result<()> {
    let config_path = config::paths::config_path();
    config::Config::init(&config_path)
        .with_context(|| format!("init config at {}", config_path.display()))?;
    println!("Created config at {}", config_path.display());
    Ok(())
}

pub fn show() -> Result<()> {
    let config = config::Config::load().context("load config")?;
    let toml = toml::to_string_pretty(&config.redacted()).context("serialize config")?;
    print!("{toml}");
    Ok(())
}
