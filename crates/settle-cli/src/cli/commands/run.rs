//! Bot command handler.

use anyhow::Result;
use settle_core::config::{Config, paths};
use tracing::info;

pub async fn run(config: Config) -> Result<()> {
    let config_path = paths::config_path();
    if config_path.exists() {
        info!(path = %config_path.display(), "loaded config");
    } else {
        info!(path = %config_path.display(), "no config file; using defaults and environment");
    }
    settle_bot::run(config).await
}
