pub mod devices;
pub mod serve;

// Re-export command functions for convenience
pub use devices::{devices, inspect};
pub use serve::{serve, ServeParams};

use std::path::Path;

use anyhow::{Context, Result};
use droidpool::apps::AaptInspector;
use droidpool::config::Config;

/// Load configuration: file (when given), then environment overrides
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    config.apply_env().context("Invalid environment override")?;
    Ok(config)
}

/// Inspector for the configured SDK, falling back to `aapt` on the PATH
pub fn inspector_for(config: &Config) -> AaptInspector {
    if let Some(path) = &config.apps.aapt_path {
        return AaptInspector::new(path);
    }

    let sdk = config.bridge_config().sdk_path;
    AaptInspector::from_sdk(&sdk).unwrap_or_else(|| {
        tracing::warn!(sdk = %sdk.display(), "aapt not found under build-tools, using PATH");
        AaptInspector::new("aapt")
    })
}
