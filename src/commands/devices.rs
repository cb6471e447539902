use std::path::Path;

use anyhow::{Context, Result};

use droidpool::apps::AppInspector;
use droidpool::config::Config;
use droidpool::device::{AdbBridge, DeviceBridge};

use super::inspector_for;

/// Print attached hardware and configured emulators
pub async fn devices(config: &Config) -> Result<()> {
    let bridge = AdbBridge::new(config.bridge_config());
    let hardware = bridge
        .list_devices()
        .await
        .context("Failed to list attached devices")?;

    println!("Hardware devices: {}", hardware.len());
    for device in &hardware {
        println!(
            "  {:<24} {:<12} API {:<4} {}",
            device.id,
            device.screen_size,
            device.platform_version,
            device.model.as_deref().unwrap_or("-")
        );
    }

    println!("Configured emulators: {}", config.devices.emulators.len());
    for emulator in &config.devices.emulators {
        println!(
            "  {:<24} {:<12} API {:<4} {}",
            emulator.avd,
            emulator.screen_size,
            emulator.platform_version,
            emulator.locale.as_deref().unwrap_or("-")
        );
    }

    Ok(())
}

/// Print the catalog entry an app binary would get
pub async fn inspect(config: &Config, path: &Path) -> Result<()> {
    let inspector = inspector_for(config);
    let app = inspector
        .inspect(path)
        .await
        .with_context(|| format!("Failed to inspect {}", path.display()))?;

    println!("{}", serde_json::to_string_pretty(&app)?);
    println!("App id: {}", app.key());
    Ok(())
}
