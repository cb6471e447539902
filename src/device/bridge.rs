//! Bridge to the Android toolchain
//!
//! Everything that touches a real device goes through [`DeviceBridge`]:
//! discovery, emulator boot, app install, and starting the on-device
//! automation endpoint. [`AdbBridge`] drives `adb` and `emulator` from the
//! SDK; tests substitute their own implementation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::process::{Child, Command};
use url::Url;

use crate::apps::AppKey;

use super::handle::{DeviceHandle, DeviceSpec};

/// Device bridge errors
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Tool not found: {0}")]
    ToolNotFound(PathBuf),
    #[error("Command `{command}` failed on {device}: {stderr}")]
    CommandFailed {
        device: String,
        command: String,
        stderr: String,
    },
    #[error("Emulator {0} did not finish booting within {1:?}")]
    BootTimeout(String, Duration),
    #[error("Invalid endpoint address: {0}")]
    InvalidEndpoint(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// What to launch on a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    /// Key the client asked for
    pub app: AppKey,

    /// Android package name
    pub package: String,

    /// Activity to start, if known
    pub activity: Option<String>,

    /// Binary to install first; `None` when the app is expected on the device
    pub binary: Option<PathBuf>,
}

/// Operations the orchestrator performs against devices
#[async_trait]
pub trait DeviceBridge: Send + Sync {
    /// Hardware devices currently attached
    async fn list_devices(&self) -> Result<Vec<DeviceSpec>, BridgeError>;

    /// Boot an emulator on its bound control port and wait until ready
    async fn boot(&self, device: &DeviceHandle) -> Result<(), BridgeError>;

    /// Install an app binary
    async fn install_app(&self, device: &DeviceHandle, binary: &Path) -> Result<(), BridgeError>;

    /// Start the automation endpoint for `launch` and expose it on
    /// `local_port`; returns the endpoint's base URL
    async fn start_endpoint(
        &self,
        device: &DeviceHandle,
        launch: &LaunchRequest,
        local_port: u16,
    ) -> Result<Url, BridgeError>;

    /// Stop the endpoint and the app under test
    async fn stop_endpoint(
        &self,
        device: &DeviceHandle,
        launch: &LaunchRequest,
        local_port: u16,
    ) -> Result<(), BridgeError>;

    /// Shut down an emulator booted by [`DeviceBridge::boot`]
    async fn shutdown(&self, device: &DeviceHandle) -> Result<(), BridgeError>;
}

// ============================================================================
// adb implementation
// ============================================================================

/// Settings for [`AdbBridge`]
#[derive(Debug, Clone)]
pub struct AdbBridgeConfig {
    /// Android SDK root
    pub sdk_path: PathBuf,

    /// Host that forwarded endpoint ports listen on
    pub endpoint_host: String,

    /// Port the automation server listens on inside the device
    pub device_server_port: u16,

    /// Instrumentation component; `{package}` is replaced by the app package
    pub instrumentation: String,

    /// How long an emulator may take to boot
    pub boot_timeout: Duration,

    /// Run emulators without a window
    pub headless: bool,

    /// Extra emulator arguments
    pub emulator_args: Vec<String>,
}

impl Default for AdbBridgeConfig {
    fn default() -> Self {
        Self {
            sdk_path: std::env::var("ANDROID_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/opt/android-sdk")),
            endpoint_host: "127.0.0.1".to_string(),
            device_server_port: 8080,
            instrumentation: "io.selendroid.{package}/io.selendroid.server.ServerInstrumentation"
                .to_string(),
            boot_timeout: Duration::from_secs(180),
            headless: true,
            emulator_args: Vec::new(),
        }
    }
}

/// Bridge backed by the SDK's `adb` and `emulator` tools
pub struct AdbBridge {
    config: AdbBridgeConfig,

    /// Emulator processes we started, by control port
    emulators: Mutex<HashMap<u16, Child>>,
}

impl AdbBridge {
    pub fn new(config: AdbBridgeConfig) -> Self {
        Self {
            config,
            emulators: Mutex::new(HashMap::new()),
        }
    }

    fn adb_path(&self) -> PathBuf {
        let exe = if cfg!(windows) { "adb.exe" } else { "adb" };
        self.config.sdk_path.join("platform-tools").join(exe)
    }

    fn emulator_path(&self) -> PathBuf {
        let exe = if cfg!(windows) { "emulator.exe" } else { "emulator" };
        self.config.sdk_path.join("emulator").join(exe)
    }

    async fn adb(&self, serial: Option<&str>, args: &[&str]) -> Result<String, BridgeError> {
        let adb = self.adb_path();
        let mut command = Command::new(&adb);
        if let Some(serial) = serial {
            command.args(["-s", serial]);
        }
        command.args(args);

        tracing::debug!(serial = ?serial, args = ?args, "adb");

        let output = command.output().await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => BridgeError::ToolNotFound(adb.clone()),
            _ => BridgeError::Io(e),
        })?;

        if !output.status.success() {
            return Err(BridgeError::CommandFailed {
                device: serial.unwrap_or("adb").to_string(),
                command: args.join(" "),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    async fn getprop(&self, serial: &str, prop: &str) -> Option<String> {
        self.adb(Some(serial), &["shell", "getprop", prop])
            .await
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    async fn describe(&self, serial: &str, model: Option<String>) -> DeviceSpec {
        let platform_version = self
            .getprop(serial, "ro.build.version.sdk")
            .await
            .unwrap_or_default();

        let screen_size = match self.adb(Some(serial), &["shell", "wm", "size"]).await {
            Ok(output) => parse_wm_size(&output).unwrap_or_default(),
            Err(e) => {
                tracing::debug!(serial, error = %e, "Could not read screen size");
                String::new()
            }
        };

        let locale = match self.getprop(serial, "persist.sys.locale").await {
            Some(tag) => Some(tag.replace('-', "_")),
            None => self.getprop(serial, "ro.product.locale").await.map(|t| t.replace('-', "_")),
        };

        DeviceSpec {
            id: serial.to_string(),
            emulator: false,
            screen_size,
            platform_version,
            locale,
            control_port: None,
            model,
        }
    }

    fn instrumentation_for(&self, package: &str) -> String {
        self.config.instrumentation.replace("{package}", package)
    }
}

#[async_trait]
impl DeviceBridge for AdbBridge {
    async fn list_devices(&self) -> Result<Vec<DeviceSpec>, BridgeError> {
        let output = self.adb(None, &["devices", "-l"]).await?;
        let mut devices = Vec::new();

        for (serial, model) in parse_adb_devices(&output) {
            devices.push(self.describe(&serial, model).await);
        }

        Ok(devices)
    }

    async fn boot(&self, device: &DeviceHandle) -> Result<(), BridgeError> {
        let Some(port) = device.control_port else {
            return Ok(());
        };
        if !device.is_emulator {
            return Ok(());
        }

        let emulator = self.emulator_path();
        let mut args = vec![
            "-avd".to_string(),
            device.id.clone(),
            "-port".to_string(),
            port.to_string(),
            "-no-snapshot-save".to_string(),
            "-no-boot-anim".to_string(),
        ];
        if self.config.headless {
            args.extend(["-no-window".to_string(), "-no-audio".to_string()]);
        }
        if let Some(locale) = &device.locale {
            args.push("-prop".to_string());
            args.push(format!("persist.sys.locale={}", locale.replace('_', "-")));
        }
        args.extend(self.config.emulator_args.iter().cloned());

        tracing::info!(avd = %device.id, port, "Booting emulator");

        let child = Command::new(&emulator)
            .args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => BridgeError::ToolNotFound(emulator.clone()),
                _ => BridgeError::Io(e),
            })?;
        self.emulators.lock().insert(port, child);

        let serial = device.serial();
        let deadline = tokio::time::Instant::now() + self.config.boot_timeout;

        while tokio::time::Instant::now() < deadline {
            if self.getprop(&serial, "sys.boot_completed").await.as_deref() == Some("1") {
                tracing::info!(avd = %device.id, %serial, "Emulator booted");
                return Ok(());
            }
            tokio::time::sleep(Duration::from_secs(2)).await;
        }

        if let Some(mut child) = self.emulators.lock().remove(&port) {
            let _ = child.start_kill();
        }
        Err(BridgeError::BootTimeout(device.id.clone(), self.config.boot_timeout))
    }

    async fn install_app(&self, device: &DeviceHandle, binary: &Path) -> Result<(), BridgeError> {
        let serial = device.serial();
        let path = binary.to_string_lossy();
        tracing::info!(%serial, binary = %path, "Installing app");
        self.adb(Some(&serial), &["install", "-r", &path]).await?;
        Ok(())
    }

    async fn start_endpoint(
        &self,
        device: &DeviceHandle,
        launch: &LaunchRequest,
        local_port: u16,
    ) -> Result<Url, BridgeError> {
        let serial = device.serial();
        let local = format!("tcp:{local_port}");
        let remote = format!("tcp:{}", self.config.device_server_port);
        self.adb(Some(&serial), &["forward", &local, &remote]).await?;

        let instrumentation = self.instrumentation_for(&launch.package);
        let server_port = self.config.device_server_port.to_string();
        let mut args: Vec<&str> = vec!["shell", "am", "instrument", "-e", "server_port"];
        args.push(server_port.as_str());
        if let Some(activity) = &launch.activity {
            args.extend(["-e", "main_activity", activity.as_str()]);
        }
        args.push(instrumentation.as_str());
        self.adb(Some(&serial), &args).await?;

        let address = format!("http://{}:{}/", self.config.endpoint_host, local_port);
        Url::parse(&address).map_err(|_| BridgeError::InvalidEndpoint(address))
    }

    async fn stop_endpoint(
        &self,
        device: &DeviceHandle,
        launch: &LaunchRequest,
        local_port: u16,
    ) -> Result<(), BridgeError> {
        let serial = device.serial();

        let stopped = self
            .adb(Some(&serial), &["shell", "am", "force-stop", &launch.package])
            .await;
        let local = format!("tcp:{local_port}");
        let unforwarded = self.adb(Some(&serial), &["forward", "--remove", &local]).await;

        stopped.and(unforwarded).map(|_| ())
    }

    async fn shutdown(&self, device: &DeviceHandle) -> Result<(), BridgeError> {
        let Some(port) = device.control_port else {
            return Ok(());
        };

        let result = self.adb(Some(&device.serial()), &["emu", "kill"]).await;

        let child = self.emulators.lock().remove(&port);
        if let Some(mut child) = child {
            let _ = child.start_kill();
        }

        tracing::info!(avd = %device.id, port, "Emulator shut down");
        result.map(|_| ())
    }
}

/// Online hardware serials and models from `adb devices -l`
///
/// Emulators are skipped; they come from configured AVD templates.
pub fn parse_adb_devices(output: &str) -> Vec<(String, Option<String>)> {
    output
        .lines()
        .skip(1)
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let serial = parts.next()?;
            let state = parts.next()?;
            if state != "device" || serial.starts_with("emulator-") {
                return None;
            }
            let model = parts.find_map(|p| p.strip_prefix("model:").map(str::to_string));
            Some((serial.to_string(), model))
        })
        .collect()
}

/// Screen size from `wm size`, preferring the override size
pub fn parse_wm_size(output: &str) -> Option<String> {
    let mut physical = None;
    for line in output.lines() {
        let Some((label, size)) = line.split_once(':') else {
            continue;
        };
        let size = size.trim().to_string();
        if label.trim().starts_with("Override") {
            return Some(size);
        }
        physical = Some(size);
    }
    physical
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_adb_devices() {
        let output = "\
List of devices attached
HT4A1JT00       device usb:1-1 product:sailfish model:Pixel device:sailfish transport_id:1
emulator-5554   device product:sdk_gphone model:sdk_gphone device:generic transport_id:2
0123456789      unauthorized usb:1-2 transport_id:3

";
        let devices = parse_adb_devices(output);
        assert_eq!(devices, vec![("HT4A1JT00".to_string(), Some("Pixel".to_string()))]);
    }

    #[test]
    fn test_parse_wm_size() {
        assert_eq!(parse_wm_size("Physical size: 1080x1920\n"), Some("1080x1920".into()));
        assert_eq!(
            parse_wm_size("Physical size: 1080x1920\nOverride size: 720x1280\n"),
            Some("720x1280".into())
        );
        assert_eq!(parse_wm_size(""), None);
    }

    #[test]
    fn test_instrumentation_template() {
        let bridge = AdbBridge::new(AdbBridgeConfig::default());
        assert_eq!(
            bridge.instrumentation_for("io.selendroid.testapp"),
            "io.selendroid.io.selendroid.testapp/io.selendroid.server.ServerInstrumentation"
        );
    }
}
