//! Configuration management for droidpool
//!
//! Configuration is layered: built-in defaults, then a TOML file, then
//! `DROIDPOOL_*` environment variables, then command-line flags.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::device::{AdbBridgeConfig, DeviceSpec};
use crate::hub::{HubClientConfig, RegistrarSettings};
use crate::session::SessionSettings;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP front door
    pub server: ServerConfig,

    /// Device pool and Android tooling
    pub devices: DevicesConfig,

    /// Session lifecycle
    pub sessions: SessionsConfig,

    /// App catalog
    pub apps: AppsConfig,

    /// Upstream hub
    pub hub: HubConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to bind
    pub host: String,

    /// Port to bind
    pub port: u16,

    /// Host advertised to the hub; defaults to `host`
    pub advertised_host: Option<String>,

    /// Enable CORS
    pub enable_cors: bool,

    /// Enable request logging
    pub enable_request_logging: bool,

    /// Upper bound on one forwarded command
    pub forward_timeout_secs: u64,

    /// Largest accepted request body
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: String::from("0.0.0.0"),
            port: 4444,
            advertised_host: None,
            enable_cors: true,
            enable_request_logging: true,
            forward_timeout_secs: 300,
            max_body_bytes: 64 * 1024 * 1024,
        }
    }
}

/// An AVD template the orchestrator may boot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmulatorConfig {
    /// AVD name
    pub avd: String,

    pub screen_size: String,

    pub platform_version: String,

    #[serde(default)]
    pub locale: Option<String>,

    /// Control port of an instance that is already running
    #[serde(default)]
    pub port: Option<u16>,
}

impl EmulatorConfig {
    pub fn to_spec(&self) -> DeviceSpec {
        DeviceSpec {
            id: self.avd.clone(),
            emulator: true,
            screen_size: self.screen_size.clone(),
            platform_version: self.platform_version.clone(),
            locale: self.locale.clone(),
            control_port: self.port,
            model: None,
        }
    }
}

/// Device pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DevicesConfig {
    /// Android SDK root; falls back to `ANDROID_HOME`
    pub sdk_path: Option<PathBuf>,

    /// Lowest emulator control port
    pub emulator_port_min: u16,

    /// Highest emulator control port
    pub emulator_port_max: u16,

    /// Consecutive failures before a device is Unhealthy
    pub unhealthy_threshold: u32,

    /// Return Unhealthy devices to the pool after this long
    pub recover_unhealthy_after_secs: Option<u64>,

    /// Hardware discovery interval, 0 disables periodic discovery
    pub discovery_interval_secs: u64,

    /// Emulator boot timeout
    pub boot_timeout_secs: u64,

    /// Run emulators without a window
    pub headless: bool,

    /// Extra emulator arguments
    pub emulator_args: Vec<String>,

    /// Port of the automation server inside the device
    pub device_server_port: u16,

    /// Instrumentation component, `{package}` is substituted
    pub instrumentation: String,

    /// Host forwarded endpoint ports are reachable on
    pub endpoint_host: String,

    /// AVD templates
    pub emulators: Vec<EmulatorConfig>,
}

impl Default for DevicesConfig {
    fn default() -> Self {
        let bridge = AdbBridgeConfig::default();
        Self {
            sdk_path: None,
            emulator_port_min: 5554,
            emulator_port_max: 5584,
            unhealthy_threshold: 3,
            recover_unhealthy_after_secs: None,
            discovery_interval_secs: 10,
            boot_timeout_secs: bridge.boot_timeout.as_secs(),
            headless: bridge.headless,
            emulator_args: Vec::new(),
            device_server_port: bridge.device_server_port,
            instrumentation: bridge.instrumentation,
            endpoint_host: bridge.endpoint_host,
            emulators: Vec::new(),
        }
    }
}

/// Session lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    /// Lowest local port forwarded to a device endpoint
    pub endpoint_port_min: u16,

    /// Highest local port forwarded to a device endpoint
    pub endpoint_port_max: u16,

    /// Upper bound on waiting for a new endpoint
    pub health_check_timeout_secs: u64,

    /// Pause between endpoint status probes
    pub health_check_interval_ms: u64,

    /// Upper bound on each teardown step
    pub teardown_timeout_secs: u64,

    /// Devices tried per session request
    pub max_device_attempts: usize,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            endpoint_port_min: 38080,
            endpoint_port_max: 38180,
            health_check_timeout_secs: 60,
            health_check_interval_ms: 500,
            teardown_timeout_secs: 10,
            max_device_attempts: 3,
        }
    }
}

/// App catalog configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppsConfig {
    /// Folder watched for app binaries
    pub folder: Option<PathBuf>,

    /// Folder scan interval
    pub poll_interval_ms: u64,

    /// Explicit aapt binary; otherwise found under the SDK build-tools
    pub aapt_path: Option<PathBuf>,

    /// Binaries registered at startup
    pub paths: Vec<PathBuf>,
}

impl Default for AppsConfig {
    fn default() -> Self {
        Self {
            folder: None,
            poll_interval_ms: 2000,
            aapt_path: None,
            paths: Vec::new(),
        }
    }
}

/// Upstream hub configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Hub URL, registration is disabled when unset
    pub url: Option<String>,

    /// Registration check interval
    pub register_interval_secs: u64,

    /// Hub request timeout
    pub timeout_secs: u64,

    /// Hub-side proxy class
    pub proxy_class: String,

    /// Browser name advertised to the hub
    pub browser_name: String,
}

impl Default for HubConfig {
    fn default() -> Self {
        let registrar = RegistrarSettings::new("");
        Self {
            url: None,
            register_interval_secs: 30,
            timeout_secs: 10,
            proxy_class: registrar.proxy_class,
            browser_name: registrar.browser_name,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Apply `DROIDPOOL_*` environment overrides
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable source
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        fn parsed<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            key: &str,
        ) -> Result<Option<T>> {
            match lookup(key) {
                Some(value) => value
                    .parse::<T>()
                    .map(Some)
                    .map_err(|_| anyhow::anyhow!("Invalid value for {key}: {value}")),
                None => Ok(None),
            }
        }

        if let Some(host) = lookup("DROIDPOOL_HOST") {
            self.server.host = host;
        }
        if let Some(port) = parsed(&lookup, "DROIDPOOL_PORT")? {
            self.server.port = port;
        }
        if let Some(host) = lookup("DROIDPOOL_ADVERTISED_HOST") {
            self.server.advertised_host = Some(host);
        }
        if let Some(path) = lookup("DROIDPOOL_SDK_PATH") {
            self.devices.sdk_path = Some(PathBuf::from(path));
        } else if let Some(path) = lookup("ANDROID_HOME") {
            self.devices.sdk_path.get_or_insert_with(|| PathBuf::from(path));
        }
        if let Some(threshold) = parsed(&lookup, "DROIDPOOL_UNHEALTHY_THRESHOLD")? {
            self.devices.unhealthy_threshold = threshold;
        }
        if let Some(secs) = parsed(&lookup, "DROIDPOOL_HEALTH_CHECK_TIMEOUT")? {
            self.sessions.health_check_timeout_secs = secs;
        }
        if let Some(folder) = lookup("DROIDPOOL_APP_FOLDER") {
            self.apps.folder = Some(PathBuf::from(folder));
        }
        if let Some(url) = lookup("DROIDPOOL_HUB_URL") {
            self.hub.url = Some(url).filter(|u| !u.is_empty());
        }
        if let Some(level) = lookup("DROIDPOOL_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("DROIDPOOL_LOG_FORMAT") {
            self.logging.format = format;
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.devices.emulator_port_min > self.devices.emulator_port_max {
            anyhow::bail!("emulator_port_min must not exceed emulator_port_max");
        }

        if self.sessions.endpoint_port_min > self.sessions.endpoint_port_max {
            anyhow::bail!("endpoint_port_min must not exceed endpoint_port_max");
        }

        let emulator = self.devices.emulator_port_min..=self.devices.emulator_port_max;
        let endpoint = self.sessions.endpoint_port_min..=self.sessions.endpoint_port_max;
        if emulator.start() <= endpoint.end() && endpoint.start() <= emulator.end() {
            anyhow::bail!("emulator and endpoint port ranges must not overlap");
        }

        if self.devices.unhealthy_threshold == 0 {
            anyhow::bail!("unhealthy_threshold must be greater than 0");
        }

        if self.sessions.max_device_attempts == 0 {
            anyhow::bail!("max_device_attempts must be greater than 0");
        }

        if self.sessions.health_check_timeout_secs == 0 {
            anyhow::bail!("health_check_timeout_secs must be greater than 0");
        }

        if self.hub.url.is_some() && self.hub.register_interval_secs == 0 {
            anyhow::bail!("register_interval_secs must be greater than 0");
        }

        if !matches!(self.logging.format.as_str(), "text" | "json") {
            anyhow::bail!("log format must be 'text' or 'json'");
        }

        Ok(())
    }

    /// Address to bind the HTTP server on
    pub fn bind_address(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.server.host, self.server.port))
    }

    /// URL this node is reachable at
    #[must_use]
    pub fn node_url(&self) -> String {
        let host = match (&self.server.advertised_host, self.server.host.as_str()) {
            (Some(host), _) => host.clone(),
            (None, "0.0.0.0") => String::from("127.0.0.1"),
            (None, host) => host.to_string(),
        };
        format!("http://{}:{}", host, self.server.port)
    }

    #[must_use]
    pub fn forward_timeout(&self) -> Duration {
        Duration::from_secs(self.server.forward_timeout_secs)
    }

    #[must_use]
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            health_check_timeout: Duration::from_secs(self.sessions.health_check_timeout_secs),
            health_check_interval: Duration::from_millis(self.sessions.health_check_interval_ms),
            teardown_timeout: Duration::from_secs(self.sessions.teardown_timeout_secs),
            max_device_attempts: self.sessions.max_device_attempts,
        }
    }

    #[must_use]
    pub fn bridge_config(&self) -> AdbBridgeConfig {
        let defaults = AdbBridgeConfig::default();
        AdbBridgeConfig {
            sdk_path: self.devices.sdk_path.clone().unwrap_or(defaults.sdk_path),
            endpoint_host: self.devices.endpoint_host.clone(),
            device_server_port: self.devices.device_server_port,
            instrumentation: self.devices.instrumentation.clone(),
            boot_timeout: Duration::from_secs(self.devices.boot_timeout_secs),
            headless: self.devices.headless,
            emulator_args: self.devices.emulator_args.clone(),
        }
    }

    /// Hub client settings, `None` when no hub is configured
    #[must_use]
    pub fn hub_client_config(&self) -> Option<HubClientConfig> {
        self.hub.url.as_ref().map(|url| {
            HubClientConfig::new(url.clone())
                .with_timeout(Duration::from_secs(self.hub.timeout_secs))
        })
    }

    #[must_use]
    pub fn registrar_settings(&self) -> RegistrarSettings {
        RegistrarSettings {
            tick_interval: Duration::from_secs(self.hub.register_interval_secs),
            proxy_class: self.hub.proxy_class.clone(),
            browser_name: self.hub.browser_name.clone(),
            ..RegistrarSettings::new(self.node_url())
        }
    }
}
