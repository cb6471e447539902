//! Device handles and matching criteria

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Device State
// ============================================================================

/// Occupancy state of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceState {
    /// Available for matching
    Free,

    /// Matched to a request, endpoint not yet confirmed
    Reserved,

    /// Serving a live session
    InUse,

    /// Excluded from matching after repeated failures
    Unhealthy,
}

impl DeviceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Reserved => "reserved",
            Self::InUse => "inuse",
            Self::Unhealthy => "unhealthy",
        }
    }

    /// Whether a session currently holds the device
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Reserved | Self::InUse)
    }
}

impl Default for DeviceState {
    fn default() -> Self {
        Self::Free
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Device Spec
// ============================================================================

/// Description of a device as discovered or configured
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSpec {
    /// adb serial for hardware, AVD name for emulators
    pub id: String,

    /// Whether this is a virtual device
    #[serde(default)]
    pub emulator: bool,

    /// Screen size as `WxH`
    pub screen_size: String,

    /// Platform (API level) version
    pub platform_version: String,

    /// Device locale, e.g. `en_US`
    #[serde(default)]
    pub locale: Option<String>,

    /// Control port of an emulator that is already running
    #[serde(default)]
    pub control_port: Option<u16>,

    /// Device model name
    #[serde(default)]
    pub model: Option<String>,
}

impl DeviceSpec {
    pub fn hardware(
        serial: impl Into<String>,
        screen_size: impl Into<String>,
        platform_version: impl Into<String>,
    ) -> Self {
        Self {
            id: serial.into(),
            emulator: false,
            screen_size: screen_size.into(),
            platform_version: platform_version.into(),
            locale: None,
            control_port: None,
            model: None,
        }
    }

    pub fn emulator(
        avd_name: impl Into<String>,
        screen_size: impl Into<String>,
        platform_version: impl Into<String>,
    ) -> Self {
        Self {
            emulator: true,
            ..Self::hardware(avd_name, screen_size, platform_version)
        }
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    pub fn with_control_port(mut self, port: u16) -> Self {
        self.control_port = Some(port);
        self
    }
}

// ============================================================================
// Device Handle
// ============================================================================

/// Orchestrator-side record of one device or emulator
///
/// The store owns the live record; everything handed out is a snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceHandle {
    /// adb serial for hardware, AVD name for emulators
    pub id: String,

    pub is_emulator: bool,

    pub screen_size: String,

    pub platform_version: String,

    pub locale: Option<String>,

    pub model: Option<String>,

    /// Emulator control port, `None` until provisioned
    pub control_port: Option<u16>,

    /// The control port was leased by the store, so the emulator is
    /// booted and shut down by the orchestrator
    pub provisioned: bool,

    pub state: DeviceState,

    /// Failures since the last healthy session
    pub consecutive_failures: u32,

    pub last_failure_at: Option<DateTime<Utc>>,

    pub registered_at: DateTime<Utc>,
}

impl DeviceHandle {
    /// Create a Free handle from a spec
    pub fn from_spec(spec: DeviceSpec) -> Self {
        Self {
            id: spec.id,
            is_emulator: spec.emulator,
            screen_size: normalize_screen_size(&spec.screen_size),
            platform_version: spec.platform_version,
            locale: spec.locale,
            model: spec.model,
            control_port: spec.control_port,
            provisioned: false,
            state: DeviceState::Free,
            consecutive_failures: 0,
            last_failure_at: None,
            registered_at: Utc::now(),
        }
    }

    /// adb serial used to address the device
    ///
    /// Emulators are addressed as `emulator-<port>` once a port is bound.
    pub fn serial(&self) -> String {
        match (self.is_emulator, self.control_port) {
            (true, Some(port)) => format!("emulator-{port}"),
            _ => self.id.clone(),
        }
    }

    /// Emulator that has not been given a control port yet
    pub fn needs_provisioning(&self) -> bool {
        self.is_emulator && self.control_port.is_none()
    }

    /// Refresh descriptive attributes, keeping occupancy bookkeeping
    pub(crate) fn update_from(&mut self, spec: &DeviceSpec) {
        self.screen_size = normalize_screen_size(&spec.screen_size);
        self.platform_version = spec.platform_version.clone();
        self.locale = spec.locale.clone();
        self.model = spec.model.clone();
    }
}

/// Normalize `480 X 800` style sizes to `480x800`
pub fn normalize_screen_size(size: &str) -> String {
    size.chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_lowercase()
}

// ============================================================================
// Device Criteria
// ============================================================================

/// What a session request needs from a device
///
/// `None` is a wildcard; every `Some` must equal the device attribute.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCriteria {
    pub screen_size: Option<String>,
    pub platform_version: Option<String>,
    pub emulator: Option<bool>,
    pub locale: Option<String>,
    pub serial: Option<String>,
}

impl DeviceCriteria {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn with_screen_size(mut self, size: impl Into<String>) -> Self {
        self.screen_size = Some(normalize_screen_size(&size.into()));
        self
    }

    pub fn with_platform_version(mut self, version: impl Into<String>) -> Self {
        self.platform_version = Some(version.into());
        self
    }

    pub fn with_emulator(mut self, emulator: bool) -> Self {
        self.emulator = Some(emulator);
        self
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = Some(serial.into());
        self
    }

    /// Whether hardware devices may satisfy the request
    pub fn allows_hardware(&self) -> bool {
        self.emulator != Some(true)
    }

    /// Whether virtual devices may satisfy the request
    pub fn allows_emulator(&self) -> bool {
        self.emulator != Some(false)
    }

    /// Attribute equality on every non-wildcard criterion
    pub fn matches(&self, device: &DeviceHandle) -> bool {
        if let Some(emulator) = self.emulator {
            if device.is_emulator != emulator {
                return false;
            }
        }
        if let Some(size) = &self.screen_size {
            if normalize_screen_size(size) != device.screen_size {
                return false;
            }
        }
        if let Some(version) = &self.platform_version {
            if version != &device.platform_version {
                return false;
            }
        }
        if let Some(locale) = &self.locale {
            if device.locale.as_deref() != Some(locale.as_str()) {
                return false;
            }
        }
        if let Some(serial) = &self.serial {
            if serial != &device.id && *serial != device.serial() {
                return false;
            }
        }
        true
    }
}

impl fmt::Display for DeviceCriteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(v) = &self.screen_size {
            parts.push(format!("screenSize={v}"));
        }
        if let Some(v) = &self.platform_version {
            parts.push(format!("platformVersion={v}"));
        }
        if let Some(v) = self.emulator {
            parts.push(format!("emulator={v}"));
        }
        if let Some(v) = &self.locale {
            parts.push(format!("locale={v}"));
        }
        if let Some(v) = &self.serial {
            parts.push(format!("serial={v}"));
        }

        if parts.is_empty() {
            f.write_str("{any device}")
        } else {
            write!(f, "{{{}}}", parts.join(", "))
        }
    }
}
