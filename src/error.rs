//! Unified error handling for the droidpool crate
//!
//! Domain modules keep their own error types ([`BridgeError`],
//! [`InspectError`], [`HubError`]); this module folds them into a single
//! [`Error`] that the HTTP front door renders as a WebDriver response
//! envelope.
//!
//! # Taxonomy
//!
//! - capacity exhaustion (no device, no port) is retryable and never a crash
//! - resolution failures are reported before any device is reserved
//! - device operational failures happen after reservation and always release
//! - routing failures never touch a device
//! - hub failures are logged by the registrar and never reach clients

use std::io;

use axum::http::StatusCode;
use thiserror::Error;

pub use crate::apps::inspector::InspectError;
pub use crate::device::bridge::BridgeError;
pub use crate::hub::client::HubError;

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// No matching device or no free port
    Capacity,
    /// Requested app or capabilities could not be resolved
    Resolution,
    /// A reserved device failed to boot, install or answer
    Device,
    /// Unknown session or command
    Routing,
    /// Upstream hub communication
    Hub,
    /// Configuration and validation errors
    Config,
    /// Anything unexpected
    Internal,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Capacity => "capacity",
            Self::Resolution => "resolution",
            Self::Device => "device",
            Self::Routing => "routing",
            Self::Hub => "hub",
            Self::Config => "config",
            Self::Internal => "internal",
        }
    }
}

/// JSON wire protocol status codes used by the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireStatus {
    Success,
    NoSuchDriver,
    UnknownCommand,
    UnknownError,
    SessionNotCreated,
}

impl WireStatus {
    pub fn code(&self) -> u32 {
        match self {
            Self::Success => 0,
            Self::NoSuchDriver => 6,
            Self::UnknownCommand => 9,
            Self::UnknownError => 13,
            Self::SessionNotCreated => 33,
        }
    }
}

/// Unified error type for the droidpool crate
#[derive(Error, Debug)]
pub enum Error {
    /// Every matching device is busy, unhealthy or cannot be provisioned
    #[error("No available device matches {criteria}")]
    NoDeviceAvailable { criteria: String },

    /// The requested app is not in the catalog
    #[error("Unknown app under test: {0}")]
    UnknownApp(String),

    /// The capabilities document could not be understood
    #[error("Invalid capabilities: {0}")]
    InvalidCapabilities(String),

    /// A reserved device failed during session start
    #[error("Device {device} failed: {reason}")]
    DeviceFailure { device: String, reason: String },

    /// A live session's endpoint did not answer a forwarded command
    #[error("Endpoint of session {session} unreachable: {reason}")]
    EndpointUnreachable { session: String, reason: String },

    /// No live session with this id
    #[error("Invalid session id: {0}")]
    InvalidSession(String),

    /// No route for this method and path
    #[error("Unknown command: {method} {path}")]
    UnknownCommand { method: String, path: String },

    /// Device bridge errors
    #[error("Device bridge error: {0}")]
    Bridge(#[from] BridgeError),

    /// App inspection errors
    #[error("App inspection error: {0}")]
    Inspect(#[from] InspectError),

    /// Hub communication errors
    #[error("Hub error: {0}")]
    Hub(#[from] HubError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// Create a generic error with context and source
    pub fn with_source(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Other {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a device failure error
    pub fn device_failure(device: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DeviceFailure {
            device: device.into(),
            reason: reason.into(),
        }
    }

    /// Get the error category for handling strategies
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NoDeviceAvailable { .. } => ErrorCategory::Capacity,
            Self::UnknownApp(_) | Self::InvalidCapabilities(_) => ErrorCategory::Resolution,
            Self::DeviceFailure { .. } | Self::Bridge(_) | Self::EndpointUnreachable { .. } => {
                ErrorCategory::Device
            }
            Self::InvalidSession(_) | Self::UnknownCommand { .. } => ErrorCategory::Routing,
            Self::Hub(_) => ErrorCategory::Hub,
            Self::Config(_) => ErrorCategory::Config,
            Self::Inspect(_) | Self::Io(_) | Self::Json(_) | Self::Http(_) | Self::Other { .. } => {
                ErrorCategory::Internal
            }
        }
    }

    /// Check if the client may retry the same request later
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::NoDeviceAvailable { .. } => true,
            Self::DeviceFailure { .. } | Self::Bridge(_) => true,
            Self::Hub(e) => e.is_recoverable(),
            Self::Http(_) | Self::Io(_) => true,
            _ => false,
        }
    }

    /// Status code carried in the response envelope
    pub fn wire_status(&self) -> WireStatus {
        match self {
            Self::NoDeviceAvailable { .. }
            | Self::UnknownApp(_)
            | Self::InvalidCapabilities(_)
            | Self::DeviceFailure { .. }
            | Self::Bridge(_) => WireStatus::SessionNotCreated,
            Self::InvalidSession(_) => WireStatus::NoSuchDriver,
            Self::UnknownCommand { .. } => WireStatus::UnknownCommand,
            _ => WireStatus::UnknownError,
        }
    }

    /// HTTP status used when the error is rendered
    pub fn http_status(&self) -> StatusCode {
        match self {
            Self::InvalidCapabilities(_) => StatusCode::BAD_REQUEST,
            Self::InvalidSession(_) | Self::UnknownCommand { .. } => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message shown to clients
    ///
    /// Orchestrator-detected failures are descriptive; unexpected internal
    /// faults are reported opaquely.
    pub fn client_message(&self) -> String {
        match self.category() {
            ErrorCategory::Internal => "Internal orchestrator error".to_string(),
            _ => self.to_string(),
        }
    }
}

// Conversion from anyhow::Error
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other {
            context: err.to_string(),
            source: None,
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
