//! droidpool - standalone WebDriver orchestrator for Android
//!
//! Clients speak the JSON wire protocol to a single front door. Each new
//! session is matched to a free hardware device or a bootable emulator,
//! the requested app is installed and launched, and every later command
//! for the session is forwarded to the automation endpoint on that device.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Layered configuration (defaults, TOML, environment)
//! - [`ports`] - Even-numbered port pools for emulators and endpoints
//! - [`device`] - Device pool, matching criteria and the adb bridge
//! - [`apps`] - App catalog, binary inspection and folder watching
//! - [`session`] - Session lifecycle with leak-free teardown
//! - [`hub`] - Optional registration with an upstream grid hub
//! - [`server`] - HTTP front door and command forwarding
//! - [`metrics`] - Prometheus metrics
//! - [`error`] - Unified error type and wire status mapping
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use droidpool::apps::AaptInspector;
//! use droidpool::config::Config;
//! use droidpool::device::AdbBridge;
//! use droidpool::server::OrchestratorServer;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     let bridge = Arc::new(AdbBridge::new(config.bridge_config()));
//!     let inspector = Arc::new(AaptInspector::new("aapt"));
//!     let server = OrchestratorServer::new(config, bridge, inspector)?;
//!     server.start_with_shutdown(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     }).await?;
//!     Ok(())
//! }
//! ```

pub mod apps;
pub mod config;
pub mod device;
pub mod error;
pub mod hub;
pub mod metrics;
pub mod ports;
pub mod server;
pub mod session;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::apps::{AppDescriptor, AppKey, AppRegistry};
    pub use crate::config::Config;
    pub use crate::device::{DeviceCriteria, DeviceHandle, DeviceSpec, DeviceState, DeviceStore};
    pub use crate::error::{Error, ErrorCategory, Result};
    pub use crate::server::OrchestratorServer;
    pub use crate::session::{Capabilities, Session, SessionId, SessionRegistry};
}

pub use error::{Error, Result};
