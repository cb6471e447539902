//! Device pool and the bridge to real devices
//!
//! [`DeviceStore`] decides which device serves a session and is the only
//! place occupancy changes. [`DeviceBridge`] carries out the side effects
//! on the device itself.

pub mod bridge;
pub mod handle;
pub mod store;

pub use bridge::{AdbBridge, AdbBridgeConfig, BridgeError, DeviceBridge, LaunchRequest};
pub use handle::{DeviceCriteria, DeviceHandle, DeviceSpec, DeviceState};
pub use store::{DeviceStats, DeviceStore, SyncReport};
