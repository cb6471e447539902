//! Session lifecycle integration tests
//!
//! Covers:
//! 1. Emulator provisioning and release
//! 2. Teardown after an endpoint never answers
//! 3. Failure counting and the unhealthy threshold
//! 4. Falling back to the next matching device
//! 5. Cancelled session creation and deletion

use std::time::Duration;

use serde_json::json;

use droidpool::device::{DeviceSpec, DeviceState};
use droidpool::error::{Error, ErrorCategory};
use droidpool::session::{Capabilities, SessionSettings, SessionState};

use crate::common::{dead_endpoint, fast_settings, healthy_endpoint, FakeBridge, Harness, APP_PACKAGE};

fn caps(value: serde_json::Value) -> Capabilities {
    Capabilities::from_request_body(&json!({ "desiredCapabilities": value })).unwrap()
}

// ============================================================================
// Happy path
// ============================================================================

#[tokio::test]
async fn test_emulator_is_provisioned_and_released() {
    let harness = Harness::new(fast_settings(), 3);
    harness
        .devices
        .register_device(DeviceSpec::emulator("Nexus_API_19", "720x1280", "19"));
    let endpoint = healthy_endpoint().await;
    harness.bridge.set_default_endpoint(&endpoint.uri());

    let session = harness
        .sessions
        .create(caps(json!({ "aut": APP_PACKAGE, "emulator": true })))
        .await
        .unwrap();

    assert_eq!(session.state, SessionState::Active);
    assert_eq!(session.app.package(), APP_PACKAGE);
    assert!(session.device.is_emulator);
    assert_eq!(session.device.control_port, Some(5554));
    assert_eq!(session.device.serial(), "emulator-5554");

    let device = harness.devices.get("Nexus_API_19").unwrap();
    assert_eq!(device.state, DeviceState::InUse);
    assert_eq!(harness.devices.ports().leased(), 1);
    assert_eq!(harness.endpoint_ports.leased(), 1);
    assert_eq!(FakeBridge::count(&harness.bridge.boots), 1);
    assert_eq!(FakeBridge::count(&harness.bridge.installs), 1);
    assert_eq!(FakeBridge::count(&harness.bridge.starts), 1);

    harness.sessions.delete(&session.id).await.unwrap();

    assert!(harness.sessions.get(&session.id).is_none());
    assert_eq!(harness.devices.get("Nexus_API_19").unwrap().state, DeviceState::Free);
    assert_eq!(harness.devices.ports().leased(), 0);
    assert_eq!(harness.endpoint_ports.leased(), 0);
    assert_eq!(FakeBridge::count(&harness.bridge.stops), 1);
    assert_eq!(FakeBridge::count(&harness.bridge.shutdowns), 1);
}

#[tokio::test]
async fn test_hardware_session_does_not_boot() {
    let harness = Harness::new(fast_settings(), 3);
    harness
        .devices
        .register_device(DeviceSpec::hardware("0123456789ABCDEF", "1080x1920", "23"));
    let endpoint = healthy_endpoint().await;
    harness.bridge.set_default_endpoint(&endpoint.uri());

    let session = harness
        .sessions
        .create(caps(json!({ "aut": APP_PACKAGE, "screenSize": "1080x1920" })))
        .await
        .unwrap();

    assert!(!session.device.is_emulator);
    assert_eq!(FakeBridge::count(&harness.bridge.boots), 0);

    harness.sessions.delete(&session.id).await.unwrap();
    assert_eq!(FakeBridge::count(&harness.bridge.shutdowns), 0);
    assert_eq!(
        harness.devices.get("0123456789ABCDEF").unwrap().state,
        DeviceState::Free
    );
}

#[tokio::test]
async fn test_delete_twice_is_invalid_session() {
    let harness = Harness::new(fast_settings(), 3);
    harness
        .devices
        .register_device(DeviceSpec::hardware("a", "320x480", "19"));
    let endpoint = healthy_endpoint().await;
    harness.bridge.set_default_endpoint(&endpoint.uri());

    let session = harness
        .sessions
        .create(caps(json!({ "aut": APP_PACKAGE })))
        .await
        .unwrap();

    harness.sessions.delete(&session.id).await.unwrap();
    let err = harness.sessions.delete(&session.id).await.unwrap_err();
    assert!(matches!(err, Error::InvalidSession(_)));
}

// ============================================================================
// Failure paths
// ============================================================================

#[tokio::test]
async fn test_health_check_timeout_leaks_nothing() {
    let harness = Harness::new(fast_settings(), 3);
    harness
        .devices
        .register_device(DeviceSpec::emulator("Nexus_API_19", "720x1280", "19"));
    harness.bridge.set_default_endpoint(&dead_endpoint());

    let err = harness
        .sessions
        .create(caps(json!({ "aut": APP_PACKAGE })))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::DeviceFailure { .. }));
    assert_eq!(err.category(), ErrorCategory::Device);
    assert!(harness.sessions.is_empty());

    let device = harness.devices.get("Nexus_API_19").unwrap();
    assert_eq!(device.state, DeviceState::Free);
    assert_eq!(device.consecutive_failures, 1);

    // the endpoint was stopped and the emulator shut down
    assert_eq!(FakeBridge::count(&harness.bridge.stops), 1);
    assert_eq!(FakeBridge::count(&harness.bridge.shutdowns), 1);
    assert_eq!(harness.devices.ports().leased(), 0);
    assert_eq!(harness.endpoint_ports.leased(), 0);
}

#[tokio::test]
async fn test_device_turns_unhealthy_at_threshold() {
    let harness = Harness::new(fast_settings(), 1);
    harness
        .devices
        .register_device(DeviceSpec::hardware("flaky", "320x480", "19"));
    harness.bridge.fail_device("flaky");

    let err = harness
        .sessions
        .create(caps(json!({ "aut": APP_PACKAGE })))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DeviceFailure { .. }));
    assert_eq!(harness.devices.get("flaky").unwrap().state, DeviceState::Unhealthy);

    // unhealthy devices are never matched again
    let err = harness
        .sessions
        .create(caps(json!({ "aut": APP_PACKAGE })))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NoDeviceAvailable { .. }));
    assert_eq!(FakeBridge::count(&harness.bridge.starts), 1);

    assert!(harness.devices.recover("flaky"));
    assert_eq!(harness.devices.get("flaky").unwrap().state, DeviceState::Free);
}

#[tokio::test]
async fn test_failed_device_falls_back_to_next_match() {
    let harness = Harness::new(fast_settings(), 3);
    harness
        .devices
        .register_device(DeviceSpec::hardware("broken", "320x480", "19"));
    harness
        .devices
        .register_device(DeviceSpec::hardware("good", "320x480", "19"));
    let endpoint = healthy_endpoint().await;
    harness.bridge.fail_device("broken");
    harness.bridge.set_endpoint("good", &endpoint.uri());

    let session = harness
        .sessions
        .create(caps(json!({ "aut": APP_PACKAGE, "screenSize": "320x480" })))
        .await
        .unwrap();

    assert_eq!(session.device.id, "good");
    assert_eq!(harness.devices.get("broken").unwrap().state, DeviceState::Free);
    assert_eq!(harness.devices.get("good").unwrap().state, DeviceState::InUse);
}

#[tokio::test]
async fn test_unknown_app_reserves_nothing() {
    let harness = Harness::new(fast_settings(), 3);
    harness
        .devices
        .register_device(DeviceSpec::hardware("a", "320x480", "19"));

    let err = harness
        .sessions
        .create(caps(json!({ "aut": "io.example.missing:1.0" })))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::UnknownApp(_)));
    assert_eq!(harness.devices.get("a").unwrap().state, DeviceState::Free);
    assert_eq!(FakeBridge::count(&harness.bridge.starts), 0);
}

#[tokio::test]
async fn test_no_matching_device() {
    let harness = Harness::new(fast_settings(), 3);
    harness
        .devices
        .register_device(DeviceSpec::hardware("a", "320x480", "19"));

    let err = harness
        .sessions
        .create(caps(json!({ "aut": APP_PACKAGE, "platformVersion": "28" })))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::NoDeviceAvailable { .. }));
    assert!(err.is_recoverable());
}

#[tokio::test]
async fn test_cancelled_create_releases_device() {
    let settings = SessionSettings {
        health_check_timeout: Duration::from_secs(30),
        ..fast_settings()
    };
    let harness = Harness::new(settings, 3);
    harness
        .devices
        .register_device(DeviceSpec::emulator("Nexus_API_19", "720x1280", "19"));
    harness.bridge.set_default_endpoint(&dead_endpoint());

    let create = harness.sessions.create(caps(json!({ "aut": APP_PACKAGE })));
    let result = tokio::time::timeout(Duration::from_millis(200), create).await;
    assert!(result.is_err());

    // teardown of the dropped reservation runs in the background
    for _ in 0..50 {
        if harness.devices.get("Nexus_API_19").unwrap().state == DeviceState::Free {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(harness.devices.get("Nexus_API_19").unwrap().state, DeviceState::Free);
    assert_eq!(harness.devices.ports().leased(), 0);
    assert_eq!(harness.endpoint_ports.leased(), 0);
    assert_eq!(FakeBridge::count(&harness.bridge.shutdowns), 1);
    assert!(harness.sessions.is_empty());
}

#[tokio::test]
async fn test_cancelled_delete_still_releases_device() {
    let harness = Harness::new(fast_settings(), 3);
    harness
        .devices
        .register_device(DeviceSpec::emulator("Nexus_API_19", "720x1280", "19"));
    let endpoint = healthy_endpoint().await;
    harness.bridge.set_default_endpoint(&endpoint.uri());

    let session = harness
        .sessions
        .create(caps(json!({ "aut": APP_PACKAGE })))
        .await
        .unwrap();
    harness.bridge.set_stop_delay(Duration::from_millis(300));

    let delete = harness.sessions.delete(&session.id);
    let result = tokio::time::timeout(Duration::from_millis(50), delete).await;
    assert!(result.is_err());
    assert!(harness.sessions.get(&session.id).is_none());

    for _ in 0..50 {
        if harness.devices.get("Nexus_API_19").unwrap().state == DeviceState::Free {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(harness.devices.get("Nexus_API_19").unwrap().state, DeviceState::Free);
    assert_eq!(harness.devices.ports().leased(), 0);
    assert_eq!(harness.endpoint_ports.leased(), 0);
    assert_eq!(FakeBridge::count(&harness.bridge.stops), 1);
    assert_eq!(FakeBridge::count(&harness.bridge.shutdowns), 1);
}

#[tokio::test]
async fn test_shutdown_all_closes_every_session() {
    let harness = Harness::new(fast_settings(), 3);
    harness
        .devices
        .register_device(DeviceSpec::hardware("a", "320x480", "19"));
    harness
        .devices
        .register_device(DeviceSpec::hardware("b", "320x480", "19"));
    let endpoint = healthy_endpoint().await;
    harness.bridge.set_default_endpoint(&endpoint.uri());

    for _ in 0..2 {
        harness
            .sessions
            .create(caps(json!({ "aut": APP_PACKAGE })))
            .await
            .unwrap();
    }
    assert_eq!(harness.sessions.len(), 2);

    assert_eq!(harness.sessions.shutdown_all().await, 2);
    assert!(harness.sessions.is_empty());
    assert_eq!(harness.devices.stats().free, 2);
}
