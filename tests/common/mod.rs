//! Common test utilities

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use droidpool::apps::{AppDescriptor, AppRegistry};
use droidpool::device::{BridgeError, DeviceBridge, DeviceHandle, DeviceSpec, DeviceStore, LaunchRequest};
use droidpool::ports::PortAllocator;
use droidpool::server::{AppState, RouteTable};
use droidpool::session::{SessionRegistry, SessionSettings};

pub const APP_PACKAGE: &str = "io.example.calculator";
pub const APP_VERSION: &str = "1.0";

/// Bridge that records calls and hands out preconfigured endpoints
#[derive(Default)]
pub struct FakeBridge {
    pub hardware: Mutex<Vec<DeviceSpec>>,
    endpoints: Mutex<HashMap<String, Url>>,
    default_endpoint: Mutex<Option<Url>>,
    failing: Mutex<HashSet<String>>,
    stop_delay: Mutex<Option<Duration>>,
    pub boots: AtomicUsize,
    pub installs: AtomicUsize,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub shutdowns: AtomicUsize,
}

impl FakeBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Endpoint returned for every device without its own
    pub fn set_default_endpoint(&self, url: &str) {
        *self.default_endpoint.lock() = Some(Url::parse(url).unwrap());
    }

    /// Endpoint returned for one device
    pub fn set_endpoint(&self, device_id: &str, url: &str) {
        self.endpoints
            .lock()
            .insert(device_id.to_string(), Url::parse(url).unwrap());
    }

    /// Make `start_endpoint` fail for one device
    pub fn fail_device(&self, device_id: &str) {
        self.failing.lock().insert(device_id.to_string());
    }

    /// Make `stop_endpoint` take this long before answering
    pub fn set_stop_delay(&self, delay: Duration) {
        *self.stop_delay.lock() = Some(delay);
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceBridge for FakeBridge {
    async fn list_devices(&self) -> Result<Vec<DeviceSpec>, BridgeError> {
        Ok(self.hardware.lock().clone())
    }

    async fn boot(&self, _device: &DeviceHandle) -> Result<(), BridgeError> {
        self.boots.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn install_app(&self, _device: &DeviceHandle, _binary: &Path) -> Result<(), BridgeError> {
        self.installs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn start_endpoint(
        &self,
        device: &DeviceHandle,
        _launch: &LaunchRequest,
        _local_port: u16,
    ) -> Result<Url, BridgeError> {
        self.starts.fetch_add(1, Ordering::SeqCst);

        if self.failing.lock().contains(&device.id) {
            return Err(BridgeError::CommandFailed {
                device: device.serial(),
                command: "am instrument".to_string(),
                stderr: "INSTRUMENTATION_FAILED".to_string(),
            });
        }

        let url = self
            .endpoints
            .lock()
            .get(&device.id)
            .cloned()
            .or_else(|| self.default_endpoint.lock().clone());
        url.ok_or_else(|| BridgeError::InvalidEndpoint(format!("no endpoint for {}", device.id)))
    }

    async fn stop_endpoint(
        &self,
        _device: &DeviceHandle,
        _launch: &LaunchRequest,
        _local_port: u16,
    ) -> Result<(), BridgeError> {
        let delay = *self.stop_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn shutdown(&self, _device: &DeviceHandle) -> Result<(), BridgeError> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A wired-up session registry over a fake bridge
pub struct Harness {
    pub devices: Arc<DeviceStore>,
    pub apps: Arc<AppRegistry>,
    pub bridge: Arc<FakeBridge>,
    pub endpoint_ports: Arc<PortAllocator>,
    pub sessions: Arc<SessionRegistry>,
}

impl Harness {
    pub fn new(settings: SessionSettings, unhealthy_threshold: u32) -> Self {
        let devices = Arc::new(DeviceStore::new(
            Arc::new(PortAllocator::new(5554, 5584)),
            unhealthy_threshold,
        ));
        let apps = Arc::new(AppRegistry::new());
        apps.register(AppDescriptor::new(
            APP_PACKAGE,
            APP_VERSION,
            "/apps/calculator.apk",
        ));

        let bridge = Arc::new(FakeBridge::new());
        let endpoint_ports = Arc::new(PortAllocator::new(38080, 38180));
        let sessions = Arc::new(SessionRegistry::new(
            Arc::clone(&devices),
            Arc::clone(&apps),
            bridge.clone(),
            Arc::clone(&endpoint_ports),
            settings,
        ));

        Self {
            devices,
            apps,
            bridge,
            endpoint_ports,
            sessions,
        }
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            sessions: Arc::clone(&self.sessions),
            devices: Arc::clone(&self.devices),
            apps: Arc::clone(&self.apps),
            routes: Arc::new(RouteTable::webdriver()),
            http: reqwest::Client::new(),
            forward_timeout: Duration::from_secs(5),
            max_body_bytes: 1024 * 1024,
            start_time: Instant::now(),
        }
    }
}

/// Settings with short timings for tests
pub fn fast_settings() -> SessionSettings {
    SessionSettings {
        health_check_timeout: Duration::from_millis(500),
        health_check_interval: Duration::from_millis(20),
        teardown_timeout: Duration::from_secs(1),
        max_device_attempts: 3,
    }
}

/// Device endpoint that answers status probes
pub async fn healthy_endpoint() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/wd/hub/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": 0,
            "value": { "ready": true }
        })))
        .mount(&server)
        .await;
    server
}

/// URL of a local port with nothing listening on it
pub fn dead_endpoint() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{port}/")
}
