//! Background advertiser to the hub
//!
//! Each tick either registers (when not known to be registered) or asks the
//! hub whether it still knows this node. Hub restarts lose registrations,
//! so a "no" from the check triggers registration again. Nothing here is
//! ever fatal; failures wait for the next tick.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use tokio::sync::watch;
use tokio::time::interval;

use crate::apps::AppRegistry;
use crate::device::{DeviceState, DeviceStore};
use crate::metrics;

use super::client::{HubClient, RegistrationRequest, REGISTRATION_CLASS};

/// Registration state as last observed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrarState {
    Unregistered,
    Registering,
    Registered,
}

/// Node identity advertised to the hub
#[derive(Debug, Clone)]
pub struct RegistrarSettings {
    /// Address clients and the hub use to reach this orchestrator
    pub node_url: String,

    /// Interval between ticks
    pub tick_interval: Duration,

    /// Hub-side proxy class handling this node
    pub proxy_class: String,

    /// Browser name advertised per capability
    pub browser_name: String,
}

impl RegistrarSettings {
    pub fn new(node_url: impl Into<String>) -> Self {
        Self {
            node_url: node_url.into().trim_end_matches('/').to_string(),
            tick_interval: Duration::from_secs(30),
            proxy_class: "io.selendroid.grid.SelendroidSessionProxy".to_string(),
            browser_name: "selendroid".to_string(),
        }
    }
}

/// Keeps this node registered with the hub
pub struct HubRegistrar {
    client: HubClient,
    devices: Arc<DeviceStore>,
    apps: Arc<AppRegistry>,
    settings: RegistrarSettings,
    state: Mutex<RegistrarState>,
}

impl HubRegistrar {
    pub fn new(
        client: HubClient,
        devices: Arc<DeviceStore>,
        apps: Arc<AppRegistry>,
        settings: RegistrarSettings,
    ) -> Self {
        Self {
            client,
            devices,
            apps,
            settings,
            state: Mutex::new(RegistrarState::Unregistered),
        }
    }

    pub fn state(&self) -> RegistrarState {
        *self.state.lock()
    }

    fn set_state(&self, state: RegistrarState) {
        *self.state.lock() = state;
    }

    /// Run one registration cycle
    pub async fn tick(&self) -> RegistrarState {
        if self.state() == RegistrarState::Registered {
            match self.client.is_registered(&self.settings.node_url).await {
                Ok(true) => {
                    tracing::debug!(hub = %self.client.hub_url(), "Still registered with hub");
                    return RegistrarState::Registered;
                }
                Ok(false) => {
                    tracing::info!(hub = %self.client.hub_url(), "Hub no longer knows this node");
                }
                Err(e) => {
                    tracing::warn!(hub = %self.client.hub_url(), error = %e, "Hub registration check failed");
                }
            }
            self.set_state(RegistrarState::Unregistered);
        }

        self.register().await
    }

    async fn register(&self) -> RegistrarState {
        self.set_state(RegistrarState::Registering);
        let document = self.registration_document();

        let state = match self.client.register(&document).await {
            Ok(()) => {
                tracing::info!(
                    hub = %self.client.hub_url(),
                    node = %self.settings.node_url,
                    capabilities = document.capabilities.len(),
                    "Registered with hub"
                );
                metrics::record_hub_registration(true);
                RegistrarState::Registered
            }
            Err(e) => {
                tracing::warn!(hub = %self.client.hub_url(), error = %e, "Hub registration failed, retrying next tick");
                metrics::record_hub_registration(false);
                RegistrarState::Unregistered
            }
        };

        self.set_state(state);
        state
    }

    /// Build the registration document from the current pool and catalog
    ///
    /// One capability per usable device and catalogued app; a device is
    /// advertised without an app when the catalog is empty.
    pub fn registration_document(&self) -> RegistrationRequest {
        let devices: Vec<_> = self
            .devices
            .snapshot()
            .into_iter()
            .filter(|d| d.state != DeviceState::Unhealthy)
            .collect();
        let apps = self.apps.keys();

        let mut capabilities = Vec::new();
        for device in &devices {
            let base = json!({
                "browserName": self.settings.browser_name,
                "platform": "ANDROID",
                "maxInstances": 1,
                "emulator": device.is_emulator,
                "screenSize": device.screen_size,
                "platformVersion": device.platform_version,
                "locale": device.locale,
            });

            if apps.is_empty() {
                capabilities.push(base);
                continue;
            }
            for app in &apps {
                let mut capability = base.clone();
                capability["aut"] = Value::String(app.to_string());
                capabilities.push(capability);
            }
        }

        let (host, port) = split_node_url(&self.settings.node_url);
        let mut configuration = Map::new();
        configuration.insert("url".into(), json!(self.settings.node_url));
        configuration.insert("remoteHost".into(), json!(self.settings.node_url));
        configuration.insert("host".into(), json!(host));
        configuration.insert("port".into(), json!(port));
        configuration.insert("maxSession".into(), json!(devices.len()));
        configuration.insert("register".into(), json!(true));
        configuration.insert(
            "registerCycle".into(),
            json!(self.settings.tick_interval.as_millis() as u64),
        );
        configuration.insert("proxy".into(), json!(self.settings.proxy_class));
        configuration.insert("role".into(), json!("node"));

        RegistrationRequest {
            class: REGISTRATION_CLASS.to_string(),
            capabilities,
            configuration,
        }
    }

    /// Tick on an interval until shutdown is signalled
    pub fn spawn(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.settings.tick_interval);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.tick().await;
                    }
                    _ = shutdown_rx.changed() => {
                        tracing::info!("Hub registrar shutting down");
                        break;
                    }
                }
            }
        })
    }
}

fn split_node_url(node_url: &str) -> (String, Option<u16>) {
    match url::Url::parse(node_url) {
        Ok(url) => (
            url.host_str().unwrap_or_default().to_string(),
            url.port_or_known_default(),
        ),
        Err(_) => (node_url.to_string(), None),
    }
}
