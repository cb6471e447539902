//! Session lifecycle
//!
//! Creation walks `Requested → DeviceAcquired → AppLaunched → Active`; a
//! session id is minted and stored only once the on-device endpoint answers
//! its status probe. Deletion removes the record first, so commands routed
//! to a closing session fail fast, and then tears the device down.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::apps::{AppKey, AppRegistry};
use crate::device::{DeviceBridge, DeviceCriteria, DeviceHandle, DeviceStore, LaunchRequest};
use crate::error::{Error, ErrorCategory, Result};
use crate::metrics;
use crate::ports::PortAllocator;

use super::capabilities::Capabilities;
use super::lease::{Outcome, PortLease, Reservation, Teardown};

// ============================================================================
// Types
// ============================================================================

/// Opaque session identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Requested,
    DeviceAcquired,
    AppLaunched,
    Active,
    Terminating,
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::DeviceAcquired => "device_acquired",
            Self::AppLaunched => "app_launched",
            Self::Active => "active",
            Self::Terminating => "terminating",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a live session
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub capabilities: Capabilities,
    pub app: AppKey,
    /// Device snapshot taken when the session became active
    pub device: DeviceHandle,
    /// Base URL of the on-device endpoint
    pub endpoint: Url,
    /// Local port the endpoint is reachable on
    pub routing_port: u16,
    pub created_at: DateTime<Utc>,
    pub state: SessionState,
}

/// Session timing and retry settings
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Upper bound on waiting for a new endpoint to answer
    pub health_check_timeout: Duration,

    /// Pause between status probes
    pub health_check_interval: Duration,

    /// Upper bound on each teardown call
    pub teardown_timeout: Duration,

    /// Devices tried before a creation gives up
    pub max_device_attempts: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            health_check_timeout: Duration::from_secs(60),
            health_check_interval: Duration::from_millis(500),
            teardown_timeout: Duration::from_secs(10),
            max_device_attempts: 3,
        }
    }
}

struct SessionEntry {
    session: Session,
    state: Mutex<SessionState>,
    teardown: Mutex<Option<Teardown>>,
}

impl SessionEntry {
    fn snapshot(&self) -> Session {
        Session {
            state: *self.state.lock(),
            ..self.session.clone()
        }
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Owner of every live session
pub struct SessionRegistry {
    devices: Arc<DeviceStore>,
    apps: Arc<AppRegistry>,
    bridge: Arc<dyn DeviceBridge>,
    endpoint_ports: Arc<PortAllocator>,
    http: reqwest::Client,
    settings: SessionSettings,
    sessions: RwLock<HashMap<SessionId, Arc<SessionEntry>>>,
}

impl SessionRegistry {
    pub fn new(
        devices: Arc<DeviceStore>,
        apps: Arc<AppRegistry>,
        bridge: Arc<dyn DeviceBridge>,
        endpoint_ports: Arc<PortAllocator>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            devices,
            apps,
            bridge,
            endpoint_ports,
            http: reqwest::Client::new(),
            settings,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn devices(&self) -> &Arc<DeviceStore> {
        &self.devices
    }

    pub fn apps(&self) -> &Arc<AppRegistry> {
        &self.apps
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Start a session for `capabilities`
    ///
    /// The app is resolved before any device is reserved. Devices whose
    /// start fails are released with a recorded failure and the next match
    /// is tried, up to `max_device_attempts` devices.
    pub async fn create(&self, capabilities: Capabilities) -> Result<Session> {
        let started = Instant::now();

        let result = self.create_inner(capabilities).await;
        match &result {
            Ok(session) => {
                metrics::record_session_created(started.elapsed().as_secs_f64());
                metrics::set_active_sessions(self.len());
                tracing::info!(
                    session = %session.id,
                    device = %session.device.serial(),
                    app = %session.app,
                    port = session.routing_port,
                    "Session active"
                );
            }
            Err(e) => {
                metrics::record_session_failure(e.category().as_str());
                tracing::warn!(error = %e, "Session creation failed");
            }
        }
        metrics::update_device_metrics(&self.devices.stats());
        result
    }

    async fn create_inner(&self, capabilities: Capabilities) -> Result<Session> {
        let requested = capabilities.app()?;
        let launch_activity = capabilities.launch_activity();
        let criteria = capabilities.criteria()?;

        let app = self
            .apps
            .resolve(&requested, launch_activity.is_some())
            .ok_or_else(|| Error::UnknownApp(requested.clone()))?;
        let launch = self.launch_request(app, launch_activity);

        tracing::debug!(app = %launch.app, %criteria, "Session requested");

        let mut tried = HashSet::new();
        let mut last_failure = None;

        for attempt in 1..=self.settings.max_device_attempts.max(1) {
            let Some(reservation) = self.reserve(&criteria, &tried, &launch)? else {
                break;
            };
            tried.insert(reservation.device().id.clone());

            tracing::debug!(
                device = %reservation.device().id,
                attempt,
                state = %SessionState::DeviceAcquired,
                "Device reserved"
            );

            match self.activate(reservation, &capabilities, &launch).await {
                Ok(session) => return Ok(session),
                Err(e) if e.category() == ErrorCategory::Device => {
                    last_failure = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_failure.unwrap_or_else(|| Error::NoDeviceAvailable {
            criteria: criteria.to_string(),
        }))
    }

    fn launch_request(&self, app: AppKey, activity: Option<String>) -> LaunchRequest {
        match self.apps.get(&app) {
            Some(descriptor) => LaunchRequest {
                package: descriptor.base_package.clone(),
                activity: activity.or(descriptor.main_activity.clone()),
                binary: Some(descriptor.source_path.clone()),
                app,
            },
            None => LaunchRequest {
                package: app.package().to_string(),
                activity,
                binary: None,
                app,
            },
        }
    }

    /// Reserve a device and an endpoint port together
    fn reserve(
        &self,
        criteria: &DeviceCriteria,
        tried: &HashSet<String>,
        launch: &LaunchRequest,
    ) -> Result<Option<Reservation>> {
        let Some(device) = self.devices.find_matching_excluding(criteria, tried) else {
            return Ok(None);
        };

        let Some(port) = PortLease::acquire(&self.endpoint_ports) else {
            self.devices.release(&device);
            return Err(Error::NoDeviceAvailable {
                criteria: format!("{criteria} (no endpoint port free)"),
            });
        };

        Ok(Some(Reservation::new(
            Arc::clone(&self.devices),
            Arc::clone(&self.bridge),
            device,
            launch.clone(),
            port,
            self.settings.teardown_timeout,
        )))
    }

    /// Bring the reserved device up and register the session
    async fn activate(
        &self,
        mut reservation: Reservation,
        capabilities: &Capabilities,
        launch: &LaunchRequest,
    ) -> Result<Session> {
        let endpoint = match self.start_on_device(&mut reservation, launch).await {
            Ok(endpoint) => endpoint,
            Err(e) => {
                let device = reservation.device().id.clone();
                let state = reservation.abort(Outcome::Failed).await;
                tracing::warn!(%device, error = %e, device_state = ?state, "Device failed during session start");
                return Err(match e {
                    Error::Bridge(b) => Error::device_failure(device, b.to_string()),
                    other => other,
                });
            }
        };

        let device = reservation.device().clone();
        let routing_port = reservation.port();
        self.devices.mark_in_use(&device);

        let session = Session {
            id: SessionId::generate(),
            capabilities: capabilities.clone(),
            app: launch.app.clone(),
            device: self.devices.get(&device.id).unwrap_or(device),
            endpoint,
            routing_port,
            created_at: Utc::now(),
            state: SessionState::Active,
        };

        let entry = Arc::new(SessionEntry {
            session: session.clone(),
            state: Mutex::new(SessionState::Active),
            teardown: Mutex::new(reservation.commit()),
        });
        self.sessions.write().insert(session.id.clone(), entry);

        Ok(session)
    }

    async fn start_on_device(
        &self,
        reservation: &mut Reservation,
        launch: &LaunchRequest,
    ) -> Result<Url> {
        let device = reservation.device().clone();

        if device.provisioned {
            reservation.mark_booted();
            self.bridge.boot(&device).await?;
        }

        if let Some(binary) = &launch.binary {
            self.bridge.install_app(&device, binary).await?;
        }

        reservation.mark_endpoint_started();
        let endpoint = self
            .bridge
            .start_endpoint(&device, launch, reservation.port())
            .await?;
        tracing::debug!(
            device = %device.serial(),
            %endpoint,
            state = %SessionState::AppLaunched,
            "Endpoint started"
        );

        wait_for_endpoint(
            &self.http,
            &endpoint,
            self.settings.health_check_timeout,
            self.settings.health_check_interval,
        )
        .await
        .map_err(|reason| Error::device_failure(device.serial(), reason))?;

        Ok(endpoint)
    }

    /// Snapshot of a live session
    pub fn get(&self, id: &SessionId) -> Option<Session> {
        self.sessions.read().get(id).map(|entry| entry.snapshot())
    }

    /// Endpoint base URL for routing a command
    pub fn endpoint_for(&self, id: &SessionId) -> Result<Url> {
        self.sessions
            .read()
            .get(id)
            .map(|entry| entry.session.endpoint.clone())
            .ok_or_else(|| Error::InvalidSession(id.to_string()))
    }

    /// Every live session, oldest first
    pub fn list(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self
            .sessions
            .read()
            .values()
            .map(|entry| entry.snapshot())
            .collect();
        sessions.sort_by_key(|s| s.created_at);
        sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// End a session
    ///
    /// The record is gone before the device is touched; the device and
    /// ports are released before this returns.
    pub async fn delete(&self, id: &SessionId) -> Result<()> {
        let entry = self
            .sessions
            .write()
            .remove(id)
            .ok_or_else(|| Error::InvalidSession(id.to_string()))?;

        *entry.state.lock() = SessionState::Terminating;
        tracing::info!(session = %id, device = %entry.session.device.serial(), "Session terminating");

        let teardown = entry.teardown.lock().take();
        if let Some(teardown) = teardown {
            // runs to completion even if the caller stops polling
            let task = tokio::spawn(teardown.run(Outcome::Released));
            if let Err(e) = task.await {
                tracing::error!(session = %id, error = %e, "Teardown task failed");
            }
        }

        *entry.state.lock() = SessionState::Closed;
        metrics::set_active_sessions(self.len());
        metrics::update_device_metrics(&self.devices.stats());
        tracing::info!(session = %id, "Session closed");
        Ok(())
    }

    /// Delete every live session concurrently
    pub async fn shutdown_all(&self) -> usize {
        let ids: Vec<SessionId> = self.sessions.read().keys().cloned().collect();
        let count = ids.len();
        if count > 0 {
            tracing::info!(count, "Closing live sessions");
        }

        let deletions = ids.iter().map(|id| self.delete(id));
        futures::future::join_all(deletions).await;
        count
    }
}

/// Poll `{endpoint}/wd/hub/status` until it answers with a success status
pub async fn wait_for_endpoint(
    http: &reqwest::Client,
    endpoint: &Url,
    deadline: Duration,
    interval: Duration,
) -> std::result::Result<(), String> {
    let status_url = endpoint
        .join("wd/hub/status")
        .map_err(|e| format!("invalid endpoint {endpoint}: {e}"))?;

    let probe = async {
        loop {
            match http.get(status_url.clone()).timeout(interval.max(Duration::from_secs(1))).send().await {
                Ok(response) if response.status().is_success() => return,
                Ok(response) => {
                    tracing::trace!(status = %response.status(), url = %status_url, "Endpoint not ready");
                }
                Err(e) => {
                    tracing::trace!(error = %e, url = %status_url, "Endpoint not reachable");
                }
            }
            tokio::time::sleep(interval).await;
        }
    };

    tokio::time::timeout(deadline, probe)
        .await
        .map_err(|_| format!("endpoint {endpoint} did not answer within {deadline:?}"))
}
