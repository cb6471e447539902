//! Orchestrator server implementation
//!
//! Wires the device pool, app catalog, session registry and optional hub
//! registrar together, serves the WebDriver front door, and runs the
//! background tasks until shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::apps::{AppFolderWatcher, AppInspector, AppRegistry};
use crate::config::Config;
use crate::device::{DeviceBridge, DeviceStore};
use crate::hub::{HubClient, HubRegistrar};
use crate::metrics;
use crate::ports::PortAllocator;
use crate::session::SessionRegistry;

use super::api::create_router;
use super::routes::RouteTable;

// ============================================================================
// App State
// ============================================================================

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Live sessions
    pub sessions: Arc<SessionRegistry>,

    /// Device pool
    pub devices: Arc<DeviceStore>,

    /// App catalog
    pub apps: Arc<AppRegistry>,

    /// Local command table
    pub routes: Arc<RouteTable>,

    /// Client used for forwarding
    pub http: reqwest::Client,

    /// Upper bound on one forwarded command
    pub forward_timeout: Duration,

    /// Largest accepted request body
    pub max_body_bytes: usize,

    /// Server start time
    pub start_time: Instant,
}

// ============================================================================
// Orchestrator Server
// ============================================================================

/// Standalone orchestrator server
pub struct OrchestratorServer {
    config: Config,
    state: AppState,
    bridge: Arc<dyn DeviceBridge>,
    inspector: Arc<dyn AppInspector>,
}

impl OrchestratorServer {
    /// Create a new orchestrator server
    ///
    /// Configured emulators are registered immediately; hardware is
    /// discovered when the server starts.
    pub fn new(
        config: Config,
        bridge: Arc<dyn DeviceBridge>,
        inspector: Arc<dyn AppInspector>,
    ) -> Result<Self, ServerError> {
        config
            .validate()
            .map_err(|e| ServerError::ConfigError(e.to_string()))?;

        let emulator_ports = Arc::new(PortAllocator::new(
            config.devices.emulator_port_min,
            config.devices.emulator_port_max,
        ));
        let endpoint_ports = Arc::new(PortAllocator::new(
            config.sessions.endpoint_port_min,
            config.sessions.endpoint_port_max,
        ));

        let devices = Arc::new(DeviceStore::new(
            emulator_ports,
            config.devices.unhealthy_threshold,
        ));
        for emulator in &config.devices.emulators {
            devices.register_device(emulator.to_spec());
        }

        let apps = Arc::new(AppRegistry::new());

        let sessions = Arc::new(SessionRegistry::new(
            Arc::clone(&devices),
            Arc::clone(&apps),
            Arc::clone(&bridge),
            endpoint_ports,
            config.session_settings(),
        ));

        let state = AppState {
            sessions,
            devices,
            apps,
            routes: Arc::new(RouteTable::webdriver()),
            http: reqwest::Client::new(),
            forward_timeout: config.forward_timeout(),
            max_body_bytes: config.server.max_body_bytes,
            start_time: Instant::now(),
        };

        Ok(Self {
            config,
            state,
            bridge,
            inspector,
        })
    }

    /// Get the application state
    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Build the router with all routes
    pub fn build_router(&self) -> Router {
        let mut router = create_router(self.state.clone());

        if self.config.server.enable_cors {
            router = router.layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            );
        }

        if self.config.server.enable_request_logging {
            router = router.layer(TraceLayer::new_for_http());
        }

        router
    }

    /// Register configured apps and discover attached hardware
    pub async fn prepare(&self) -> usize {
        let mut registered = 0;
        for path in &self.config.apps.paths {
            match self.inspector.inspect(path).await {
                Ok(app) => {
                    self.state.apps.register(app);
                    registered += 1;
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping configured app");
                }
            }
        }

        discover_hardware(&self.bridge, &self.state.devices).await;
        metrics::update_device_metrics(&self.state.devices.stats());

        registered
    }

    /// Start with graceful shutdown
    ///
    /// Background tasks stop and every live session is deleted after the
    /// shutdown signal fires.
    pub async fn start_with_shutdown(
        &self,
        shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let addr = self
            .config
            .bind_address()
            .map_err(|e| ServerError::ConfigError(e.to_string()))?;

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindError(e.to_string()))?;

        self.serve(listener, shutdown_signal).await
    }

    /// Serve on an already bound listener
    pub async fn serve(
        &self,
        listener: tokio::net::TcpListener,
        shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let addr = listener
            .local_addr()
            .map_err(|e| ServerError::BindError(e.to_string()))?;
        tracing::info!("Starting orchestrator on {} (with graceful shutdown)", addr);

        self.prepare().await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let tasks = self.start_background_tasks(shutdown_rx).await?;

        let router = self.build_router();
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown_signal.await;
                let _ = shutdown_tx.send(true);
            })
            .await
            .map_err(|e| ServerError::ServeError(e.to_string()));

        let closed = self.state.sessions.shutdown_all().await;
        for task in tasks {
            let _ = task.await;
        }

        tracing::info!(sessions_closed = closed, "Orchestrator shutdown complete");
        result
    }

    /// Start background tasks
    async fn start_background_tasks(
        &self,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Result<Vec<JoinHandle<()>>, ServerError> {
        let mut tasks = Vec::new();

        if let Some(folder) = &self.config.apps.folder {
            let watcher = AppFolderWatcher::new(
                folder.clone(),
                Arc::clone(&self.state.apps),
                Arc::clone(&self.inspector),
            )
            .with_poll_interval(Duration::from_millis(self.config.apps.poll_interval_ms));

            let handle = watcher
                .spawn(shutdown_rx.clone())
                .await
                .map_err(|e| ServerError::InitError(format!("app folder {}: {e}", folder.display())))?;
            tasks.push(tokio::spawn(handle.wait()));
        }

        if let Some(client_config) = self.config.hub_client_config() {
            let client = HubClient::new(client_config)
                .map_err(|e| ServerError::InitError(e.to_string()))?;
            let registrar = Arc::new(HubRegistrar::new(
                client,
                Arc::clone(&self.state.devices),
                Arc::clone(&self.state.apps),
                self.config.registrar_settings(),
            ));
            tasks.push(registrar.spawn(shutdown_rx.clone()));
        }

        if self.config.devices.discovery_interval_secs > 0 {
            tasks.push(spawn_discovery(
                Arc::clone(&self.bridge),
                Arc::clone(&self.state.devices),
                Duration::from_secs(self.config.devices.discovery_interval_secs),
                shutdown_rx.clone(),
            ));
        }

        if let Some(secs) = self.config.devices.recover_unhealthy_after_secs {
            tasks.push(spawn_recovery_sweep(
                Arc::clone(&self.state.devices),
                Duration::from_secs(secs),
                shutdown_rx,
            ));
        }

        tracing::info!(count = tasks.len(), "Background tasks started");
        Ok(tasks)
    }

    /// Get server info
    pub fn info(&self) -> ServerInfo {
        ServerInfo {
            bind_address: self.config.bind_address().ok(),
            node_url: self.config.node_url(),
            devices: self.state.devices.len(),
            emulator_ports: self.state.devices.ports().capacity(),
            hub_url: self.config.hub.url.clone(),
            app_folder: self.config.apps.folder.as_ref().map(|p| p.display().to_string()),
            cors_enabled: self.config.server.enable_cors,
        }
    }
}

async fn discover_hardware(bridge: &Arc<dyn DeviceBridge>, devices: &DeviceStore) {
    match bridge.list_devices().await {
        Ok(found) => {
            let report = devices.sync_hardware(found);
            if !report.added.is_empty() || !report.removed.is_empty() {
                tracing::info!(added = ?report.added, removed = ?report.removed, "Hardware devices changed");
            }
        }
        Err(e) => tracing::warn!(error = %e, "Device discovery failed"),
    }
}

fn spawn_discovery(
    bridge: Arc<dyn DeviceBridge>,
    devices: Arc<DeviceStore>,
    every: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    discover_hardware(&bridge, &devices).await;
                    metrics::update_device_metrics(&devices.stats());
                }
                _ = shutdown_rx.changed() => {
                    tracing::info!("Device discovery shutting down");
                    break;
                }
            }
        }
    })
}

fn spawn_recovery_sweep(
    devices: Arc<DeviceStore>,
    after: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let after_chrono = chrono::Duration::from_std(after).unwrap_or_else(|_| chrono::Duration::days(365));

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(after.clamp(Duration::from_secs(1), Duration::from_secs(60)));

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    devices.recover_stale(after_chrono);
                }
                _ = shutdown_rx.changed() => {
                    tracing::info!("Unhealthy recovery sweep shutting down");
                    break;
                }
            }
        }
    })
}

/// Server information
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub bind_address: Option<SocketAddr>,
    pub node_url: String,
    pub devices: usize,
    pub emulator_ports: usize,
    pub hub_url: Option<String>,
    pub app_folder: Option<String>,
    pub cors_enabled: bool,
}

impl ServerInfo {
    /// Format as display string
    pub fn display(&self) -> String {
        format!(
            "droidpool orchestrator\n\
             {:-<40}\n\
             Bind Address: {}\n\
             Node URL: {}\n\
             Configured Devices: {}\n\
             Emulator Ports: {}\n\
             Hub: {}\n\
             App Folder: {}\n\
             CORS: {}",
            "",
            self.bind_address.map(|a| a.to_string()).unwrap_or_else(|| "invalid".into()),
            self.node_url,
            self.devices,
            self.emulator_ports,
            self.hub_url.as_deref().unwrap_or("none"),
            self.app_folder.as_deref().unwrap_or("none"),
            if self.cors_enabled { "enabled" } else { "disabled" }
        )
    }
}

// ============================================================================
// Server Errors
// ============================================================================

/// Server errors
#[derive(Debug, Clone)]
pub enum ServerError {
    /// Configuration error
    ConfigError(String),

    /// Initialization error
    InitError(String),

    /// Failed to bind to address
    BindError(String),

    /// Server error
    ServeError(String),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            Self::InitError(msg) => write!(f, "Initialization error: {}", msg),
            Self::BindError(msg) => write!(f, "Failed to bind: {}", msg),
            Self::ServeError(msg) => write!(f, "Server error: {}", msg),
        }
    }
}

impl std::error::Error for ServerError {}
