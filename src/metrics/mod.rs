//! Prometheus metrics for the orchestrator
//!
//! This module tracks:
//! - Sessions: creations, failures by reason, live count, setup duration
//! - Devices: pool occupancy by state, free emulator ports
//! - Routing: forwarded commands by response status
//! - Hub: registration attempts by result
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.

use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_gauge_vec,
    register_histogram, Counter, CounterVec, Encoder, Gauge, GaugeVec, Histogram, TextEncoder,
};
use std::sync::OnceLock;

use crate::device::DeviceStats;

// ============================================================================
// Metrics Storage
// ============================================================================

/// Container for all orchestrator metrics
struct OrchestratorMetrics {
    sessions_created: Counter,
    session_failures: CounterVec,
    active_sessions: Gauge,
    session_setup_duration: Histogram,
    devices: GaugeVec,
    free_emulator_ports: Gauge,
    forwarded_requests: CounterVec,
    hub_registrations: CounterVec,
}

/// Global storage for orchestrator metrics
static METRICS: OnceLock<OrchestratorMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// Safe to call more than once. If registration fails the error is
/// returned and every recording function stays a no-op.
///
/// ```ignore
/// if let Err(e) = droidpool::metrics::init_metrics() {
///     tracing::warn!("Metrics initialization failed: {e}");
/// }
/// ```
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let metrics = OrchestratorMetrics {
        sessions_created: register_counter!(
            "droidpool_sessions_created_total",
            "Total sessions that reached the active state"
        )?,
        session_failures: register_counter_vec!(
            "droidpool_session_failures_total",
            "Total failed session creations by reason",
            &["reason"]
        )?,
        active_sessions: register_gauge!(
            "droidpool_active_sessions",
            "Number of live sessions"
        )?,
        session_setup_duration: register_histogram!(
            "droidpool_session_setup_duration_seconds",
            "Time from session request to healthy endpoint",
            vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]
        )?,
        devices: register_gauge_vec!(
            "droidpool_devices",
            "Devices in the pool by state",
            &["state"]
        )?,
        free_emulator_ports: register_gauge!(
            "droidpool_free_emulator_ports",
            "Emulator control ports left in the pool"
        )?,
        forwarded_requests: register_counter_vec!(
            "droidpool_forwarded_requests_total",
            "Commands forwarded to device endpoints by response status",
            &["status"]
        )?,
        hub_registrations: register_counter_vec!(
            "droidpool_hub_registrations_total",
            "Hub registration attempts by result",
            &["result"]
        )?,
    };

    METRICS
        .set(metrics)
        .map_err(|_| "Orchestrator metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    METRICS.get().is_some()
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Record a session that became active
pub fn record_session_created(setup_secs: f64) {
    if let Some(m) = METRICS.get() {
        m.sessions_created.inc();
        m.session_setup_duration.observe(setup_secs);
    }
}

/// Record a failed session creation
pub fn record_session_failure(reason: &str) {
    if let Some(m) = METRICS.get() {
        m.session_failures.with_label_values(&[reason]).inc();
    }
}

/// Update the live session gauge
pub fn set_active_sessions(count: usize) {
    if let Some(m) = METRICS.get() {
        m.active_sessions.set(count as f64);
    }
}

/// Update device pool gauges
pub fn update_device_metrics(stats: &DeviceStats) {
    let Some(m) = METRICS.get() else {
        return;
    };

    m.devices.with_label_values(&["free"]).set(stats.free as f64);
    m.devices.with_label_values(&["reserved"]).set(stats.reserved as f64);
    m.devices.with_label_values(&["inuse"]).set(stats.in_use as f64);
    m.devices.with_label_values(&["unhealthy"]).set(stats.unhealthy as f64);
    m.free_emulator_ports.set(stats.free_ports as f64);
}

/// Record a forwarded command
pub fn record_forwarded_request(status: u16) {
    if let Some(m) = METRICS.get() {
        let status_str = status.to_string();
        m.forwarded_requests.with_label_values(&[&status_str]).inc();
    }
}

/// Record a hub registration attempt
pub fn record_hub_registration(success: bool) {
    if let Some(m) = METRICS.get() {
        let result = if success { "success" } else { "failure" };
        m.hub_registrations.with_label_values(&[result]).inc();
    }
}

// ============================================================================
// Tests
// ============================================================================
