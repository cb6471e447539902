//! Device pool
//!
//! All occupancy changes go through this store behind a single lock, so the
//! search for a Free device and its reservation happen in one critical
//! section and two requests can never pick the same device.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;

use crate::ports::PortAllocator;

use super::handle::{DeviceCriteria, DeviceHandle, DeviceSpec, DeviceState};

/// Pool of hardware devices and emulator templates
pub struct DeviceStore {
    /// Devices in discovery order
    devices: Mutex<Vec<DeviceHandle>>,

    /// Emulator control ports
    ports: Arc<PortAllocator>,

    /// Consecutive failures before a device turns Unhealthy
    unhealthy_threshold: u32,
}

impl DeviceStore {
    /// Create an empty store
    pub fn new(ports: Arc<PortAllocator>, unhealthy_threshold: u32) -> Self {
        Self {
            devices: Mutex::new(Vec::new()),
            ports,
            unhealthy_threshold: unhealthy_threshold.max(1),
        }
    }

    /// Register a device, or refresh the attributes of a known one
    pub fn register_device(&self, spec: DeviceSpec) -> DeviceHandle {
        let mut devices = self.devices.lock();

        if let Some(existing) = devices.iter_mut().find(|d| d.id == spec.id) {
            existing.update_from(&spec);
            return existing.clone();
        }

        if let (true, Some(port)) = (spec.emulator, spec.control_port) {
            if !self.ports.claim(port) {
                tracing::warn!(device = %spec.id, port, "Running emulator port is outside the pool or already leased");
            }
        }

        let handle = DeviceHandle::from_spec(spec);
        tracing::info!(
            device = %handle.id,
            emulator = handle.is_emulator,
            screen_size = %handle.screen_size,
            platform_version = %handle.platform_version,
            "Device registered"
        );
        devices.push(handle.clone());
        handle
    }

    /// Reserve the first Free device matching `criteria`
    pub fn find_matching(&self, criteria: &DeviceCriteria) -> Option<DeviceHandle> {
        self.find_matching_excluding(criteria, &HashSet::new())
    }

    /// Reserve the first Free device matching `criteria`, skipping `exclude`
    ///
    /// Hardware is searched first in discovery order. Emulators follow; an
    /// emulator without a control port is provisioned with the smallest
    /// free port. Returns `None` when nothing matches or no port is left.
    pub fn find_matching_excluding(
        &self,
        criteria: &DeviceCriteria,
        exclude: &HashSet<String>,
    ) -> Option<DeviceHandle> {
        let mut devices = self.devices.lock();

        let candidate = |d: &DeviceHandle| {
            d.state == DeviceState::Free && !exclude.contains(&d.id) && criteria.matches(d)
        };

        if criteria.allows_hardware() {
            if let Some(device) = devices.iter_mut().find(|d| !d.is_emulator && candidate(d)) {
                device.state = DeviceState::Reserved;
                tracing::debug!(device = %device.id, %criteria, "Hardware device reserved");
                return Some(device.clone());
            }
        }

        if !criteria.allows_emulator() {
            return None;
        }

        for device in devices.iter_mut().filter(|d| d.is_emulator) {
            if !candidate(device) {
                continue;
            }

            if device.needs_provisioning() {
                let Some(port) = self.ports.next() else {
                    tracing::info!(device = %device.id, "No emulator port available");
                    continue;
                };
                device.control_port = Some(port);
                device.provisioned = true;
            }

            device.state = DeviceState::Reserved;
            tracing::debug!(
                device = %device.id,
                port = ?device.control_port,
                %criteria,
                "Emulator reserved"
            );
            return Some(device.clone());
        }

        None
    }

    /// Promote a reserved device once its endpoint answered
    pub fn mark_in_use(&self, handle: &DeviceHandle) -> bool {
        let mut devices = self.devices.lock();
        match devices.iter_mut().find(|d| d.id == handle.id) {
            Some(device) if device.state == DeviceState::Reserved => {
                device.state = DeviceState::InUse;
                device.consecutive_failures = 0;
                true
            }
            _ => false,
        }
    }

    /// Return a reserved or in-use device to the pool
    ///
    /// Emulator ports leased by the store go back to the allocator. Calling
    /// this on a Free or Unhealthy device changes nothing.
    pub fn release(&self, handle: &DeviceHandle) -> bool {
        let mut devices = self.devices.lock();
        let Some(device) = devices.iter_mut().find(|d| d.id == handle.id) else {
            return false;
        };

        if !device.state.is_busy() {
            return false;
        }

        self.return_port(device);
        device.state = DeviceState::Free;
        tracing::debug!(device = %device.id, "Device released");
        true
    }

    /// Release after a failed session start and count the failure
    ///
    /// The device turns Unhealthy once the consecutive failure count reaches
    /// the threshold; otherwise it is Free again.
    pub fn record_failure(&self, handle: &DeviceHandle) -> Option<DeviceState> {
        let mut devices = self.devices.lock();
        let device = devices.iter_mut().find(|d| d.id == handle.id)?;

        self.return_port(device);
        device.consecutive_failures += 1;
        device.last_failure_at = Some(Utc::now());

        if device.consecutive_failures >= self.unhealthy_threshold {
            device.state = DeviceState::Unhealthy;
            tracing::warn!(
                device = %device.id,
                failures = device.consecutive_failures,
                "Device marked unhealthy"
            );
        } else if device.state != DeviceState::Unhealthy {
            device.state = DeviceState::Free;
        }

        Some(device.state)
    }

    /// Exclude an idle device from matching, keeping its record for
    /// diagnostics
    ///
    /// Busy devices are refused: their emulator still runs on its control
    /// port until the session lets go.
    pub fn mark_unhealthy(&self, handle: &DeviceHandle) -> bool {
        let mut devices = self.devices.lock();
        let Some(device) = devices.iter_mut().find(|d| d.id == handle.id) else {
            return false;
        };

        if device.state.is_busy() {
            tracing::debug!(device = %device.id, state = %device.state, "Not marking busy device unhealthy");
            return false;
        }

        self.return_port(device);
        device.state = DeviceState::Unhealthy;
        device.last_failure_at = Some(Utc::now());
        tracing::warn!(device = %device.id, "Device marked unhealthy");
        true
    }

    /// Operator action: put an Unhealthy device back into the pool
    pub fn recover(&self, id: &str) -> bool {
        let mut devices = self.devices.lock();
        match devices.iter_mut().find(|d| d.id == id) {
            Some(device) if device.state == DeviceState::Unhealthy => {
                device.state = DeviceState::Free;
                device.consecutive_failures = 0;
                tracing::info!(device = %device.id, "Device recovered");
                true
            }
            _ => false,
        }
    }

    /// Recover every device that has been Unhealthy for at least `after`
    pub fn recover_stale(&self, after: chrono::Duration) -> Vec<String> {
        let now = Utc::now();
        let mut devices = self.devices.lock();
        let mut recovered = Vec::new();

        for device in devices.iter_mut() {
            if device.state != DeviceState::Unhealthy {
                continue;
            }
            let stale = device
                .last_failure_at
                .map(|at| now - at >= after)
                .unwrap_or(true);
            if stale {
                device.state = DeviceState::Free;
                device.consecutive_failures = 0;
                recovered.push(device.id.clone());
            }
        }

        if !recovered.is_empty() {
            tracing::info!(devices = ?recovered, "Unhealthy devices returned to the pool");
        }
        recovered
    }

    /// Forget a device that is not serving a session
    pub fn remove_device(&self, id: &str) -> Option<DeviceHandle> {
        let mut devices = self.devices.lock();
        let index = devices.iter().position(|d| d.id == id)?;

        if devices[index].state.is_busy() {
            tracing::debug!(device = %id, "Not removing busy device");
            return None;
        }

        let device = devices.remove(index);
        if let Some(port) = device.control_port {
            self.ports.release(port);
        }
        tracing::info!(device = %id, "Device removed");
        Some(device)
    }

    /// Align hardware devices with what discovery currently sees
    ///
    /// New serials are registered; hardware that disappeared is removed when
    /// idle. Emulators are configured rather than discovered and are left
    /// alone.
    pub fn sync_hardware(&self, discovered: Vec<DeviceSpec>) -> SyncReport {
        let seen: HashSet<String> = discovered.iter().map(|d| d.id.clone()).collect();
        let mut report = SyncReport::default();

        for spec in discovered.into_iter().filter(|d| !d.emulator) {
            if self.get(&spec.id).is_none() {
                report.added.push(spec.id.clone());
            }
            self.register_device(spec);
        }

        let gone: Vec<String> = self
            .devices
            .lock()
            .iter()
            .filter(|d| !d.is_emulator && !seen.contains(&d.id))
            .map(|d| d.id.clone())
            .collect();

        for id in gone {
            if self.remove_device(&id).is_some() {
                report.removed.push(id);
            }
        }

        report
    }

    /// Snapshot of one device
    pub fn get(&self, id: &str) -> Option<DeviceHandle> {
        self.devices.lock().iter().find(|d| d.id == id).cloned()
    }

    /// Snapshot of every device in discovery order
    pub fn snapshot(&self) -> Vec<DeviceHandle> {
        self.devices.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.devices.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.lock().is_empty()
    }

    /// Counts per state
    pub fn stats(&self) -> DeviceStats {
        let devices = self.devices.lock();
        let mut stats = DeviceStats {
            total: devices.len(),
            ..Default::default()
        };

        for device in devices.iter() {
            match device.state {
                DeviceState::Free => stats.free += 1,
                DeviceState::Reserved => stats.reserved += 1,
                DeviceState::InUse => stats.in_use += 1,
                DeviceState::Unhealthy => stats.unhealthy += 1,
            }
            if device.is_emulator {
                stats.emulators += 1;
            }
        }

        stats.free_ports = self.ports.available();
        stats
    }

    pub fn ports(&self) -> &Arc<PortAllocator> {
        &self.ports
    }

    fn return_port(&self, device: &mut DeviceHandle) {
        if !device.provisioned {
            return;
        }
        if let Some(port) = device.control_port.take() {
            self.ports.release(port);
        }
        device.provisioned = false;
    }
}

/// Device counts per state
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeviceStats {
    pub total: usize,
    pub free: usize,
    pub reserved: usize,
    pub in_use: usize,
    pub unhealthy: usize,
    pub emulators: usize,
    pub free_ports: usize,
}

/// Outcome of a hardware discovery pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}
