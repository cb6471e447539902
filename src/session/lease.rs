//! Resource guards for session setup and teardown
//!
//! A session start holds a reserved device and a leased endpoint port.
//! Both are owned by a [`Reservation`]; if the creating future is dropped
//! halfway (client disconnect), the guard schedules the teardown itself.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use crate::device::{DeviceBridge, DeviceHandle, DeviceState, DeviceStore, LaunchRequest};
use crate::ports::PortAllocator;

/// A leased endpoint port, returned on drop
#[derive(Debug)]
pub struct PortLease {
    ports: Arc<PortAllocator>,
    port: u16,
}

impl PortLease {
    pub fn acquire(ports: &Arc<PortAllocator>) -> Option<Self> {
        ports.next().map(|port| Self {
            ports: Arc::clone(ports),
            port,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Drop for PortLease {
    fn drop(&mut self) {
        self.ports.release(self.port);
    }
}

/// How a device leaves a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Normal end of session; the device goes back to Free
    Released,
    /// Setup failed on this device; counts toward Unhealthy
    Failed,
}

/// Everything needed to undo a session start
pub(crate) struct Teardown {
    devices: Arc<DeviceStore>,
    bridge: Arc<dyn DeviceBridge>,
    device: DeviceHandle,
    launch: LaunchRequest,
    port: PortLease,
    booted: bool,
    endpoint_started: bool,
    timeout: Duration,
}

impl Teardown {
    pub fn device(&self) -> &DeviceHandle {
        &self.device
    }

    /// Stop the endpoint, shut down an emulator we booted, then return the
    /// device and ports. Bridge calls are bounded; a call that hangs or
    /// fails is logged and teardown proceeds.
    pub async fn run(self, outcome: Outcome) -> Option<DeviceState> {
        let serial = self.device.serial();

        if self.endpoint_started {
            let stop = self
                .bridge
                .stop_endpoint(&self.device, &self.launch, self.port.port());
            match timeout(self.timeout, stop).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(device = %serial, error = %e, "Stopping endpoint failed"),
                Err(_) => tracing::warn!(device = %serial, "Stopping endpoint timed out"),
            }
        }

        if self.booted {
            match timeout(self.timeout, self.bridge.shutdown(&self.device)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(device = %serial, error = %e, "Emulator shutdown failed"),
                Err(_) => tracing::warn!(device = %serial, "Emulator shutdown timed out"),
            }
        }

        let state = match outcome {
            Outcome::Released => {
                self.devices.release(&self.device);
                self.devices.get(&self.device.id).map(|d| d.state)
            }
            Outcome::Failed => self.devices.record_failure(&self.device),
        };

        // endpoint port goes back when `self.port` drops here
        state
    }

    /// Synchronous fallback when no runtime is available to run the
    /// bridge calls
    fn release_now(self) {
        self.devices.release(&self.device);
    }
}

/// A device reserved for a session that is not active yet
///
/// Dropping an uncommitted reservation releases everything it holds.
pub(crate) struct Reservation {
    device: DeviceHandle,
    port: u16,
    plan: Option<Teardown>,
}

impl Reservation {
    pub fn new(
        devices: Arc<DeviceStore>,
        bridge: Arc<dyn DeviceBridge>,
        device: DeviceHandle,
        launch: LaunchRequest,
        port: PortLease,
        teardown_timeout: Duration,
    ) -> Self {
        Self {
            device: device.clone(),
            port: port.port(),
            plan: Some(Teardown {
                devices,
                bridge,
                device,
                launch,
                port,
                booted: false,
                endpoint_started: false,
                timeout: teardown_timeout,
            }),
        }
    }

    pub fn device(&self) -> &DeviceHandle {
        &self.device
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn mark_booted(&mut self) {
        if let Some(plan) = self.plan.as_mut() {
            plan.booted = true;
        }
    }

    pub fn mark_endpoint_started(&mut self) {
        if let Some(plan) = self.plan.as_mut() {
            plan.endpoint_started = true;
        }
    }

    /// Undo the reservation now and wait for it
    pub async fn abort(mut self, outcome: Outcome) -> Option<DeviceState> {
        match self.plan.take() {
            Some(plan) => plan.run(outcome).await,
            None => None,
        }
    }

    /// Hand the resources over to a live session
    pub fn commit(mut self) -> Option<Teardown> {
        self.plan.take()
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        let Some(plan) = self.plan.take() else {
            return;
        };

        tracing::info!(device = %plan.device.id, "Session start abandoned, releasing device");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(plan.run(Outcome::Released));
            }
            Err(_) => plan.release_now(),
        }
    }
}
