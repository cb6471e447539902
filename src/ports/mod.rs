//! Even-numbered port pool
//!
//! Emulator control channels are addressed by an even base port (the odd
//! neighbour carries adb), so the allocator only ever issues even integers
//! from its configured closed range. The same pool type backs the local
//! ports forwarded to each device's on-device server.

use std::collections::BTreeSet;
use std::ops::RangeInclusive;

use parking_lot::Mutex;
use serde::Serialize;

/// Thread-safe pool of even ports in `[min_port, max_port]`
#[derive(Debug)]
pub struct PortAllocator {
    min_port: u16,
    max_port: u16,
    state: Mutex<PortState>,
}

#[derive(Debug, Default)]
struct PortState {
    available: BTreeSet<u16>,
    leased: BTreeSet<u16>,
}

impl PortAllocator {
    /// Create a pool over the closed range `[min_port, max_port]`
    ///
    /// Odd bounds are tolerated; only the even ports inside the range are
    /// ever issued. An inverted range yields an empty pool.
    pub fn new(min_port: u16, max_port: u16) -> Self {
        let available = if min_port <= max_port {
            (min_port..=max_port).filter(|p| p % 2 == 0).collect()
        } else {
            BTreeSet::new()
        };

        Self {
            min_port,
            max_port,
            state: Mutex::new(PortState {
                available,
                leased: BTreeSet::new(),
            }),
        }
    }

    /// Create a pool from an inclusive range
    pub fn from_range(range: RangeInclusive<u16>) -> Self {
        Self::new(*range.start(), *range.end())
    }

    /// Lease the smallest available port
    ///
    /// Returns `None` when the pool is exhausted. That is an expected
    /// condition and callers decide whether to wait or fail the request.
    pub fn next(&self) -> Option<u16> {
        let mut state = self.state.lock();
        let port = state.available.pop_first()?;
        state.leased.insert(port);
        tracing::trace!(port, "Port leased");
        Some(port)
    }

    /// Return a leased port to the pool
    ///
    /// Out-of-range, odd and not-currently-leased ports are ignored.
    pub fn release(&self, port: u16) {
        if !self.is_issuable(port) {
            return;
        }

        let mut state = self.state.lock();
        if state.leased.remove(&port) {
            state.available.insert(port);
            tracing::trace!(port, "Port released");
        }
    }

    /// Mark a specific port as leased
    ///
    /// Used when an emulator that was started outside the orchestrator is
    /// discovered on a port of this range. Returns `false` if the port is
    /// not issuable or already leased.
    pub fn claim(&self, port: u16) -> bool {
        if !self.is_issuable(port) {
            return false;
        }

        let mut state = self.state.lock();
        if state.available.remove(&port) {
            state.leased.insert(port);
            true
        } else {
            false
        }
    }

    /// Whether the port is even and inside the configured range
    pub fn is_issuable(&self, port: u16) -> bool {
        port % 2 == 0 && port >= self.min_port && port <= self.max_port
    }

    /// Whether the port is currently leased
    pub fn is_leased(&self, port: u16) -> bool {
        self.state.lock().leased.contains(&port)
    }

    /// Number of ports that can still be leased
    pub fn available(&self) -> usize {
        self.state.lock().available.len()
    }

    /// Number of outstanding leases
    pub fn leased(&self) -> usize {
        self.state.lock().leased.len()
    }

    /// Total number of issuable ports
    pub fn capacity(&self) -> usize {
        let state = self.state.lock();
        state.available.len() + state.leased.len()
    }

    /// Snapshot of the pool for diagnostics
    pub fn stats(&self) -> PortStats {
        let state = self.state.lock();
        PortStats {
            min_port: self.min_port,
            max_port: self.max_port,
            available: state.available.len(),
            leased: state.leased.iter().copied().collect(),
        }
    }
}

/// Pool statistics
#[derive(Debug, Clone, Serialize)]
pub struct PortStats {
    pub min_port: u16,
    pub max_port: u16,
    pub available: usize,
    pub leased: Vec<u16>,
}
