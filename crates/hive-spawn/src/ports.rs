// ABOUTME: Hands out drone ports from the configured range.
// ABOUTME: Leases are released when dropped, so a dead spawn never pins a port.

use hive_core::{PortRange, ReservedPorts};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct Leases {
    taken: BTreeSet<u16>,
    /// Next port to try, so freed ports are not reused right away
    cursor: u16,
}

#[derive(Debug, Clone)]
pub struct PortAllocator {
    range: PortRange,
    reserved: ReservedPorts,
    leases: Arc<Mutex<Leases>>,
}

impl PortAllocator {
    pub fn new(range: PortRange, reserved: ReservedPorts) -> Self {
        Self {
            range,
            reserved,
            leases: Arc::new(Mutex::new(Leases {
                taken: BTreeSet::new(),
                cursor: range.start,
            })),
        }
    }

    pub fn range(&self) -> PortRange {
        self.range
    }

    /// Lease the next free port, or None when the range is exhausted.
    pub fn lease(&self) -> Option<PortLease> {
        let mut leases = self.leases.lock().ok()?;
        let span = self.range.end.saturating_sub(self.range.start);
        let mut candidate = leases.cursor;
        for _ in 0..span {
            if !self.range.contains(candidate) {
                candidate = self.range.start;
            }
            let free = !self.reserved.contains(candidate) && !leases.taken.contains(&candidate);
            let next = candidate.saturating_add(1);
            if free {
                leases.taken.insert(candidate);
                leases.cursor = next;
                return Some(PortLease {
                    port: candidate,
                    leases: self.leases.clone(),
                });
            }
            candidate = next;
        }
        None
    }

    pub fn leased(&self) -> usize {
        self.leases.lock().map(|l| l.taken.len()).unwrap_or(0)
    }
}

/// One port held by one drone.
#[derive(Debug)]
pub struct PortLease {
    port: u16,
    leases: Arc<Mutex<Leases>>,
}

impl PortLease {
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Drop for PortLease {
    fn drop(&mut self) {
        if let Ok(mut leases) = self.leases.lock() {
            leases.taken.remove(&self.port);
        }
    }
}
