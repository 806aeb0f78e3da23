//! Connection ownership leases.
//!
//! Several client instances may be mounted in one runtime; only the one
//! holding the lease opens a physical connection. Dropping the [`Lease`]
//! releases it, so release always mirrors acquisition. Every release bumps
//! a counter that waiting instances watch, so one of them can take over.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;

struct LeaseSlot {
    holder: Mutex<Option<u64>>,
    next_id: AtomicU64,
    releases: watch::Sender<u64>,
}

impl Default for LeaseSlot {
    fn default() -> Self {
        Self {
            holder: Mutex::new(None),
            next_id: AtomicU64::new(0),
            releases: watch::Sender::new(0),
        }
    }
}

/// Shared token handing out at most one [`Lease`] at a time.
#[derive(Clone, Default)]
pub struct ConnectionLeases {
    slot: Arc<LeaseSlot>,
}

impl ConnectionLeases {
    /// Fresh token with no holder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lease if nobody holds it.
    pub fn try_acquire(&self) -> Option<Lease> {
        let mut holder = self.slot.holder.lock();
        if holder.is_some() {
            return None;
        }
        let id = self.slot.next_id.fetch_add(1, Ordering::Relaxed);
        *holder = Some(id);
        debug!(lease = id, "connection lease acquired");
        Some(Lease {
            slot: self.slot.clone(),
            id,
        })
    }

    /// Whether some instance holds the lease.
    pub fn is_held(&self) -> bool {
        self.slot.holder.lock().is_some()
    }

    /// Changes once per release from now on.
    pub fn releases(&self) -> watch::Receiver<u64> {
        self.slot.releases.subscribe()
    }
}

impl std::fmt::Debug for ConnectionLeases {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionLeases")
            .field("held", &self.is_held())
            .finish()
    }
}

/// Ownership of the runtime's connection. Released on drop.
pub struct Lease {
    slot: Arc<LeaseSlot>,
    id: u64,
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease").field("id", &self.id).finish()
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        let mut holder = self.slot.holder.lock();
        if *holder == Some(self.id) {
            *holder = None;
            drop(holder);
            debug!(lease = self.id, "connection lease released");
            self.slot.releases.send_modify(|n| *n = n.wrapping_add(1));
        }
    }
}
