//! Per-runtime notification channel.
//!
//! Every client instance mounted in one runtime shares a
//! [`NotificationChannel`]: the connection lease, the dispatcher with its
//! callbacks and bus, the reported connection state, and the outbox of the
//! live link. Only the lease holder writes the state and outbox; every
//! instance reads them.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use crate::dispatch::{Audience, Dispatcher};
use crate::errors::ClientError;
use crate::lease::ConnectionLeases;
use crate::machine::ReadyState;

struct Shared {
    leases: ConnectionLeases,
    dispatcher: Arc<Dispatcher>,
    state: watch::Sender<ReadyState>,
    outbox: Mutex<Option<mpsc::Sender<String>>>,
}

/// Runtime-wide context handed to every mounted client.
#[derive(Clone)]
pub struct NotificationChannel {
    shared: Arc<Shared>,
}

impl NotificationChannel {
    /// A channel surfacing alerts for `audience`.
    pub fn new(audience: Audience) -> Self {
        Self {
            shared: Arc::new(Shared {
                leases: ConnectionLeases::new(),
                dispatcher: Arc::new(Dispatcher::new(audience)),
                state: watch::Sender::new(ReadyState::Closed),
                outbox: Mutex::new(None),
            }),
        }
    }

    /// The connection lease.
    pub fn leases(&self) -> &ConnectionLeases {
        &self.shared.leases
    }

    /// The shared dispatcher.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.shared.dispatcher
    }

    /// State of the runtime's connection.
    pub fn state(&self) -> ReadyState {
        *self.shared.state.borrow()
    }

    /// Watch the runtime's connection state.
    pub fn watch_state(&self) -> watch::Receiver<ReadyState> {
        self.shared.state.subscribe()
    }

    pub(crate) fn set_state(&self, state: ReadyState) {
        let _ = self.shared.state.send_replace(state);
    }

    pub(crate) fn attach_outbox(&self, outbox: mpsc::Sender<String>) {
        *self.shared.outbox.lock() = Some(outbox);
    }

    /// Clear the outbox if it still points at `outbox`'s link.
    pub(crate) fn detach_outbox(&self, outbox: &mpsc::Sender<String>) {
        let mut current = self.shared.outbox.lock();
        if current.as_ref().is_some_and(|c| c.same_channel(outbox)) {
            *current = None;
        }
    }

    /// Queue a text frame on the live link.
    pub fn send(&self, text: String) -> Result<(), ClientError> {
        if self.state() != ReadyState::Open {
            return Err(ClientError::NotConnected);
        }
        let outbox = self.shared.outbox.lock().clone();
        match outbox {
            Some(outbox) => outbox.try_send(text).map_err(|_| ClientError::NotConnected),
            None => Err(ClientError::NotConnected),
        }
    }
}

impl std::fmt::Debug for NotificationChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationChannel")
            .field("leases", &self.shared.leases)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Link;

    #[test]
    fn send_needs_open_state_and_outbox() {
        let channel = NotificationChannel::new(Audience::admin());
        assert_eq!(channel.send("x".into()), Err(ClientError::NotConnected));

        let (link, _peer) = Link::pair();
        channel.attach_outbox(link.outbox());
        assert_eq!(channel.send("x".into()), Err(ClientError::NotConnected));

        channel.set_state(ReadyState::Open);
        assert_eq!(channel.send("x".into()), Ok(()));
    }

    #[test]
    fn stale_link_does_not_clear_newer_outbox() {
        let channel = NotificationChannel::new(Audience::admin());
        channel.set_state(ReadyState::Open);
        let (old, _old_peer) = Link::pair();
        let (new, _new_peer) = Link::pair();
        channel.attach_outbox(new.outbox());

        channel.detach_outbox(&old.outbox());
        assert_eq!(channel.send("still here".into()), Ok(()));

        channel.detach_outbox(&new.outbox());
        assert_eq!(channel.send("gone".into()), Err(ClientError::NotConnected));
    }

    #[test]
    fn clones_share_state() {
        let channel = NotificationChannel::new(Audience::admin());
        let other = channel.clone();
        channel.set_state(ReadyState::Connecting);
        assert_eq!(other.state(), ReadyState::Connecting);
        let _lease = channel.leases().try_acquire().unwrap();
        assert!(other.leases().is_held());
    }
}
