//! Inbound envelope dispatch.
//!
//! Every decoded envelope goes to the callbacks registered for its kind and
//! onto the local bus. Alerts are a separate, filtered stream: they decide
//! what the user is shown, not what the application hears. Filtering is
//! advisory; the server sends every event to every session.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use roomservice_core::{Envelope, EventKind, Order, OrderContext};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Local bus capacity. Slow bus subscribers lag rather than block dispatch.
const BUS_CAPACITY: usize = 256;

/// Callback invoked with each envelope of a subscribed kind.
pub type Callback = Arc<dyn Fn(&Envelope) + Send + Sync>;

/// Handle returned by [`Dispatcher::subscribe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Connection status changes worth telling the user about.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionNotice {
    /// A connection opened.
    Connected,
    /// Attempts keep failing. Published once per failure streak.
    Unavailable {
        /// Failed attempts so far in this streak.
        consecutive_failures: u32,
    },
}

/// A user-visible alert that passed the relevance filter.
#[derive(Clone, Debug, PartialEq)]
pub enum Alert {
    /// A new order came in.
    NewOrder(Order),
    /// An order the viewer cares about changed.
    OrderStatusUpdate(Order),
}

/// What travels on the local bus.
#[derive(Clone, Debug, PartialEq)]
pub enum BusEvent {
    /// Every decoded, known envelope.
    Envelope(Envelope),
    /// An envelope that should be surfaced to the user.
    Alert(Alert),
    /// A connection notice.
    Notice(ConnectionNotice),
}

/// Who is watching, for alert relevance.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Audience {
    /// Staff session: sees every order alert.
    pub admin: bool,
    /// Order the guest placed last, if any.
    pub context: Option<OrderContext>,
}

impl Audience {
    /// Staff audience.
    pub fn admin() -> Self {
        Self {
            admin: true,
            context: None,
        }
    }

    /// Guest audience remembering `context`.
    pub fn guest(context: OrderContext) -> Self {
        Self {
            admin: false,
            context: Some(context),
        }
    }

    /// The alert `envelope` produces for this audience, if any.
    pub fn alert_for(&self, envelope: &Envelope) -> Option<Alert> {
        match envelope {
            Envelope::NewOrder { order } if self.admin => Some(Alert::NewOrder(order.clone())),
            Envelope::OrderStatusUpdate { order } => {
                let concerns_me = self.context.as_ref().is_some_and(|c| c.matches(order));
                (self.admin || concerns_me).then(|| Alert::OrderStatusUpdate(order.clone()))
            }
            _ => None,
        }
    }
}

/// Routes inbound frames to callbacks, the bus and the alert stream.
pub struct Dispatcher {
    callbacks: RwLock<HashMap<EventKind, Vec<(SubscriptionId, Callback)>>>,
    next_id: AtomicU64,
    audience: RwLock<Audience>,
    bus: broadcast::Sender<BusEvent>,
}

impl Dispatcher {
    /// Dispatcher surfacing alerts for `audience`.
    pub fn new(audience: Audience) -> Self {
        let (bus, _) = broadcast::channel(BUS_CAPACITY);
        Self {
            callbacks: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            audience: RwLock::new(audience),
            bus,
        }
    }

    /// Call `callback` for every envelope of `kind`.
    pub fn subscribe<F>(&self, kind: EventKind, callback: F) -> SubscriptionId
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.callbacks
            .write()
            .entry(kind)
            .or_default()
            .push((id, Arc::new(callback)));
        id
    }

    /// Remove a callback. Returns whether it was registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut callbacks = self.callbacks.write();
        let mut removed = false;
        for list in callbacks.values_mut() {
            let before = list.len();
            list.retain(|(sid, _)| *sid != id);
            removed |= list.len() != before;
        }
        removed
    }

    /// Receive bus events published from now on.
    pub fn bus(&self) -> broadcast::Receiver<BusEvent> {
        self.bus.subscribe()
    }

    /// Publish on the local bus. Having no listeners is fine.
    pub fn publish(&self, event: BusEvent) {
        let _ = self.bus.send(event);
    }

    /// Replace the remembered order context, e.g. after the guest orders.
    pub fn set_order_context(&self, context: Option<OrderContext>) {
        self.audience.write().context = context;
    }

    /// Current audience.
    pub fn audience(&self) -> Audience {
        self.audience.read().clone()
    }

    /// Publish a connection notice on the bus.
    pub fn notify(&self, notice: ConnectionNotice) {
        debug!(?notice, "connection notice");
        self.publish(BusEvent::Notice(notice));
    }

    /// Decode and dispatch one raw frame.
    ///
    /// Malformed frames and unknown kinds are logged and dropped. Returns
    /// the envelope that was dispatched.
    pub fn dispatch(&self, frame: &[u8]) -> Option<Envelope> {
        let envelope = match Envelope::decode_bytes(frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, len = frame.len(), "dropping malformed frame");
                return None;
            }
        };
        let Some(kind) = envelope.kind() else {
            debug!("ignoring envelope of unknown type");
            return None;
        };
        debug!(event_type = %kind, "dispatching envelope");

        // Clone out so callbacks may subscribe or unsubscribe re-entrantly.
        let targets: Vec<Callback> = self
            .callbacks
            .read()
            .get(&kind)
            .map(|list| list.iter().map(|(_, cb)| cb.clone()).collect())
            .unwrap_or_default();
        for callback in targets {
            callback(&envelope);
        }

        self.publish(BusEvent::Envelope(envelope.clone()));
        if let Some(alert) = self.audience.read().alert_for(&envelope) {
            self.publish(BusEvent::Alert(alert));
        }
        Some(envelope)
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(Audience::default())
    }
}
