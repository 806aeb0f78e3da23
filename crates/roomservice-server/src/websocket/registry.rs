//! Session registry and envelope fan-out.

use std::collections::HashMap;
use std::sync::Arc;

use metrics::counter;
use roomservice_core::{Envelope, SessionId};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::session::Session;
use crate::metrics::{WS_BROADCAST_FAILURES_TOTAL, WS_BROADCASTS_TOTAL};

/// Outcome of one [`SessionRegistry::broadcast`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Sessions registered when the broadcast started.
    pub recipients: usize,
    /// Sessions the frame was queued for.
    pub delivered: usize,
    /// Sessions that failed and were terminated.
    pub failed: Vec<SessionId>,
}

/// Tracks open sessions and delivers envelopes to all of them.
///
/// Delivery is best-effort: a session registering while a broadcast is in
/// flight may or may not receive it.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Add a session.
    pub async fn register(&self, session: Arc<Session>) {
        let mut sessions = self.sessions.write().await;
        let _ = sessions.insert(session.id.clone(), session);
    }

    /// Remove a session. Removing an unknown session is a no-op.
    pub async fn unregister(&self, session_id: &SessionId) -> Option<Arc<Session>> {
        self.sessions.write().await.remove(session_id)
    }

    /// Remove a session and close its connection.
    ///
    /// Safe to call from the liveness sweep, a failed broadcast and the
    /// socket task concurrently; only the first caller finds it registered.
    pub async fn terminate(&self, session_id: &SessionId) -> bool {
        match self.unregister(session_id).await {
            Some(session) => {
                session.terminate();
                true
            }
            None => false,
        }
    }

    /// Serialize `envelope` once and queue it for every open session.
    ///
    /// A session whose send fails is terminated; the remaining sessions
    /// still receive the frame.
    pub async fn broadcast(&self, envelope: &Envelope) -> BroadcastReport {
        let event_type = envelope.kind().map_or("unknown", |k| k.as_str());
        let frame: Arc<str> = match envelope.encode() {
            Ok(json) => Arc::from(json),
            Err(e) => {
                warn!(event_type, error = %e, "failed to serialize envelope");
                return BroadcastReport::default();
            }
        };

        let targets: Vec<Arc<Session>> = self.sessions.read().await.values().cloned().collect();
        let mut report = BroadcastReport {
            recipients: targets.len(),
            ..BroadcastReport::default()
        };
        counter!(WS_BROADCASTS_TOTAL).increment(1);

        for session in &targets {
            if session.is_terminated() {
                continue;
            }
            match session.send(frame.clone()) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(session_id = %session.id, event_type, error = %e, "failed to deliver envelope, terminating session");
                    report.failed.push(session.id.clone());
                }
            }
        }

        for session_id in &report.failed {
            counter!(WS_BROADCAST_FAILURES_TOTAL).increment(1);
            let _ = self.terminate(session_id).await;
        }

        debug!(
            event_type,
            recipients = report.recipients,
            delivered = report.delivered,
            failed = report.failed.len(),
            "broadcast envelope"
        );
        if !report.failed.is_empty() {
            info!(event_type, failed = report.failed.len(), "terminated sessions after failed delivery");
        }
        report
    }

    /// Number of registered sessions.
    pub async fn connection_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Snapshot of the registered sessions.
    pub async fn sessions(&self) -> Vec<Arc<Session>> {
        self.sessions.read().await.values().cloned().collect()
    }

    /// Whether a session is registered.
    pub async fn contains(&self, session_id: &SessionId) -> bool {
        self.sessions.read().await.contains_key(session_id)
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::session::Outbound;
    use roomservice_core::{GuestContact, Order, OrderId, OrderStatus};
    use tokio::sync::mpsc;

    fn make_session(id: &str) -> (Arc<Session>, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(32);
        (Arc::new(Session::new(SessionId::from(id), tx)), rx)
    }

    fn sample_order() -> Order {
        Order {
            id: OrderId::from("ord_1"),
            created_at: chrono::Utc::now(),
            status: OrderStatus::Pending,
            guest: GuestContact {
                room_number: Some("204".into()),
                ..GuestContact::default()
            },
            items: vec![],
            total: 0.0,
            settled: false,
            paid: false,
        }
    }

    fn frame_text(item: Outbound) -> String {
        match item {
            Outbound::Frame(text) => text.to_string(),
            Outbound::Probe => panic!("expected frame, got probe"),
        }
    }

    #[tokio::test]
    async fn register_and_unregister() {
        let registry = SessionRegistry::new();
        let (s1, _rx1) = make_session("s1");
        registry.register(s1).await;
        assert_eq!(registry.connection_count().await, 1);
        assert!(registry.unregister(&SessionId::from("s1")).await.is_some());
        assert_eq!(registry.connection_count().await, 0);
    }

    #[tokio::test]
    async fn unregister_unknown_is_noop() {
        let registry = SessionRegistry::new();
        assert!(registry.unregister(&SessionId::from("nope")).await.is_none());
        assert!(!registry.terminate(&SessionId::from("nope")).await);
        assert_eq!(registry.connection_count().await, 0);
    }

    #[tokio::test]
    async fn terminate_closes_session_once() {
        let registry = SessionRegistry::new();
        let (s1, _rx1) = make_session("s1");
        registry.register(s1.clone()).await;
        assert!(registry.terminate(&s1.id).await);
        assert!(s1.is_terminated());
        assert!(!registry.terminate(&s1.id).await);
    }

    #[tokio::test]
    async fn broadcast_reaches_every_session() {
        let registry = SessionRegistry::new();
        let (s1, mut rx1) = make_session("s1");
        let (s2, mut rx2) = make_session("s2");
        registry.register(s1).await;
        registry.register(s2).await;

        let report = registry
            .broadcast(&Envelope::new_order(sample_order()))
            .await;
        assert_eq!(report.recipients, 2);
        assert_eq!(report.delivered, 2);
        assert!(report.failed.is_empty());

        let text = frame_text(rx1.recv().await.unwrap());
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["type"], "new-order");
        assert_eq!(parsed["order"]["id"], "ord_1");
        assert_eq!(frame_text(rx2.recv().await.unwrap()), text);
    }

    #[tokio::test]
    async fn failing_session_is_isolated_and_terminated() {
        let registry = SessionRegistry::new();
        let (a, mut rx_a) = make_session("a");
        let (b, rx_b) = make_session("b");
        let (c, mut rx_c) = make_session("c");
        drop(rx_b);
        registry.register(a).await;
        registry.register(b.clone()).await;
        registry.register(c).await;

        let report = registry
            .broadcast(&Envelope::order_status_update(sample_order()))
            .await;

        assert_eq!(report.delivered, 2);
        assert_eq!(report.failed, vec![SessionId::from("b")]);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_c.try_recv().is_ok());
        assert!(b.is_terminated());
        assert!(!registry.contains(&SessionId::from("b")).await);
        assert_eq!(registry.connection_count().await, 2);
    }

    #[tokio::test]
    async fn terminated_sessions_are_skipped() {
        let registry = SessionRegistry::new();
        let (s1, mut rx1) = make_session("s1");
        registry.register(s1.clone()).await;
        s1.terminate();

        let report = registry.broadcast(&Envelope::connection("hi")).await;
        assert_eq!(report.delivered, 0);
        assert!(report.failed.is_empty());
        assert!(rx1.try_recv().is_err());
    }

    #[tokio::test]
    async fn unknown_envelope_is_not_sent() {
        let registry = SessionRegistry::new();
        let (s1, mut rx1) = make_session("s1");
        registry.register(s1).await;

        let report = registry.broadcast(&Envelope::Unknown).await;
        assert_eq!(report, BroadcastReport::default());
        assert!(rx1.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_to_empty_registry() {
        let registry = SessionRegistry::default();
        let report = registry.broadcast(&Envelope::connection("hi")).await;
        assert_eq!(report.recipients, 0);
    }

    #[tokio::test]
    async fn register_same_id_overwrites() {
        let registry = SessionRegistry::new();
        let (first, _rx1) = make_session("same");
        let (second, _rx2) = make_session("same");
        registry.register(first).await;
        registry.register(second).await;
        assert_eq!(registry.connection_count().await, 1);
    }
}
