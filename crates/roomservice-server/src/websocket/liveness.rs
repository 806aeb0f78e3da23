//! Heartbeat sweep that evicts silently dead sessions.
//!
//! Each cycle visits every registered session. A session that has not
//! answered the previous probe is terminated; every other session has its
//! alive flag cleared and receives a new probe. A session that never
//! answers is therefore evicted one cycle after its first probe.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::registry::SessionRegistry;
use crate::metrics::WS_LIVENESS_EVICTIONS_TOTAL;

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Sessions that received a probe.
    pub probed: usize,
    /// Sessions terminated for missing a probe or failing to take one.
    pub evicted: usize,
}

/// Why [`LivenessMonitor::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorExit {
    /// The cancellation token fired.
    Cancelled,
}

/// Periodic probe/evict loop over a [`SessionRegistry`].
pub struct LivenessMonitor {
    registry: Arc<SessionRegistry>,
    interval: Duration,
}

impl LivenessMonitor {
    /// Monitor `registry`, sweeping every `interval`.
    pub fn new(registry: Arc<SessionRegistry>, interval: Duration) -> Self {
        Self { registry, interval }
    }

    /// Sweep cadence.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run one cycle over every registered session.
    ///
    /// Failures are handled per session; one bad session never stops the
    /// others from being probed.
    pub async fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();
        for session in self.registry.sessions().await {
            if !session.check_alive() {
                info!(
                    session_id = %session.id,
                    silent_for = ?session.last_pong_elapsed(),
                    "session missed heartbeat, terminating"
                );
                self.evict(&session.id).await;
                report.evicted += 1;
                continue;
            }
            if let Err(e) = session.probe() {
                warn!(session_id = %session.id, error = %e, "heartbeat probe failed, terminating");
                self.evict(&session.id).await;
                report.evicted += 1;
                continue;
            }
            report.probed += 1;
        }
        debug!(probed = report.probed, evicted = report.evicted, "liveness sweep");
        report
    }

    async fn evict(&self, session_id: &roomservice_core::SessionId) {
        if self.registry.terminate(session_id).await {
            counter!(WS_LIVENESS_EVICTIONS_TOTAL).increment(1);
        }
    }

    /// Sweep on every tick until `cancel` fires.
    ///
    /// The first sweep happens one full interval after start.
    pub async fn run(self, cancel: CancellationToken) -> MonitorExit {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        // Skip the immediate first tick
        let _ = ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let _ = self.sweep().await;
                }
                () = cancel.cancelled() => {
                    return MonitorExit::Cancelled;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::session::{Outbound, Session};
    use roomservice_core::{Envelope, SessionId};
    use tokio::sync::mpsc;

    fn make_session(id: &str) -> (Arc<Session>, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(8);
        (Arc::new(Session::new(SessionId::from(id), tx)), rx)
    }

    async fn registry_with(sessions: &[Arc<Session>]) -> Arc<SessionRegistry> {
        let registry = Arc::new(SessionRegistry::new());
        for s in sessions {
            registry.register(s.clone()).await;
        }
        registry
    }

    #[tokio::test]
    async fn alive_session_is_probed() {
        let (s1, mut rx) = make_session("s1");
        let registry = registry_with(&[s1.clone()]).await;
        let monitor = LivenessMonitor::new(registry.clone(), Duration::from_secs(30));

        let report = monitor.sweep().await;
        assert_eq!(report, SweepReport { probed: 1, evicted: 0 });
        assert_eq!(rx.recv().await.unwrap(), Outbound::Probe);
        assert!(!s1.is_alive());
    }

    #[tokio::test]
    async fn silent_session_is_evicted_on_next_cycle() {
        let (s1, mut rx) = make_session("s1");
        let registry = registry_with(&[s1.clone()]).await;
        let monitor = LivenessMonitor::new(registry.clone(), Duration::from_secs(30));

        let _ = monitor.sweep().await;
        assert_eq!(rx.recv().await.unwrap(), Outbound::Probe);

        // no pong
        let report = monitor.sweep().await;
        assert_eq!(report, SweepReport { probed: 0, evicted: 1 });
        assert!(s1.is_terminated());
        assert_eq!(registry.connection_count().await, 0);

        let broadcast = registry.broadcast(&Envelope::connection("late")).await;
        assert_eq!(broadcast.recipients, 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn responsive_session_survives_many_cycles() {
        let (s1, _rx) = make_session("s1");
        let registry = registry_with(&[s1.clone()]).await;
        let monitor = LivenessMonitor::new(registry.clone(), Duration::from_secs(30));

        for _ in 0..5 {
            let report = monitor.sweep().await;
            assert_eq!(report.evicted, 0);
            s1.mark_alive();
        }
        assert!(registry.contains(&s1.id).await);
    }

    #[tokio::test]
    async fn probe_failure_evicts_without_blocking_others() {
        let (broken, broken_rx) = make_session("broken");
        let (healthy, mut healthy_rx) = make_session("healthy");
        drop(broken_rx);
        let registry = registry_with(&[broken.clone(), healthy.clone()]).await;
        let monitor = LivenessMonitor::new(registry.clone(), Duration::from_secs(30));

        let report = monitor.sweep().await;
        assert_eq!(report, SweepReport { probed: 1, evicted: 1 });
        assert!(broken.is_terminated());
        assert!(!healthy.is_terminated());
        assert_eq!(healthy_rx.recv().await.unwrap(), Outbound::Probe);
    }

    #[tokio::test]
    async fn sweep_on_empty_registry() {
        let monitor = LivenessMonitor::new(Arc::new(SessionRegistry::new()), Duration::from_secs(1));
        assert_eq!(monitor.sweep().await, SweepReport::default());
    }

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let monitor = LivenessMonitor::new(Arc::new(SessionRegistry::new()), Duration::from_secs(100));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(monitor.run(cancel.clone()));
        cancel.cancel();
        assert_eq!(handle.await.unwrap(), MonitorExit::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn run_evicts_silent_session_within_two_ticks() {
        let (s1, _rx) = make_session("s1");
        let registry = registry_with(&[s1.clone()]).await;
        let monitor = LivenessMonitor::new(registry.clone(), Duration::from_secs(30));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(monitor.run(cancel.clone()));

        // first tick probes
        time::sleep(Duration::from_secs(31)).await;
        assert!(registry.contains(&s1.id).await);

        // second tick evicts
        time::sleep(Duration::from_secs(30)).await;
        assert!(!registry.contains(&s1.id).await);
        assert!(s1.is_terminated());

        cancel.cancel();
        assert_eq!(handle.await.unwrap(), MonitorExit::Cancelled);
    }
}
