//! Connection manager actor and its handle.
//!
//! One task per mounted instance owns a [`ConnectionMachine`], its link and
//! its single retry timer. [`NotificationClient`] is a cloneable handle that
//! talks to it over a channel. Callbacks, the bus, the connection state and
//! the send path live on the [`NotificationChannel`] every instance shares,
//! so a surface whose instance does not own the connection still sees the
//! owner's traffic. When the owner unmounts, a waiting instance takes over.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use roomservice_core::{Envelope, EventKind, OrderContext};
use roomservice_settings::ClientSettings;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Sleep};
use tracing::{debug, info, warn};

use crate::channel::NotificationChannel;
use crate::dispatch::{BusEvent, SubscriptionId};
use crate::errors::{ClientError, TransportError};
use crate::machine::{
    Command, ConnectionMachine, ConnectionState, Input, MachineConfig, ReadyState,
};
use crate::transport::{Link, LinkEvent, Transport};

/// Client configuration.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// WebSocket URL to connect to.
    pub url: String,
    /// Opens still pending after this long count as failed.
    pub connect_timeout: Duration,
    /// Connection policy.
    pub machine: MachineConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::from(&ClientSettings::default())
    }
}

impl From<&ClientSettings> for ClientConfig {
    fn from(s: &ClientSettings) -> Self {
        Self {
            url: s.resolved_url(),
            connect_timeout: Duration::from_millis(s.connect_timeout_ms),
            machine: MachineConfig {
                auto_reconnect: s.auto_reconnect,
                rate_limit: Duration::from_millis(s.rate_limit_ms),
                backoff_base: Duration::from_millis(s.backoff_base_ms),
                backoff_max: Duration::from_millis(s.backoff_max_ms),
                failure_notice_threshold: s.failure_notice_threshold,
                flap_window: Duration::from_millis(s.flap_window_ms),
                flap_max_attempts: s.flap_max_attempts,
            },
        }
    }
}

enum Internal {
    Opened(u64, Result<Link, TransportError>),
}

/// Handle to a mounted connection manager.
#[derive(Clone)]
pub struct NotificationClient {
    requests: mpsc::UnboundedSender<Input>,
    channel: NotificationChannel,
    subscriptions: Arc<Mutex<Vec<SubscriptionId>>>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl NotificationClient {
    /// Mount a manager on `channel` and start connecting.
    ///
    /// Only the instance holding the channel's lease opens a connection. The
    /// others observe it through the shared dispatcher and try for the lease
    /// again whenever it is released.
    pub fn mount(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        channel: &NotificationChannel,
    ) -> Self {
        let (requests, requests_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();

        let actor = Actor {
            machine: ConnectionMachine::new(config.machine, channel.leases().clone()),
            releases: channel.leases().releases(),
            url: config.url,
            connect_timeout: config.connect_timeout,
            transport,
            channel: channel.clone(),
            requests: requests_rx,
            internal_tx,
            internal_rx,
            link: None,
            arrived: None,
            timer: None,
        };
        let task = tokio::spawn(actor.run());
        let _ = requests.send(Input::Mount);

        Self {
            requests,
            channel: channel.clone(),
            subscriptions: Arc::new(Mutex::new(Vec::new())),
            task: Arc::new(Mutex::new(Some(task))),
        }
    }

    fn input(&self, input: Input) -> Result<(), ClientError> {
        self.requests.send(input).map_err(|_| ClientError::Stopped)
    }

    /// Ask for a connection. Dropped when another attempt started within the
    /// rate-limit window.
    pub fn connect(&self) -> Result<(), ClientError> {
        self.input(Input::Connect)
    }

    /// Reset backoff, replace any connection and connect now.
    pub fn reconnect(&self) -> Result<(), ClientError> {
        self.input(Input::Reconnect)
    }

    /// Tell the manager the application is in the foreground again.
    pub fn foregrounded(&self) -> Result<(), ClientError> {
        self.input(Input::Foregrounded)
    }

    /// State of the runtime's connection.
    pub fn state(&self) -> ReadyState {
        self.channel.state()
    }

    /// Watch connection state changes.
    pub fn watch_state(&self) -> watch::Receiver<ReadyState> {
        self.channel.watch_state()
    }

    /// Send a raw text frame on the open connection.
    pub fn send(&self, raw: impl Into<String>) -> Result<(), ClientError> {
        if self.requests.is_closed() {
            return Err(ClientError::Stopped);
        }
        self.channel.send(raw.into())
    }

    /// Call `callback` for every envelope of `kind`.
    pub fn subscribe<F>(&self, kind: EventKind, callback: F) -> SubscriptionId
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        let id = self.channel.dispatcher().subscribe(kind, callback);
        self.subscriptions.lock().push(id);
        id
    }

    /// Remove a callback.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscriptions.lock().retain(|s| *s != id);
        self.channel.dispatcher().unsubscribe(id)
    }

    /// Receive local bus events.
    pub fn bus(&self) -> broadcast::Receiver<BusEvent> {
        self.channel.dispatcher().bus()
    }

    /// Publish on the local bus.
    pub fn publish(&self, event: BusEvent) {
        self.channel.dispatcher().publish(event);
    }

    /// Remember the guest's latest order for alert relevance.
    pub fn set_order_context(&self, context: Option<OrderContext>) {
        self.channel.dispatcher().set_order_context(context);
    }

    /// Tear down: cancel any retry, close the connection, release the lease
    /// and drop the callbacks registered through this handle.
    ///
    /// None of those callbacks fires once this returns.
    pub async fn unmount(&self) {
        let _ = self.input(Input::Unmount);
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "connection manager task failed");
            }
        }
        let ids = std::mem::take(&mut *self.subscriptions.lock());
        for id in ids {
            let _ = self.channel.dispatcher().unsubscribe(id);
        }
    }
}

struct Actor {
    machine: ConnectionMachine,
    releases: watch::Receiver<u64>,
    url: String,
    connect_timeout: Duration,
    transport: Arc<dyn Transport>,
    channel: NotificationChannel,
    requests: mpsc::UnboundedReceiver<Input>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    link: Option<(u64, Link)>,
    arrived: Option<(u64, Link)>,
    timer: Option<(u64, Pin<Box<Sleep>>)>,
}

impl Actor {
    async fn run(mut self) {
        loop {
            let waiting = !self.machine.holds_lease();
            let input = tokio::select! {
                // every handle is gone
                req = self.requests.recv() => req.unwrap_or(Input::Unmount),
                Some(internal) = self.internal_rx.recv() => match internal {
                    Internal::Opened(generation, Ok(link)) => {
                        self.arrived = Some((generation, link));
                        Input::Opened { generation }
                    }
                    Internal::Opened(generation, Err(e)) => Input::OpenFailed {
                        generation,
                        reason: e.to_string(),
                    },
                },
                (generation, event) = next_link_event(&mut self.link) => match event {
                    LinkEvent::Message(data) => Input::MessageReceived { generation, data },
                    LinkEvent::Error(reason) => Input::ErrorOccurred { generation, reason },
                    LinkEvent::Closing => Input::Closing { generation },
                    LinkEvent::Closed(code) => Input::Closed { generation, code },
                },
                token = wait_timer(&mut self.timer) => Input::TimerFired { token },
                Ok(()) = self.releases.changed(), if waiting => {
                    debug!("connection lease released, trying to take over");
                    Input::Connect
                }
            };

            if input == Input::Unmount && self.machine.holds_lease() {
                // still the owner, so nobody else is writing the shared state
                self.channel.set_state(ReadyState::Closed);
            }
            let commands = self.machine.handle(Instant::now(), input);
            for command in commands {
                self.execute(command);
            }
            // an opened link the machine did not keep
            if let Some((generation, link)) = self.arrived.take() {
                debug!(generation, "discarding unused link");
                link.close();
            }
            if self.machine.holds_lease() {
                self.channel.set_state(self.machine.ready_state());
            }

            if self.machine.state() == ConnectionState::Closed {
                break;
            }
        }
        debug!("connection manager stopped");
    }

    fn execute(&mut self, command: Command) {
        match command {
            Command::Open { generation } => {
                let transport = self.transport.clone();
                let url = self.url.clone();
                let tx = self.internal_tx.clone();
                let limit = self.connect_timeout;
                info!(%url, generation, "connecting");
                drop(tokio::spawn(async move {
                    let res = match tokio::time::timeout(limit, transport.open(&url)).await {
                        Ok(res) => res,
                        Err(_) => Err(TransportError::Connect(format!(
                            "timed out after {} ms",
                            limit.as_millis()
                        ))),
                    };
                    // the actor may be gone; a dropped link closes itself
                    let _ = tx.send(Internal::Opened(generation, res));
                }));
            }
            Command::Attach { generation } => {
                if let Some((g, link)) = self.arrived.take() {
                    if g == generation {
                        self.channel.attach_outbox(link.outbox());
                        self.link = Some((g, link));
                    } else {
                        link.close();
                    }
                }
            }
            Command::CloseHandle { generation } => {
                if self.link.as_ref().is_some_and(|(g, _)| *g == generation) {
                    if let Some((_, link)) = self.link.take() {
                        self.channel.detach_outbox(&link.outbox());
                        link.close();
                    }
                }
                if self.arrived.as_ref().is_some_and(|(g, _)| *g == generation) {
                    if let Some((_, link)) = self.arrived.take() {
                        link.close();
                    }
                }
            }
            Command::ScheduleTimer { token, delay } => {
                self.timer = Some((token, Box::pin(tokio::time::sleep(delay))));
            }
            Command::CancelTimer => self.timer = None,
            Command::Deliver(frame) => {
                let _ = self.channel.dispatcher().dispatch(&frame);
            }
            Command::Notify(notice) => self.channel.dispatcher().notify(notice),
        }
    }
}

async fn next_link_event(link: &mut Option<(u64, Link)>) -> (u64, LinkEvent) {
    match link {
        Some((generation, link)) => (*generation, link.next_event().await),
        None => std::future::pending().await,
    }
}

async fn wait_timer(timer: &mut Option<(u64, Pin<Box<Sleep>>)>) -> u64 {
    match timer {
        Some((token, sleep)) => {
            sleep.as_mut().await;
            let token = *token;
            *timer = None;
            token
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_from_settings() {
        let settings = ClientSettings {
            origin: "https://hotel.example".into(),
            rate_limit_ms: 500,
            auto_reconnect: false,
            ..ClientSettings::default()
        };
        let config = ClientConfig::from(&settings);
        assert_eq!(config.url, "wss://hotel.example/ws");
        assert_eq!(config.machine.rate_limit, Duration::from_millis(500));
        assert!(!config.machine.auto_reconnect);
        assert_eq!(config.machine.flap_max_attempts, 10);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
    }

    #[test]
    fn default_config_targets_local_server() {
        assert_eq!(ClientConfig::default().url, "ws://127.0.0.1:8080/ws");
    }
}
