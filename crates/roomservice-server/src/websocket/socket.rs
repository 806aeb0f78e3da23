//! WebSocket session lifecycle: one connected client from upgrade through
//! disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use roomservice_core::{Envelope, SessionId};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::handler::reflect;
use super::registry::SessionRegistry;
use super::session::{Outbound, Session};
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL,
};

/// Greeting carried by the `connection` envelope.
pub const WELCOME_MESSAGE: &str = "Connected to order notifications";

/// Per-session tuning.
#[derive(Clone, Copy, Debug)]
pub struct SessionConfig {
    /// Delay before the `connection` greeting is written.
    pub welcome_delay: Duration,
    /// Outbound frames buffered before sends fail.
    pub send_queue_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            welcome_delay: Duration::from_millis(100),
            send_queue_capacity: 256,
        }
    }
}

/// Run a WebSocket session for a connected client.
///
/// 1. Registers the session so broadcasts reach it
/// 2. Writes one `connection` greeting after `welcome_delay`
/// 3. Forwards queued envelopes and heartbeat probes to the socket
/// 4. Marks the session alive on Pong, echoes text frames back
/// 5. Unregisters on close, error, termination or server shutdown
#[instrument(skip_all, fields(session_id = %session_id))]
pub async fn run_ws_session(
    ws: WebSocket,
    session_id: SessionId,
    registry: Arc<SessionRegistry>,
    config: SessionConfig,
    shutdown: CancellationToken,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    let (send_tx, mut send_rx) = mpsc::channel::<Outbound>(config.send_queue_capacity.max(1));
    let session = Arc::new(Session::new(session_id.clone(), send_tx));

    info!("client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    registry.register(session.clone()).await;

    let writer_session = session.clone();
    let writer = tokio::spawn(async move {
        // The greeting waits so it does not race the client's open handling.
        tokio::select! {
            () = tokio::time::sleep(config.welcome_delay) => {}
            () = writer_session.terminated() => return,
        }
        match Envelope::connection(WELCOME_MESSAGE).encode() {
            Ok(json) => {
                if ws_tx.send(Message::Text(json.into())).await.is_err() {
                    writer_session.terminate();
                    return;
                }
            }
            Err(e) => warn!(error = %e, "failed to encode greeting"),
        }

        loop {
            tokio::select! {
                item = send_rx.recv() => {
                    let msg = match item {
                        Some(Outbound::Frame(text)) => Message::Text((&*text).into()),
                        Some(Outbound::Probe) => Message::Ping(Vec::new().into()),
                        None => break,
                    };
                    if ws_tx.send(msg).await.is_err() {
                        writer_session.terminate();
                        break;
                    }
                }
                () = writer_session.terminated() => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    loop {
        let msg = tokio::select! {
            msg = ws_rx.next() => msg,
            () = session.terminated() => {
                debug!("session terminated");
                break;
            }
            () = shutdown.cancelled() => {
                debug!("server shutting down");
                session.terminate();
                break;
            }
        };

        let Some(Ok(msg)) = msg else { break };

        let text = match msg {
            Message::Text(ref t) => Some(t.to_string()),
            Message::Binary(ref data) => {
                if let Ok(s) = std::str::from_utf8(data) {
                    Some(s.to_string())
                } else {
                    info!(len = data.len(), "received non-UTF8 binary frame");
                    None
                }
            }
            Message::Close(_) => {
                info!("client sent close frame");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => {
                session.mark_alive();
                None
            }
        };

        let Some(text) = text else { continue };

        match reflect(&text).encode() {
            Ok(json) => {
                if let Err(e) = session.send(Arc::from(json)) {
                    info!(error = %e, "failed to enqueue echo");
                }
            }
            Err(e) => warn!(error = %e, "failed to encode echo"),
        }
    }

    info!("client disconnected");
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(session.age().as_secs_f64());

    let _ = registry.terminate(&session_id).await;
    session.terminate();
    // Let the writer flush its close frame; it exits as soon as it sees the
    // termination.
    if tokio::time::timeout(Duration::from_secs(1), writer).await.is_err() {
        debug!("writer did not finish in time");
    }
}
