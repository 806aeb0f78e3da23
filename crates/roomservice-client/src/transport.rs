//! Transport seam.
//!
//! A [`Transport`] opens [`Link`]s. A link is a pair of channels plus a
//! close token; whatever drives the real socket holds the other side as a
//! [`LinkPeer`]. Dropping a link closes it.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::TransportError;

/// Frames buffered in either direction of a link.
const LINK_CAPACITY: usize = 64;

/// Something that happened on an open link.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkEvent {
    /// A text or binary frame arrived.
    Message(Vec<u8>),
    /// The socket reported an error.
    Error(String),
    /// The peer sent a close frame.
    Closing,
    /// The link is gone.
    Closed(Option<u16>),
}

/// Client end of an open connection.
#[derive(Debug)]
pub struct Link {
    outgoing: mpsc::Sender<String>,
    events: mpsc::Receiver<LinkEvent>,
    close: CancellationToken,
}

/// Socket-driver end of a [`Link`].
#[derive(Debug)]
pub struct LinkPeer {
    /// Text the client wants sent.
    pub outgoing: mpsc::Receiver<String>,
    /// Events for the client.
    pub events: mpsc::Sender<LinkEvent>,
    /// Cancelled when the client closes or drops the link.
    pub close: CancellationToken,
}

impl Link {
    /// A connected link/peer pair.
    pub fn pair() -> (Self, LinkPeer) {
        let (out_tx, out_rx) = mpsc::channel(LINK_CAPACITY);
        let (ev_tx, ev_rx) = mpsc::channel(LINK_CAPACITY);
        let close = CancellationToken::new();
        (
            Self {
                outgoing: out_tx,
                events: ev_rx,
                close: close.clone(),
            },
            LinkPeer {
                outgoing: out_rx,
                events: ev_tx,
                close,
            },
        )
    }

    /// Queue a text frame.
    pub fn send(&self, text: String) -> Result<(), TransportError> {
        self.outgoing
            .try_send(text)
            .map_err(|_| TransportError::Closed)
    }

    /// Next event. A peer that vanished without a close reads as
    /// `Closed(None)`.
    pub async fn next_event(&mut self) -> LinkEvent {
        self.events.recv().await.unwrap_or(LinkEvent::Closed(None))
    }

    /// A sender for queueing text frames without holding the link.
    pub fn outbox(&self) -> mpsc::Sender<String> {
        self.outgoing.clone()
    }

    /// Close the link.
    pub fn close(&self) {
        self.close.cancel();
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.close.cancel();
    }
}

/// Opens links to a URL.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a link. Resolves once the connection is established.
    async fn open(&self, url: &str) -> Result<Link, TransportError>;
}

/// WebSocket transport over `tokio-tungstenite`.
#[derive(Clone, Copy, Debug, Default)]
pub struct WsTransport;

#[async_trait]
impl Transport for WsTransport {
    async fn open(&self, url: &str) -> Result<Link, TransportError> {
        let (ws, _response) = connect_async(url)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let (link, peer) = Link::pair();
        drop(tokio::spawn(pump(ws, peer)));
        Ok(link)
    }
}

/// Move frames between a socket and a link peer until either side stops.
async fn pump<S>(ws: S, mut peer: LinkPeer)
where
    S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
        + futures::Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
        + Unpin,
{
    let (mut sink, mut stream) = ws.split();
    let mut close_code = None;

    loop {
        tokio::select! {
            () = peer.close.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                debug!("link closed locally");
                return;
            }
            text = peer.outgoing.recv() => {
                let Some(text) = text else {
                    let _ = sink.send(Message::Close(None)).await;
                    return;
                };
                if let Err(e) = sink.send(Message::text(text)).await {
                    let _ = peer.events.send(LinkEvent::Error(e.to_string())).await;
                }
            }
            msg = stream.next() => {
                let event = match msg {
                    Some(Ok(Message::Text(text))) => LinkEvent::Message(text.as_bytes().to_vec()),
                    Some(Ok(Message::Binary(data))) => LinkEvent::Message(data.to_vec()),
                    Some(Ok(Message::Close(frame))) => {
                        close_code = frame.map(|f| u16::from(f.code));
                        LinkEvent::Closing
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
                    Some(Err(e)) => {
                        warn!(error = %e, "websocket error");
                        let _ = peer.events.send(LinkEvent::Error(e.to_string())).await;
                        break;
                    }
                    None => break,
                };
                if peer.events.send(event).await.is_err() {
                    return;
                }
            }
        }
    }

    // 1006: closed without a close frame
    let _ = peer
        .events
        .send(LinkEvent::Closed(close_code.or(Some(1006))))
        .await;
}
